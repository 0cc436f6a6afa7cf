//! Adapter registry
//!
//! Resolution is a pure scan: every descriptor whose predicate accepts the
//! source and capabilities is a candidate, the highest priority wins, and
//! among equal priorities the earliest registration wins. Registering a
//! second descriptor with an existing id does not evict the first; it
//! shadows it only if it outranks it.

use crate::adapter::{
    is_supported_format, source_extension, AdaptiveAdapter, AdapterKind, DirectAdapter,
    NativeAdapter, StreamingAdapter,
};
use crate::capabilities::CapabilitySnapshot;
use crate::config::EngineConfig;
use crate::engine::EngineProvider;
use std::sync::Arc;
use tracing::debug;

/// Default priorities, highest wins
pub const NATIVE_PRIORITY: i32 = 40;
pub const HLS_PRIORITY: i32 = 30;
pub const DASH_PRIORITY: i32 = 20;
pub const DIRECT_PRIORITY: i32 = 10;

/// Describes one way of playing sources and builds adapter instances
pub trait AdapterDescriptor: Send + Sync {
    fn id(&self) -> &str;

    fn priority(&self) -> i32;

    /// Whether this adapter can play `source` in this environment
    fn can_handle(&self, source: &str, capabilities: &CapabilitySnapshot) -> bool;

    /// Build a fresh adapter instance
    fn create(&self) -> Arc<dyn StreamingAdapter>;
}

type Predicate = dyn Fn(&str, &CapabilitySnapshot) -> bool + Send + Sync;
type Factory = dyn Fn() -> Arc<dyn StreamingAdapter> + Send + Sync;

/// Descriptor backed by closures
pub struct FnDescriptor {
    id: String,
    priority: i32,
    can_handle: Box<Predicate>,
    create: Box<Factory>,
}

impl FnDescriptor {
    pub fn new<P, F>(id: impl Into<String>, priority: i32, can_handle: P, create: F) -> Self
    where
        P: Fn(&str, &CapabilitySnapshot) -> bool + Send + Sync + 'static,
        F: Fn() -> Arc<dyn StreamingAdapter> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            priority,
            can_handle: Box::new(can_handle),
            create: Box::new(create),
        }
    }
}

impl AdapterDescriptor for FnDescriptor {
    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_handle(&self, source: &str, capabilities: &CapabilitySnapshot) -> bool {
        (self.can_handle)(source, capabilities)
    }

    fn create(&self) -> Arc<dyn StreamingAdapter> {
        (self.create)()
    }
}

impl std::fmt::Debug for FnDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnDescriptor")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .finish()
    }
}

fn is_hls(source: &str) -> bool {
    matches!(source_extension(source).as_deref(), Some("m3u8" | "m3u"))
}

fn is_dash(source: &str) -> bool {
    source_extension(source).as_deref() == Some("mpd")
}

/// Ordered set of adapter descriptors
#[derive(Default)]
pub struct AdapterRegistry {
    descriptors: Vec<Arc<dyn AdapterDescriptor>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four built-in adapters
    pub fn with_defaults(
        hls: Arc<dyn EngineProvider>,
        dash: Arc<dyn EngineProvider>,
        config: &EngineConfig,
    ) -> Self {
        let mut registry = Self::new();
        let hls_settings = config.hls.clone();
        let dash_settings = config.dash.clone();

        registry.register(FnDescriptor::new(
            AdapterKind::Native.id(),
            NATIVE_PRIORITY,
            |source, caps| caps.native_hls && is_hls(source),
            || Arc::new(NativeAdapter::new()) as Arc<dyn StreamingAdapter>,
        ));
        registry.register(FnDescriptor::new(
            AdapterKind::Hls.id(),
            HLS_PRIORITY,
            |source, caps| caps.hls_engine && is_hls(source),
            move || {
                Arc::new(AdaptiveAdapter::new(hls.clone(), hls_settings.clone()))
                    as Arc<dyn StreamingAdapter>
            },
        ));
        registry.register(FnDescriptor::new(
            AdapterKind::Dash.id(),
            DASH_PRIORITY,
            |source, caps| caps.dash_engine && is_dash(source),
            move || {
                Arc::new(AdaptiveAdapter::new(dash.clone(), dash_settings.clone()))
                    as Arc<dyn StreamingAdapter>
            },
        ));
        registry.register(FnDescriptor::new(
            AdapterKind::Direct.id(),
            DIRECT_PRIORITY,
            |source, _caps| is_supported_format(source),
            || Arc::new(DirectAdapter::new()) as Arc<dyn StreamingAdapter>,
        ));
        registry
    }

    /// Append a descriptor. Ids are not de-duplicated.
    pub fn register(&mut self, descriptor: impl AdapterDescriptor + 'static) {
        self.register_arc(Arc::new(descriptor));
    }

    pub fn register_arc(&mut self, descriptor: Arc<dyn AdapterDescriptor>) {
        debug!(id = descriptor.id(), priority = descriptor.priority(), "Adapter registered");
        self.descriptors.push(descriptor);
    }

    /// Best descriptor for the source, or `None` when nothing matches
    pub fn resolve(
        &self,
        source: &str,
        capabilities: &CapabilitySnapshot,
    ) -> Option<Arc<dyn AdapterDescriptor>> {
        let mut best: Option<&Arc<dyn AdapterDescriptor>> = None;
        for descriptor in &self.descriptors {
            if !descriptor.can_handle(source, capabilities) {
                continue;
            }
            // Strictly greater: equal priority keeps the earlier registration
            if best.map_or(true, |b| descriptor.priority() > b.priority()) {
                best = Some(descriptor);
            }
        }
        best.cloned()
    }

    /// Registered ids in registration order
    pub fn descriptors(&self) -> Vec<String> {
        self.descriptors.iter().map(|d| d.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.descriptors()).finish()
    }
}
