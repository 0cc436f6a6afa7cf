//! Streaming adapters
//!
//! One adapter per delivery mechanism:
//! - `native`: the surface plays the source itself
//! - `adaptive`: HLS / DASH through a third-party engine
//! - `direct`: progressive download of a single file
//!
//! The orchestrator owns exactly one live adapter per load attempt and must
//! `destroy()` it before creating a replacement.

mod adaptive;
mod direct;
mod native;

pub use adaptive::AdaptiveAdapter;
pub use direct::{is_supported_format, DirectAdapter, DIRECT_LOAD_TIMEOUT, SUPPORTED_FORMATS};
pub use native::NativeAdapter;

use crate::error::{Error, Result};
use crate::surface::{PlaybackSurface, SurfaceEvent};
use crate::types::QualityLevel;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Callback invoked when the active quality level changes
pub type QualityCallback = Arc<dyn Fn(QualityLevel) + Send + Sync>;

/// Concrete adapter variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Native,
    Hls,
    Dash,
    Direct,
}

impl AdapterKind {
    /// Default descriptor id for this variant
    pub fn id(&self) -> &'static str {
        match self {
            AdapterKind::Native => "native",
            AdapterKind::Hls => "hls",
            AdapterKind::Dash => "dash",
            AdapterKind::Direct => "direct",
        }
    }
}

impl std::fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Everything an adapter needs for one load
#[derive(Clone)]
pub struct LoadContext {
    pub surface: Arc<PlaybackSurface>,
    pub source: String,
    /// Cancellation signal; adapters fail with `LoadAborted` once triggered
    pub cancel: Option<CancellationToken>,
    pub on_quality_change: Option<QualityCallback>,
}

impl LoadContext {
    pub fn new(surface: Arc<PlaybackSurface>, source: impl Into<String>) -> Self {
        Self {
            surface,
            source: source.into(),
            cancel: None,
            on_quality_change: None,
        }
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_quality_callback(mut self, callback: QualityCallback) -> Self {
        self.on_quality_change = Some(callback);
        self
    }

    /// The cancellation token, or one that never fires
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone().unwrap_or_default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    pub(crate) fn notify_quality(&self, level: QualityLevel) {
        if let Some(callback) = &self.on_quality_change {
            callback(level);
        }
    }
}

impl std::fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadContext")
            .field("source", &self.source)
            .field("cancelled", &self.is_cancelled())
            .field("quality_callback", &self.on_quality_change.is_some())
            .finish()
    }
}

/// A delivery mechanism bound to the playback surface
#[async_trait]
pub trait StreamingAdapter: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> AdapterKind;

    /// Load the context's source. May be called again on the same instance
    /// to retry.
    async fn load(&self, context: LoadContext) -> Result<()>;

    /// Release surface bindings and engine state. Idempotent.
    fn destroy(&self);

    /// Selectable levels, empty when the browser manages quality
    fn quality_levels(&self) -> Vec<QualityLevel>;

    /// Select a level by id; "auto" restores automatic selection
    fn set_quality(&self, id: &str) -> Result<()>;
}

/// Quality id that restores automatic level selection
pub const AUTO_QUALITY: &str = "auto";

/// Lowercased file extension of a source, ignoring query and fragment
pub fn source_extension(source: &str) -> Option<String> {
    let path = match Url::parse(source) {
        Ok(url) => url.path().to_string(),
        Err(_) => source.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    let file = path.rsplit('/').next()?;
    let (_, extension) = file.rsplit_once('.')?;
    if extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

/// Wait for a surface event accepted by `ready`, an element error, or cancellation
pub(crate) async fn wait_for_media(
    events: &mut broadcast::Receiver<SurfaceEvent>,
    cancel: &CancellationToken,
    ready: impl Fn(&SurfaceEvent) -> bool,
) -> Result<()> {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::LoadAborted),
            event = events.recv() => match event {
                Ok(SurfaceEvent::Error { code, message }) => {
                    return Err(Error::MediaLoad(format!("{} (code {})", message, code)));
                }
                Ok(event) if ready(&event) => return Ok(()),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Surface events lagged");
                    continue;
                }
                Err(RecvError::Closed) => {
                    return Err(Error::Internal("surface event channel closed".into()));
                }
            }
        }
    }
}
