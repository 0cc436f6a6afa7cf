//! Plugin lifecycle dispatch
//!
//! Plugins observe the engine through optional hooks. Every hook runs for
//! every plugin, in registration order, on the caller's task. A hook that
//! returns an error or panics is logged as one warning naming the plugin and
//! the remaining plugins still run: plugin misbehavior never reaches the
//! orchestrator.

use crate::capabilities::CapabilitySnapshot;
use crate::error::Error;
use crate::logging::{default_logger, Logger};
use crate::surface::PlaybackSurface;
use crate::types::{LoadGeneration, QualityLevel};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Result of a plugin hook
pub type HookResult = anyhow::Result<()>;

/// Handed to `setup` once, at construction
#[derive(Clone)]
pub struct PluginContext {
    pub surface: Arc<PlaybackSurface>,
    pub capabilities: CapabilitySnapshot,
}

#[derive(Debug, Clone)]
pub struct InitEvent {
    pub capabilities: CapabilitySnapshot,
    /// Registered adapter ids, in registration order
    pub adapters: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SourceLoadStart {
    pub generation: LoadGeneration,
    pub source: String,
    /// Zero-based index into `[primary, ...fallbacks]`
    pub candidate_index: usize,
    pub total_candidates: usize,
    pub capabilities: CapabilitySnapshot,
}

#[derive(Debug, Clone)]
pub struct SourceLoaded {
    pub generation: LoadGeneration,
    pub source: String,
    pub strategy: String,
    pub candidate_index: usize,
    pub total_candidates: usize,
    /// One-based attempt on this source that succeeded
    pub attempt: u32,
}

#[derive(Debug, Clone)]
pub struct SourceLoadFailed {
    pub generation: LoadGeneration,
    pub source: String,
    /// None when no adapter could be resolved
    pub strategy: Option<String>,
    /// One-based attempt on this source
    pub attempt: u32,
    pub max_attempts: u32,
    pub candidate_index: usize,
    pub total_candidates: usize,
    pub error: Error,
    /// Whether a retry on the same source follows
    pub will_retry: bool,
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub generation: LoadGeneration,
    pub source: String,
    pub strategy: String,
    /// One-based number of the upcoming attempt
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
}

#[derive(Debug, Clone)]
pub struct FailoverEvent {
    pub generation: LoadGeneration,
    pub from: String,
    pub to: String,
    /// Index of `to` in `[primary, ...fallbacks]`
    pub candidate_index: usize,
    pub total_candidates: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct PlaybackEvent {
    pub current_time: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct TimeUpdateEvent {
    pub current_time: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct VolumeEvent {
    pub volume: f64,
    pub muted: bool,
}

#[derive(Debug, Clone)]
pub struct QualityEvent {
    pub strategy: String,
    pub level: QualityLevel,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub generation: LoadGeneration,
    pub error: Error,
}

#[derive(Debug, Clone, Copy)]
pub struct DisposeEvent {
    pub generation: LoadGeneration,
}

/// An engine observer. Every hook is optional.
#[allow(unused_variables)]
pub trait Plugin: Send + Sync {
    /// Identity used in warnings
    fn name(&self) -> &str;

    fn setup(&self, context: &PluginContext) -> HookResult {
        Ok(())
    }

    fn on_init(&self, event: &InitEvent) -> HookResult {
        Ok(())
    }

    fn on_source_load_start(&self, event: &SourceLoadStart) -> HookResult {
        Ok(())
    }

    fn on_source_loaded(&self, event: &SourceLoaded) -> HookResult {
        Ok(())
    }

    fn on_source_load_failed(&self, event: &SourceLoadFailed) -> HookResult {
        Ok(())
    }

    fn on_retry(&self, event: &RetryEvent) -> HookResult {
        Ok(())
    }

    fn on_failover(&self, event: &FailoverEvent) -> HookResult {
        Ok(())
    }

    fn on_play(&self, event: &PlaybackEvent) -> HookResult {
        Ok(())
    }

    fn on_pause(&self, event: &PlaybackEvent) -> HookResult {
        Ok(())
    }

    fn on_time_update(&self, event: &TimeUpdateEvent) -> HookResult {
        Ok(())
    }

    fn on_volume_change(&self, event: &VolumeEvent) -> HookResult {
        Ok(())
    }

    fn on_quality_change(&self, event: &QualityEvent) -> HookResult {
        Ok(())
    }

    /// Engine-level failure; fires at most once per load generation
    fn on_error(&self, event: &ErrorEvent) -> HookResult {
        Ok(())
    }

    fn on_dispose(&self, event: &DisposeEvent) -> HookResult {
        Ok(())
    }
}

/// Fault-isolated hook dispatcher
pub struct PluginManager {
    plugins: Vec<Arc<dyn Plugin>>,
    logger: RwLock<Arc<dyn Logger>>,
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl PluginManager {
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self::with_logger(plugins, default_logger())
    }

    pub fn with_logger(plugins: Vec<Arc<dyn Plugin>>, logger: Arc<dyn Logger>) -> Self {
        Self {
            plugins,
            logger: RwLock::new(logger),
        }
    }

    /// Replace the logger used for hook failures
    pub fn set_logger(&self, logger: Arc<dyn Logger>) {
        *self.logger.write() = logger;
    }

    /// Restore the default `tracing` logger
    pub fn reset_logger(&self) {
        self.set_logger(default_logger());
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugin names in invocation order
    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    /// Run `call` against every plugin. Returns how many hooks failed.
    fn dispatch(&self, hook: &'static str, call: impl Fn(&dyn Plugin) -> HookResult) -> usize {
        let mut failures = 0;
        for plugin in &self.plugins {
            let outcome = catch_unwind(AssertUnwindSafe(|| call(plugin.as_ref())));
            let reason = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("{:#}", e),
                Err(panic) => panic_message(panic.as_ref()),
            };
            failures += 1;
            // Clone out so a logger that re-enters set_logger cannot deadlock
            let logger = self.logger.read().clone();
            logger.warn(
                plugin.name(),
                &format!("plugin '{}' failed in {}: {}", plugin.name(), hook, reason),
            );
        }
        debug!(hook, plugins = self.plugins.len(), failures, "Plugin hook dispatched");
        failures
    }

    pub fn setup(&self, context: &PluginContext) -> usize {
        self.dispatch("setup", |p| p.setup(context))
    }

    pub fn init(&self, event: &InitEvent) -> usize {
        self.dispatch("on_init", |p| p.on_init(event))
    }

    pub fn source_load_start(&self, event: &SourceLoadStart) -> usize {
        self.dispatch("on_source_load_start", |p| p.on_source_load_start(event))
    }

    pub fn source_loaded(&self, event: &SourceLoaded) -> usize {
        self.dispatch("on_source_loaded", |p| p.on_source_loaded(event))
    }

    pub fn source_load_failed(&self, event: &SourceLoadFailed) -> usize {
        self.dispatch("on_source_load_failed", |p| p.on_source_load_failed(event))
    }

    pub fn retry(&self, event: &RetryEvent) -> usize {
        self.dispatch("on_retry", |p| p.on_retry(event))
    }

    pub fn failover(&self, event: &FailoverEvent) -> usize {
        self.dispatch("on_failover", |p| p.on_failover(event))
    }

    pub fn play(&self, event: &PlaybackEvent) -> usize {
        self.dispatch("on_play", |p| p.on_play(event))
    }

    pub fn pause(&self, event: &PlaybackEvent) -> usize {
        self.dispatch("on_pause", |p| p.on_pause(event))
    }

    pub fn time_update(&self, event: &TimeUpdateEvent) -> usize {
        self.dispatch("on_time_update", |p| p.on_time_update(event))
    }

    pub fn volume_change(&self, event: &VolumeEvent) -> usize {
        self.dispatch("on_volume_change", |p| p.on_volume_change(event))
    }

    pub fn quality_change(&self, event: &QualityEvent) -> usize {
        self.dispatch("on_quality_change", |p| p.on_quality_change(event))
    }

    pub fn error(&self, event: &ErrorEvent) -> usize {
        self.dispatch("on_error", |p| p.on_error(event))
    }

    pub fn dispose(&self, event: &DisposeEvent) -> usize {
        self.dispatch("on_dispose", |p| p.on_dispose(event))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}
