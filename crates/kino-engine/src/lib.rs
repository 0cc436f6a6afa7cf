//! Kino Engine - Source loading for Kino players
//!
//! This crate loads playable media into a single playback surface:
//! - Adapter resolution by source extension and environment capabilities
//! - Native, HLS/DASH engine, and progressive-download adapters
//! - Retry on one source, failover across fallbacks
//! - DRM key system negotiation before any content loads
//! - Fault-isolated plugin lifecycle hooks
//! - An immutable player state reducer
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Kino Engine                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐          │
//! │  │  Capability  │  │   Adapter    │  │     DRM      │          │
//! │  │    Probe     │  │   Registry   │  │  Controller  │          │
//! │  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘          │
//! │         │                 │                 │                   │
//! │         └─────────────────┼─────────────────┘                   │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │  Playback   │                              │
//! │                    │Orchestrator │                              │
//! │                    └──────┬──────┘                              │
//! │                           │                                     │
//! │  ┌──────────────┐  ┌──────┴──────┐  ┌──────────────┐           │
//! │  │    Plugin    │  │  Streaming  │  │    Player    │           │
//! │  │   Manager    │  │   Adapter   │  │    Store     │           │
//! │  └──────────────┘  └──────┬──────┘  └──────────────┘           │
//! │                           │                                     │
//! │                    ┌──────┴──────┐                              │
//! │                    │  Playback   │                              │
//! │                    │  Surface    │                              │
//! │                    └─────────────┘                              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod adapter;
pub mod capabilities;
pub mod config;
pub mod drm;
pub mod engine;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod plugin;
pub mod reducer;
pub mod registry;
pub mod surface;
pub mod types;

pub use adapter::{AdapterKind, LoadContext, StreamingAdapter};
pub use capabilities::{CapabilityProbe, CapabilitySnapshot, StaticProbe};
pub use config::{EngineConfig, EngineSettings};
pub use drm::{DrmSession, DrmSessionController, KeySystemAccess, KeySystemGrant, LicenseTransport};
pub use engine::{EngineEvent, EngineKind, EngineLevel, EngineProvider, StreamingEngine};
pub use error::{Error, ErrorKind, Result, SourceFailure};
pub use logging::{LogLevel, Logger, TracingLogger};
pub use orchestrator::{OrchestratorBuilder, PlaybackOrchestrator};
pub use plugin::{Plugin, PluginManager};
pub use reducer::{reduce, PlayerAction, PlayerState, PlayerStore};
pub use registry::{AdapterDescriptor, AdapterRegistry, FnDescriptor};
pub use surface::{MediaKeys, PlaybackSurface, SurfaceCommand, SurfaceEvent};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the engine library
pub fn init() {
    tracing::info!(version = VERSION, "Kino Engine initialized");
}
