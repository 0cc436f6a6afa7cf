//! Adaptive streaming engine seam
//!
//! The HLS and DASH engines are opaque third-party libraries. The engine
//! loads them lazily through an [`EngineProvider`] and talks to instances
//! through [`StreamingEngine`]; everything an instance reports arrives as an
//! [`EngineEvent`] on a broadcast channel.

use crate::config::EngineSettings;
use crate::error::Result;
use crate::surface::PlaybackSurface;
use crate::types::{QualityLevel, Resolution};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Which adaptive engine family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineKind {
    Hls,
    Dash,
}

impl EngineKind {
    /// Event that marks the stream as loadable
    pub fn ready_event(&self) -> &'static str {
        match self {
            EngineKind::Hls => "manifest parsed",
            EngineKind::Dash => "stream initialized",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Hls => write!(f, "hls"),
            EngineKind::Dash => write!(f, "dash"),
        }
    }
}

/// One rung of the engine's bitrate ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineLevel {
    pub index: usize,
    /// Bits per second
    pub bitrate: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl EngineLevel {
    pub fn resolution(&self) -> Option<Resolution> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if h > 0 => Some(Resolution::new(w, h)),
            (None, Some(h)) if h > 0 => Some(Resolution::new(0, h)),
            _ => None,
        }
    }

    pub fn to_quality_level(&self) -> QualityLevel {
        QualityLevel::new(self.index.to_string(), self.bitrate, self.resolution())
    }
}

/// Events reported by an engine instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Manifest parsed (HLS) / stream initialized (DASH)
    Ready,
    /// The engine switched to another level
    LevelSwitched { level: usize },
    Error { fatal: bool, details: String },
}

/// A live engine instance attached to at most one surface
pub trait StreamingEngine: Send + Sync {
    /// Subscribe to engine events
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;

    /// Attach to the surface and start loading the source
    fn attach(&self, surface: &Arc<PlaybackSurface>, source: &str) -> Result<()>;

    /// Current bitrate ladder, lowest first
    fn levels(&self) -> Vec<EngineLevel>;

    /// Pin a level, or `None` to restore automatic selection
    fn select_level(&self, level: Option<usize>);

    /// Detach from the surface and release all resources
    fn destroy(&self);
}

/// Lazily loads an engine library and constructs instances
#[async_trait]
pub trait EngineProvider: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Load the library on first use and build a configured instance
    async fn instantiate(&self, settings: &EngineSettings) -> Result<Arc<dyn StreamingEngine>>;
}
