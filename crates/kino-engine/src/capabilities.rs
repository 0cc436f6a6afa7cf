//! Runtime capability snapshot
//!
//! The probe itself lives with the host (browser feature detection, platform
//! flags); the engine only consumes its output, once per load attempt.

use serde::{Deserialize, Serialize};

/// What the runtime environment supports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    /// The surface can play HLS without an engine (Safari, iOS)
    pub native_hls: bool,
    /// The HLS streaming engine is available
    pub hls_engine: bool,
    /// The DASH streaming engine is available
    pub dash_engine: bool,
    pub mobile: bool,
    pub ios: bool,
    pub android: bool,
    pub inline_playback: bool,
    pub autoplay: bool,
    pub picture_in_picture: bool,
}

impl CapabilitySnapshot {
    /// Typical desktop browser with both engines bundled
    pub fn desktop() -> Self {
        Self {
            hls_engine: true,
            dash_engine: true,
            inline_playback: true,
            autoplay: true,
            picture_in_picture: true,
            ..Default::default()
        }
    }

    /// Safari on iOS: native HLS, no MSE engines
    pub fn ios_safari() -> Self {
        Self {
            native_hls: true,
            mobile: true,
            ios: true,
            inline_playback: true,
            picture_in_picture: true,
            ..Default::default()
        }
    }

    /// Whether any adaptive playback path exists for HLS
    pub fn supports_hls(&self) -> bool {
        self.native_hls || self.hls_engine
    }
}

/// Produces a capability snapshot on demand
pub trait CapabilityProbe: Send + Sync {
    fn probe(&self) -> CapabilitySnapshot;
}

impl<F> CapabilityProbe for F
where
    F: Fn() -> CapabilitySnapshot + Send + Sync,
{
    fn probe(&self) -> CapabilitySnapshot {
        self()
    }
}

/// Probe returning a fixed snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticProbe(pub CapabilitySnapshot);

impl CapabilityProbe for StaticProbe {
    fn probe(&self) -> CapabilitySnapshot {
        self.0
    }
}
