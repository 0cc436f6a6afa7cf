//! Core types for Kino Engine

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Monotonically increasing token minted by every `load_source` call
pub type LoadGeneration = u64;

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One selectable rung of an adapter's quality ladder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityLevel {
    /// Identifier accepted by `set_quality`
    pub id: String,
    /// Human-readable label ("720p", "2.5 Mbps")
    pub label: String,
    /// Bitrate in bits per second
    pub bitrate: u64,
    /// Video resolution, when the engine reports one
    pub resolution: Option<Resolution>,
}

impl QualityLevel {
    pub fn new(id: impl Into<String>, bitrate: u64, resolution: Option<Resolution>) -> Self {
        Self {
            id: id.into(),
            label: quality_label(bitrate, resolution),
            bitrate,
            resolution,
        }
    }
}

/// Label a rendition by vertical resolution when known, else by bitrate
pub fn quality_label(bitrate: u64, resolution: Option<Resolution>) -> String {
    match resolution {
        Some(r) if r.height > 0 => format!("{}p", r.height),
        _ if bitrate >= 1_000_000 => {
            let mbps = bitrate as f64 / 1_000_000.0;
            if (mbps - mbps.round()).abs() < 0.05 {
                format!("{:.0} Mbps", mbps)
            } else {
                format!("{:.1} Mbps", mbps)
            }
        }
        _ => format!("{} kbps", bitrate / 1000),
    }
}

/// DRM system types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DrmSystem {
    Widevine,
    FairPlay,
    PlayReady,
    ClearKey,
}

impl DrmSystem {
    /// Returns the EME key-system string
    pub fn key_system(&self) -> &'static str {
        match self {
            DrmSystem::Widevine => "com.widevine.alpha",
            DrmSystem::FairPlay => "com.apple.fps",
            DrmSystem::PlayReady => "com.microsoft.playready",
            DrmSystem::ClearKey => "org.w3.clearkey",
        }
    }

    /// Map an EME key-system string back to a known system.
    /// Vendor suffixes ("com.apple.fps.1_0", "com.microsoft.playready.recommendation") match their family.
    pub fn from_key_system(key_system: &str) -> Option<Self> {
        let key_system = key_system.to_ascii_lowercase();
        [
            DrmSystem::Widevine,
            DrmSystem::FairPlay,
            DrmSystem::PlayReady,
            DrmSystem::ClearKey,
        ]
        .into_iter()
        .find(|system| {
            let id = system.key_system();
            key_system == id || key_system.starts_with(&format!("{id}."))
        })
    }
}

impl std::fmt::Display for DrmSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DrmSystem::Widevine => write!(f, "Widevine"),
            DrmSystem::FairPlay => write!(f, "FairPlay"),
            DrmSystem::PlayReady => write!(f, "PlayReady"),
            DrmSystem::ClearKey => write!(f, "ClearKey"),
        }
    }
}

/// One candidate key system with its license endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySystemConfig {
    /// EME key-system id, e.g. "com.widevine.alpha"
    pub key_system: String,
    /// License server URL
    pub license_server_url: String,
}

impl KeySystemConfig {
    pub fn new(key_system: impl Into<String>, license_server_url: impl Into<String>) -> Self {
        Self {
            key_system: key_system.into(),
            license_server_url: license_server_url.into(),
        }
    }

    /// Known DRM family of this key system
    pub fn drm_system(&self) -> Option<DrmSystem> {
        DrmSystem::from_key_system(&self.key_system)
    }
}

/// Encrypted-media configuration for a load request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrmConfiguration {
    /// Whether to negotiate a key system before loading
    #[serde(default)]
    pub enabled: bool,
    /// Key systems, tried in order
    #[serde(default)]
    pub systems: Vec<KeySystemConfig>,
}

impl DrmConfiguration {
    /// Create an enabled configuration trying `systems` in order
    pub fn new(systems: Vec<KeySystemConfig>) -> Self {
        Self {
            enabled: true,
            systems,
        }
    }

    /// Widevine-only configuration
    pub fn widevine(license_server_url: impl Into<String>) -> Self {
        Self::new(vec![KeySystemConfig::new(
            DrmSystem::Widevine.key_system(),
            license_server_url,
        )])
    }

    /// Key-system ids in negotiation order
    pub fn key_systems(&self) -> Vec<String> {
        self.systems.iter().map(|s| s.key_system.clone()).collect()
    }
}

/// Input to one orchestration attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRequest {
    /// Primary source
    pub src: String,
    /// Fallback sources, attempted in order after the primary
    #[serde(default)]
    pub fallback_sources: Vec<String>,
    /// Optional DRM negotiation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drm: Option<DrmConfiguration>,
}

impl LoadRequest {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            fallback_sources: Vec::new(),
            drm: None,
        }
    }

    /// Append a fallback source
    pub fn with_fallback(mut self, source: impl Into<String>) -> Self {
        self.fallback_sources.push(source.into());
        self
    }

    /// Attach a DRM configuration
    pub fn with_drm(mut self, drm: DrmConfiguration) -> Self {
        self.drm = Some(drm);
        self
    }

    /// Parse a request from the UI layer's JSON options
    pub fn from_json(json: &str) -> Result<Self> {
        let request: LoadRequest =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        request.validate()?;
        Ok(request)
    }

    /// Candidate sources in attempt order: `[primary, ...fallbacks]`
    pub fn candidates(&self) -> Vec<String> {
        std::iter::once(self.src.clone())
            .chain(self.fallback_sources.iter().cloned())
            .collect()
    }

    /// DRM configuration, only when enabled
    pub fn drm_enabled(&self) -> Option<&DrmConfiguration> {
        self.drm.as_ref().filter(|drm| drm.enabled)
    }

    /// Check the request is loadable
    pub fn validate(&self) -> Result<()> {
        if self.src.trim().is_empty() {
            return Err(Error::InvalidConfig("src is required".into()));
        }
        if self.fallback_sources.iter().any(|s| s.trim().is_empty()) {
            return Err(Error::InvalidConfig("fallback sources must not be empty".into()));
        }
        if let Some(drm) = self.drm_enabled() {
            if drm.systems.is_empty() {
                return Err(Error::InvalidConfig(
                    "drm enabled without any key systems".into(),
                ));
            }
            for system in &drm.systems {
                if system.key_system.trim().is_empty() {
                    return Err(Error::InvalidConfig("empty key system id".into()));
                }
                Url::parse(&system.license_server_url).map_err(|e| {
                    Error::InvalidConfig(format!(
                        "invalid license server url for {}: {}",
                        system.key_system, e
                    ))
                })?;
            }
        }
        Ok(())
    }
}

/// Orchestrator state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadPhase {
    /// Nothing requested yet, or disposed
    Idle,
    /// Negotiating a key system
    ResolvingDrm,
    /// Picking an adapter for the current candidate
    ResolvingAdapter,
    /// Adapter load in flight
    Loading,
    /// Waiting before re-attempting the same source
    Retrying,
    /// Moving on to the next candidate
    FailingOver,
    /// A source loaded
    Succeeded,
    /// All candidates failed or DRM was rejected
    Failed,
}

impl LoadPhase {
    /// Check if transition to target phase is valid
    pub fn can_transition_to(&self, target: LoadPhase) -> bool {
        use LoadPhase::*;
        matches!(
            (self, target),
            // Any phase may restart with a new request or be disposed
            (_, ResolvingDrm) | (_, ResolvingAdapter) | (_, Idle) |
            // From ResolvingDrm
            (ResolvingDrm, Failed) |
            // From ResolvingAdapter
            (ResolvingAdapter, Loading) | (ResolvingAdapter, FailingOver) | (ResolvingAdapter, Failed) |
            // From Loading
            (Loading, Succeeded) | (Loading, Retrying) | (Loading, FailingOver) | (Loading, Failed) |
            // From Retrying
            (Retrying, Loading)
        )
    }

    /// Terminal phases resolve the caller's operation
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadPhase::Succeeded | LoadPhase::Failed)
    }
}

impl std::fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadPhase::Idle => write!(f, "idle"),
            LoadPhase::ResolvingDrm => write!(f, "resolving-drm"),
            LoadPhase::ResolvingAdapter => write!(f, "resolving-adapter"),
            LoadPhase::Loading => write!(f, "loading"),
            LoadPhase::Retrying => write!(f, "retrying"),
            LoadPhase::FailingOver => write!(f, "failing-over"),
            LoadPhase::Succeeded => write!(f, "succeeded"),
            LoadPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Successful completion of a load generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadOutcome {
    pub generation: LoadGeneration,
    /// Source that loaded
    pub source: String,
    /// Adapter id that loaded it
    pub strategy: String,
    /// Zero-based index into `[primary, ...fallbacks]`
    pub candidate_index: usize,
    /// Load attempts made on the winning source
    pub attempts: u32,
    /// Negotiated key system, if DRM was enabled
    pub key_system: Option<String>,
    pub loaded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_label() {
        assert_eq!(quality_label(2_500_000, Some(Resolution::new(1280, 720))), "720p");
        assert_eq!(quality_label(2_500_000, None), "2.5 Mbps");
        assert_eq!(quality_label(3_000_000, None), "3 Mbps");
        assert_eq!(quality_label(800_000, None), "800 kbps");
        assert_eq!(quality_label(800_000, Some(Resolution::new(0, 0))), "800 kbps");
    }

    #[test]
    fn test_drm_system_from_key_system() {
        assert_eq!(
            DrmSystem::from_key_system("com.widevine.alpha"),
            Some(DrmSystem::Widevine)
        );
        assert_eq!(
            DrmSystem::from_key_system("com.microsoft.playready.recommendation"),
            Some(DrmSystem::PlayReady)
        );
        assert_eq!(DrmSystem::from_key_system("com.example.drm"), None);
    }

    #[test]
    fn test_request_from_json() {
        let json = r#"{
            "src": "https://cdn.example.com/main.m3u8",
            "fallbackSources": ["https://cdn.example.com/main.mp4"],
            "drm": {
                "enabled": true,
                "systems": [
                    { "keySystem": "com.widevine.alpha", "licenseServerUrl": "https://license.example.com/wv" }
                ]
            }
        }"#;
        let request = LoadRequest::from_json(json).unwrap();
        assert_eq!(request.candidates().len(), 2);
        assert_eq!(
            request.drm_enabled().unwrap().key_systems(),
            vec!["com.widevine.alpha".to_string()]
        );
    }

    #[test]
    fn test_request_validation() {
        assert!(LoadRequest::from_json(r#"{"src": ""}"#).is_err());
        assert!(LoadRequest::from_json(r#"{"fallbackSources": []}"#).is_err());

        let request = LoadRequest::new("a.mp4").with_drm(DrmConfiguration::new(vec![]));
        assert!(request.validate().is_err());

        let request = LoadRequest::new("a.mp4")
            .with_drm(DrmConfiguration::new(vec![KeySystemConfig::new("org.w3.clearkey", "not a url")]));
        assert!(request.validate().is_err());

        // Disabled DRM is not validated
        let request = LoadRequest::new("a.mp4").with_drm(DrmConfiguration::default());
        assert!(request.validate().is_ok());
        assert!(request.drm_enabled().is_none());
    }

    #[test]
    fn test_phase_transitions() {
        assert!(LoadPhase::Idle.can_transition_to(LoadPhase::ResolvingAdapter));
        assert!(LoadPhase::ResolvingAdapter.can_transition_to(LoadPhase::Loading));
        assert!(LoadPhase::Loading.can_transition_to(LoadPhase::Retrying));
        assert!(LoadPhase::Retrying.can_transition_to(LoadPhase::Loading));
        assert!(LoadPhase::Succeeded.can_transition_to(LoadPhase::ResolvingDrm));

        assert!(!LoadPhase::Idle.can_transition_to(LoadPhase::Succeeded));
        assert!(!LoadPhase::Retrying.can_transition_to(LoadPhase::Succeeded));
        assert!(!LoadPhase::ResolvingDrm.can_transition_to(LoadPhase::Loading));

        assert!(LoadPhase::Succeeded.is_terminal());
        assert!(LoadPhase::Failed.is_terminal());
        assert!(!LoadPhase::Retrying.is_terminal());
    }
}
