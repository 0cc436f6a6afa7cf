//! Error types for Kino Engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// One candidate's terminal error inside an aggregate failure
#[derive(Debug, Clone)]
pub struct SourceFailure {
    /// The candidate source that failed
    pub source: String,
    /// Terminal error for that source
    pub error: Error,
}

impl std::fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.source, self.error)
    }
}

/// Engine error types
#[derive(Error, Debug, Clone)]
pub enum Error {
    // Adapter errors
    #[error("Unsupported media format: {source_url}")]
    FormatUnsupported { source_url: String },

    #[error("Load timed out after {seconds}s: {source_url}")]
    LoadTimeout { source_url: String, seconds: u64 },

    #[error("Load aborted")]
    LoadAborted,

    #[error("Media load failed: {0}")]
    MediaLoad(String),

    #[error("Streaming engine error ({engine}): {details}")]
    EngineFatal { engine: String, details: String },

    #[error("Unknown quality level: {0}")]
    InvalidQuality(String),

    // Orchestration errors
    #[error("Load superseded by a newer request")]
    Superseded,

    #[error("No adapter can handle source: {source_url}")]
    NoAdapterResolved { source_url: String },

    #[error("All sources failed ({} attempted)", .failures.len())]
    AllSourcesFailed { failures: Vec<SourceFailure> },

    #[error("Engine disposed")]
    Disposed,

    // DRM errors
    #[error("No supported key system (tried: {})", .tried.join(", "))]
    DrmUnsupported { tried: Vec<String> },

    #[error("DRM initialization failed for {key_system}: {reason}")]
    DrmInitFailed { key_system: String, reason: String },

    #[error("License exchange failed: {0}")]
    LicenseExchange(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error kind, for matching without inspecting payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    FormatUnsupported,
    LoadTimeout,
    LoadAborted,
    MediaLoad,
    EngineFatal,
    InvalidQuality,
    Superseded,
    NoAdapterResolved,
    AllSourcesFailed,
    Disposed,
    DrmUnsupported,
    DrmInitFailed,
    LicenseExchange,
    InvalidConfig,
    Internal,
}

impl Error {
    /// Create a DRM initialization error
    pub fn drm_init(key_system: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Error::DrmInitFailed {
            key_system: key_system.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a fatal engine error
    pub fn engine(engine: impl Into<String>, details: impl Into<String>) -> Self {
        Error::EngineFatal {
            engine: engine.into(),
            details: details.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::FormatUnsupported { .. } => ErrorKind::FormatUnsupported,
            Error::LoadTimeout { .. } => ErrorKind::LoadTimeout,
            Error::LoadAborted => ErrorKind::LoadAborted,
            Error::MediaLoad(_) => ErrorKind::MediaLoad,
            Error::EngineFatal { .. } => ErrorKind::EngineFatal,
            Error::InvalidQuality(_) => ErrorKind::InvalidQuality,
            Error::Superseded => ErrorKind::Superseded,
            Error::NoAdapterResolved { .. } => ErrorKind::NoAdapterResolved,
            Error::AllSourcesFailed { .. } => ErrorKind::AllSourcesFailed,
            Error::Disposed => ErrorKind::Disposed,
            Error::DrmUnsupported { .. } => ErrorKind::DrmUnsupported,
            Error::DrmInitFailed { .. } => ErrorKind::DrmInitFailed,
            Error::LicenseExchange(_) => ErrorKind::LicenseExchange,
            Error::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if a failed load may be retried on the same source
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::LoadTimeout { .. } | Error::MediaLoad(_) | Error::EngineFatal { .. }
        )
    }

    /// Returns true for errors callers should treat as non-fatal
    /// (cancellation, supersession, teardown)
    pub fn is_expected(&self) -> bool {
        matches!(self, Error::LoadAborted | Error::Superseded | Error::Disposed)
    }

    /// Returns true for key-system negotiation failures
    pub fn is_drm(&self) -> bool {
        matches!(
            self,
            Error::DrmUnsupported { .. } | Error::DrmInitFailed { .. } | Error::LicenseExchange(_)
        )
    }

    /// Per-source errors of an aggregate failure, in attempt order
    pub fn failures(&self) -> &[SourceFailure] {
        match self {
            Error::AllSourcesFailed { failures } => failures,
            _ => &[],
        }
    }

    /// Returns the error code for analytics
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::FormatUnsupported { .. } => "FORMAT_UNSUPPORTED",
            Error::LoadTimeout { .. } => "LOAD_TIMEOUT",
            Error::LoadAborted => "LOAD_ABORTED",
            Error::MediaLoad(_) => "MEDIA_LOAD",
            Error::EngineFatal { .. } => "ENGINE_FATAL",
            Error::InvalidQuality(_) => "INVALID_QUALITY",
            Error::Superseded => "SUPERSEDED",
            Error::NoAdapterResolved { .. } => "NO_ADAPTER",
            Error::AllSourcesFailed { .. } => "ALL_SOURCES_FAILED",
            Error::Disposed => "DISPOSED",
            Error::DrmUnsupported { .. } => "DRM_UNSUPPORTED",
            Error::DrmInitFailed { .. } => "DRM_INIT",
            Error::LicenseExchange(_) => "LICENSE_EXCHANGE",
            Error::InvalidConfig(_) => "INVALID_CONFIG",
            Error::Internal(_) => "INTERNAL",
        }
    }
}
