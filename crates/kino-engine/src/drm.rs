//! DRM - encrypted-media session bootstrap
//!
//! Negotiates one key system from an ordered list and binds its key
//! container to the playback surface before any adapter loads content.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               DrmSessionController                   │
//! ├─────────────────────────────────────────────────────┤
//! │                                                     │
//! │   systems[0] ──▶ systems[1] ──▶ ... (first grant)   │
//! │                       │                             │
//! │               ┌───────┴───────┐                     │
//! │               │ KeySystemGrant│──▶ MediaKeys        │
//! │               └───────┬───────┘        │            │
//! │                       │                ▼            │
//! │              LicenseTransport   PlaybackSurface     │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! The license exchange itself (challenge generation, server round trip,
//! session update) belongs to the granted key system's session object. The
//! controller stops once keys are bound and never retries.

use crate::error::{Error, Result};
use crate::surface::{MediaKeys, PlaybackSurface};
use crate::types::{DrmConfiguration, KeySystemConfig};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Environment hook that grants (or refuses) access to a key system
#[async_trait]
pub trait KeySystemAccess: Send + Sync {
    /// `requestMediaKeySystemAccess` equivalent. An error means "not supported here".
    async fn request_access(&self, config: &KeySystemConfig) -> anyhow::Result<Arc<dyn KeySystemGrant>>;
}

/// Access granted to one key system
#[async_trait]
pub trait KeySystemGrant: Send + Sync {
    fn key_system(&self) -> &str;

    /// Create the key container. The grant keeps `transport` for the license
    /// exchanges its sessions perform later.
    async fn create_media_keys(
        &self,
        config: &KeySystemConfig,
        transport: Arc<dyn LicenseTransport>,
    ) -> anyhow::Result<MediaKeys>;
}

/// Fetch-equivalent used for license round trips
#[async_trait]
pub trait LicenseTransport: Send + Sync {
    /// POST a license challenge, returning the server's response body
    async fn exchange(&self, license_server_url: &str, challenge: Bytes) -> Result<Bytes>;
}

/// License transport over HTTP
#[cfg(feature = "http-license")]
pub struct HttpLicenseTransport {
    client: reqwest::Client,
    headers: Vec<(String, String)>,
}

#[cfg(feature = "http-license")]
impl HttpLicenseTransport {
    pub fn new(timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("license client: {}", e)))?;
        Ok(Self {
            client,
            headers: Vec::new(),
        })
    }

    /// Reuse a client the host already configured
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            headers: Vec::new(),
        }
    }

    /// Add a header sent with every license request
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }
}

#[cfg(feature = "http-license")]
#[async_trait]
impl LicenseTransport for HttpLicenseTransport {
    #[instrument(skip(self, challenge), fields(bytes = challenge.len()))]
    async fn exchange(&self, license_server_url: &str, challenge: Bytes) -> Result<Bytes> {
        let mut request = self
            .client
            .post(license_server_url)
            .header("Content-Type", "application/octet-stream")
            .body(challenge);
        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::LicenseExchange(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::LicenseExchange(format!(
                "license server returned {}",
                status
            )));
        }
        response
            .bytes()
            .await
            .map_err(|e| Error::LicenseExchange(e.to_string()))
    }
}

/// Transport for builds without an HTTP client
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLicenseTransport;

#[async_trait]
impl LicenseTransport for NoLicenseTransport {
    async fn exchange(&self, license_server_url: &str, _challenge: Bytes) -> Result<Bytes> {
        Err(Error::LicenseExchange(format!(
            "no license transport configured for {}",
            license_server_url
        )))
    }
}

fn default_transport() -> Arc<dyn LicenseTransport> {
    #[cfg(feature = "http-license")]
    {
        if let Ok(transport) = HttpLicenseTransport::new(std::time::Duration::from_secs(15)) {
            return Arc::new(transport);
        }
    }
    Arc::new(NoLicenseTransport)
}

/// Handle to the negotiated key system and its surface binding
#[derive(Clone)]
pub struct DrmSession {
    key_system: String,
    media_keys: MediaKeys,
    surface: Arc<PlaybackSurface>,
}

impl DrmSession {
    pub fn key_system(&self) -> &str {
        &self.key_system
    }

    pub fn media_keys(&self) -> &MediaKeys {
        &self.media_keys
    }

    /// Unbind keys: the surface's key container is set back to empty
    pub fn destroy(&self) {
        debug!(key_system = %self.key_system, "Unbinding media keys");
        self.surface.set_media_keys(None);
    }
}

impl std::fmt::Debug for DrmSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrmSession")
            .field("key_system", &self.key_system)
            .field("media_keys", &self.media_keys.id)
            .finish()
    }
}

/// Negotiates a key system and binds it to the surface
pub struct DrmSessionController {
    access: Arc<dyn KeySystemAccess>,
    transport: Arc<dyn LicenseTransport>,
}

impl DrmSessionController {
    pub fn new(access: Arc<dyn KeySystemAccess>) -> Self {
        Self {
            access,
            transport: default_transport(),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn LicenseTransport>) -> Self {
        self.transport = transport;
        self
    }

    /// Try each configured key system in order; bind the first granted one
    #[instrument(skip_all, fields(systems = config.systems.len()))]
    pub async fn setup(
        &self,
        config: &DrmConfiguration,
        surface: &Arc<PlaybackSurface>,
    ) -> Result<DrmSession> {
        let mut tried = Vec::with_capacity(config.systems.len());

        for system in &config.systems {
            tried.push(system.key_system.clone());

            let grant = match self.access.request_access(system).await {
                Ok(grant) => grant,
                Err(e) => {
                    debug!(key_system = %system.key_system, error = %e, "Key system rejected");
                    continue;
                }
            };

            let media_keys = grant
                .create_media_keys(system, self.transport.clone())
                .await
                .map_err(|e| Error::drm_init(&system.key_system, e))?;

            surface.set_media_keys(Some(media_keys.clone()));
            info!(
                key_system = %system.key_system,
                drm = ?system.drm_system(),
                "Media keys bound"
            );

            return Ok(DrmSession {
                key_system: grant.key_system().to_string(),
                media_keys,
                surface: surface.clone(),
            });
        }

        Err(Error::DrmUnsupported { tried })
    }
}
