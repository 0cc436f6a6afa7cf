//! Engine configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Buffering settings handed to an adaptive streaming engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Forward buffer target in seconds
    pub max_buffer_secs: f64,
    /// Hard forward buffer ceiling in seconds
    pub max_max_buffer_secs: f64,
    /// Already-played media kept behind the playhead, in seconds
    pub back_buffer_secs: f64,
    /// Low-latency live mode
    pub low_latency: bool,
    /// Initial level index (None = engine's automatic choice)
    pub start_level: Option<usize>,
    /// Cap levels to the surface's display size
    pub cap_level_to_player_size: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::conservative()
    }
}

impl EngineSettings {
    /// Conservative buffering used for on-demand playback
    pub fn conservative() -> Self {
        Self {
            max_buffer_secs: 30.0,
            max_max_buffer_secs: 60.0,
            back_buffer_secs: 30.0,
            low_latency: false,
            start_level: None,
            cap_level_to_player_size: true,
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Extra attempts on the same source before failing over
    pub max_retries: u32,
    /// Delay between attempts on the same source, in milliseconds
    pub retry_delay_ms: u64,
    /// Settings for the HLS engine
    pub hls: EngineSettings,
    /// Settings for the DASH engine
    pub dash: EngineSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_ms: 1000,
            hls: EngineSettings::conservative(),
            dash: EngineSettings::conservative(),
        }
    }
}

impl EngineConfig {
    /// Parse from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builder-style retry budget
    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = retry_delay.as_millis() as u64;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Total attempts allowed per source
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, settings) in [("hls", &self.hls), ("dash", &self.dash)] {
            if !(settings.max_buffer_secs > 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "{name}.max_buffer_secs must be positive"
                )));
            }
            if settings.max_max_buffer_secs < settings.max_buffer_secs {
                return Err(Error::InvalidConfig(format!(
                    "{name}.max_max_buffer_secs must be >= max_buffer_secs"
                )));
            }
            if settings.back_buffer_secs < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name}.back_buffer_secs must not be negative"
                )));
            }
        }
        Ok(())
    }
}
