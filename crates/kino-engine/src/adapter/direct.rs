//! Progressive download of a single media file

use super::{source_extension, wait_for_media, AdapterKind, LoadContext, StreamingAdapter};
use crate::error::{Error, Result};
use crate::surface::{PlaybackSurface, SurfaceEvent};
use crate::types::QualityLevel;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Ceiling on a direct-file load
pub const DIRECT_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Extensions the surface can play progressively
pub const SUPPORTED_FORMATS: &[&str] = &[
    "mp4", "m4v", "webm", "ogg", "ogv", "mov", "mp3", "m4a", "aac", "wav", "flac", "opus",
];

/// Check a source's extension against [`SUPPORTED_FORMATS`]
pub fn is_supported_format(source: &str) -> bool {
    source_extension(source).is_some_and(|ext| SUPPORTED_FORMATS.contains(&ext.as_str()))
}

pub struct DirectAdapter {
    surface: Mutex<Option<Arc<PlaybackSurface>>>,
    timeout: Duration,
}

impl Default for DirectAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectAdapter {
    pub fn new() -> Self {
        Self {
            surface: Mutex::new(None),
            timeout: DIRECT_LOAD_TIMEOUT,
        }
    }
}

#[async_trait]
impl StreamingAdapter for DirectAdapter {
    fn id(&self) -> &str {
        AdapterKind::Direct.id()
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Direct
    }

    #[instrument(skip(self, context), fields(source = %context.source))]
    async fn load(&self, context: LoadContext) -> Result<()> {
        let cancel = context.token();
        if cancel.is_cancelled() {
            return Err(Error::LoadAborted);
        }
        if !is_supported_format(&context.source) {
            return Err(Error::FormatUnsupported {
                source_url: context.source.clone(),
            });
        }

        let mut events = context.surface.subscribe();
        *self.surface.lock() = Some(context.surface.clone());
        context.surface.set_source(&context.source);
        context.surface.load();

        let wait = wait_for_media(&mut events, &cancel, |event| {
            matches!(event, SurfaceEvent::CanPlay | SurfaceEvent::LoadedData)
        });

        match tokio::time::timeout(self.timeout, wait).await {
            Ok(Ok(())) => {
                debug!("Direct source ready");
                Ok(())
            }
            Ok(Err(Error::LoadAborted)) => {
                self.destroy();
                Err(Error::LoadAborted)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "Direct load timed out");
                self.destroy();
                Err(Error::LoadTimeout {
                    source_url: context.source.clone(),
                    seconds: self.timeout.as_secs(),
                })
            }
        }
    }

    fn destroy(&self) {
        if let Some(surface) = self.surface.lock().take() {
            surface.clear_source();
        }
    }

    fn quality_levels(&self) -> Vec<QualityLevel> {
        Vec::new()
    }

    fn set_quality(&self, id: &str) -> Result<()> {
        Err(Error::InvalidQuality(id.to_string()))
    }
}
