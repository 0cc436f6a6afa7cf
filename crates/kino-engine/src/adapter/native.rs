//! Native playback: the surface decodes the source itself

use super::{wait_for_media, AdapterKind, LoadContext, StreamingAdapter};
use crate::error::{Error, Result};
use crate::surface::{PlaybackSurface, SurfaceEvent};
use crate::types::QualityLevel;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Binds the source straight to the surface. Quality is browser-managed.
#[derive(Default)]
pub struct NativeAdapter {
    surface: Mutex<Option<Arc<PlaybackSurface>>>,
}

impl NativeAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StreamingAdapter for NativeAdapter {
    fn id(&self) -> &str {
        AdapterKind::Native.id()
    }

    fn kind(&self) -> AdapterKind {
        AdapterKind::Native
    }

    #[instrument(skip(self, context), fields(source = %context.source))]
    async fn load(&self, context: LoadContext) -> Result<()> {
        let cancel = context.token();
        if cancel.is_cancelled() {
            return Err(Error::LoadAborted);
        }

        let mut events = context.surface.subscribe();
        *self.surface.lock() = Some(context.surface.clone());
        context.surface.set_source(&context.source);
        context.surface.load();

        let result = wait_for_media(&mut events, &cancel, |event| {
            matches!(event, SurfaceEvent::LoadedData)
        })
        .await;

        match result {
            Ok(()) => {
                debug!("First frame decoded");
                Ok(())
            }
            Err(Error::LoadAborted) => {
                self.destroy();
                Err(Error::LoadAborted)
            }
            Err(e) => Err(e),
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
