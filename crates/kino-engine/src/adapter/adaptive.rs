//! Adaptive streaming through an HLS or DASH engine
//!
//! The engine's event subscription is folded into a single deferred result:
//! `Ready` resolves the load, a fatal `Error` rejects it, and the
//! cancellation token races both. After a successful load a forwarding task
//! keeps reporting level switches until the adapter is destroyed.

use super::{AdapterKind, LoadContext, QualityCallback, StreamingAdapter, AUTO_QUALITY};
use crate::config::EngineSettings;
use crate::engine::{EngineEvent, EngineKind, EngineProvider, StreamingEngine};
use crate::error::{Error, Result};
use crate::types::QualityLevel;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub struct AdaptiveAdapter {
    kind: EngineKind,
    provider: Arc<dyn EngineProvider>,
    settings: EngineSettings,
    engine: Mutex<Option<Arc<dyn StreamingEngine>>>,
    forwarder: Mutex<Option<CancellationToken>>,
}

impl AdaptiveAdapter {
    pub fn new(provider: Arc<dyn EngineProvider>, settings: EngineSettings) -> Self {
        Self {
            kind: provider.kind(),
            provider,
            settings,
            engine: Mutex::new(None),
            forwarder: Mutex::new(None),
        }
    }

    fn engine(&self) -> Option<Arc<dyn StreamingEngine>> {
        self.engine.lock().clone()
    }

    fn teardown(&self) {
        if let Some(stop) = self.forwarder.lock().take() {
            stop.cancel();
        }
        if let Some(engine) = self.engine.lock().take() {
            debug!(engine = %self.kind, "Destroying engine instance");
            engine.destroy();
        }
    }

    async fn await_ready(
        &self,
        engine: &Arc<dyn StreamingEngine>,
        events: &mut broadcast::Receiver<EngineEvent>,
        cancel: &CancellationToken,
        context: &LoadContext,
    ) -> Result<()> {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::LoadAborted),
                event = events.recv() => match event {
                    Ok(EngineEvent::Ready) => {
                        info!(engine = %self.kind, event = self.kind.ready_event(), "Engine ready");
                        return Ok(());
                    }
                    Ok(EngineEvent::LevelSwitched { level }) => {
                        if let Some(quality) = level_for(engine, level) {
                            context.notify_quality(quality);
                        }
                    }
                    Ok(EngineEvent::Error { fatal: true, details }) => {
                        return Err(Error::engine(self.kind.to_string(), details));
                    }
                    Ok(EngineEvent::Error { fatal: false, details }) => {
                        warn!(engine = %self.kind, %details, "Non-fatal engine error");
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Engine events lagged");
                    }
                    Err(RecvError::Closed) => {
                        return Err(Error::engine(self.kind.to_string(), "event stream closed before ready"));
                    }
                }
            }
        }
    }

    fn spawn_forwarder(
        &self,
        engine: Arc<dyn StreamingEngine>,
        mut events: broadcast::Receiver<EngineEvent>,
        callback: QualityCallback,
    ) {
        let stop = CancellationToken::new();
        if let Some(previous) = self.forwarder.lock().replace(stop.clone()) {
            previous.cancel();
        }
        let kind = self.kind;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(EngineEvent::LevelSwitched { level }) => {
                            if let Some(quality) = level_for(&engine, level) {
                                callback(quality);
                            }
                        }
                        Ok(EngineEvent::Error { fatal, details }) => {
                            warn!(engine = %kind, fatal, %details, "Engine error after load");
                        }
                        Ok(EngineEvent::Ready) | Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        });
    }
}

fn level_for(engine: &Arc<dyn StreamingEngine>, index: usize) -> Option<QualityLevel> {
    let level = engine.levels().into_iter().find(|l| l.index == index);
    if level.is_none() {
        debug!(index, "Switched to a level missing from the ladder");
    }
    level.map(|l| l.to_quality_level())
}

#[async_trait]
impl StreamingAdapter for AdaptiveAdapter {
    fn id(&self) -> &str {
        self.kind().id()
    }

    fn kind(&self) -> AdapterKind {
        match self.kind {
            EngineKind::Hls => AdapterKind::Hls,
            EngineKind::Dash => AdapterKind::Dash,
        }
    }

    #[instrument(skip(self, context), fields(engine = %self.kind, source = %context.source))]
    async fn load(&self, context: LoadContext) -> Result<()> {
        let cancel = context.token();
        if cancel.is_cancelled() {
            return Err(Error::LoadAborted);
        }

        // A retry on this instance starts from a fresh engine
        self.teardown();

        let engine = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::LoadAborted),
            engine = self.provider.instantiate(&self.settings) => engine?,
        };

        let mut events = engine.subscribe();
        *self.engine.lock() = Some(engine.clone());

        if let Err(e) = engine.attach(&context.surface, &context.source) {
            self.teardown();
            return Err(e);
        }

        match self.await_ready(&engine, &mut events, &cancel, &context).await {
            Ok(()) => {
                if let Some(callback) = context.on_quality_change.clone() {
                    self.spawn_forwarder(engine, events, callback);
                }
                Ok(())
            }
            Err(e) => {
                self.teardown();
                Err(e)
            }
        }
    }

    fn destroy(&self) {
        self.teardown();
    }

    fn quality_levels(&self) -> Vec<QualityLevel> {
        self.engine()
            .map(|engine| {
                engine
                    .levels()
                    .iter()
                    .map(|level| level.to_quality_level())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn set_quality(&self, id: &str) -> Result<()> {
        let engine = self
            .engine()
            .ok_or_else(|| Error::InvalidQuality(id.to_string()))?;

        if id == AUTO_QUALITY {
            engine.select_level(None);
            return Ok(());
        }

        let index = id
            .parse::<usize>()
            .ok()
            .filter(|index| engine.levels().iter().any(|l| l.index == *index))
            .ok_or_else(|| Error::InvalidQuality(id.to_string()))?;
        engine.select_level(Some(index));
        Ok(())
    }
}

impl Drop for AdaptiveAdapter {
    fn drop(&mut self) {
        self.teardown();
    }
}
