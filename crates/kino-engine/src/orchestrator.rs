//! Playback orchestrator - source loading state machine
//!
//! Coordinates:
//! - DRM negotiation before any adapter touches the surface
//! - Adapter resolution per candidate source
//! - Retries on one source, then failover to the next
//! - Supersession of older load generations
//! - Plugin lifecycle hooks and player state actions
//!
//! ```text
//! Idle ─▶ ResolvingDrm ─▶ ResolvingAdapter ─▶ Loading ─▶ Succeeded
//!              │                 │              │  ▲
//!              ▼                 ▼              ▼  │
//!            Failed         FailingOver ◀──── Retrying
//!                                │
//!                                ▼
//!                      next candidate / Failed
//! ```
//!
//! Every load runs under a generation number and a cancellation token. A new
//! `load_source` cancels the previous token; the older call notices at its
//! next suspension point and resolves with `Error::Superseded` without
//! touching shared state or firing further hooks.

use crate::adapter::{LoadContext, QualityCallback, StreamingAdapter};
use crate::capabilities::{CapabilityProbe, CapabilitySnapshot};
use crate::config::EngineConfig;
use crate::drm::{DrmSession, DrmSessionController};
use crate::error::{Error, Result, SourceFailure};
use crate::logging::{default_logger, Logger};
use crate::plugin::{
    DisposeEvent, ErrorEvent, FailoverEvent, InitEvent, PlaybackEvent, Plugin, PluginContext,
    PluginManager, QualityEvent, RetryEvent, SourceLoadFailed, SourceLoadStart, SourceLoaded,
    TimeUpdateEvent, VolumeEvent,
};
use crate::reducer::{PlayerAction, PlayerState, PlayerStore};
use crate::registry::{AdapterDescriptor, AdapterRegistry};
use crate::surface::PlaybackSurface;
use crate::types::{LoadGeneration, LoadOutcome, LoadPhase, LoadRequest, QualityLevel};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const LOG_SCOPE: &str = "orchestrator";

/// Mutable orchestration state. Never held across an await.
struct Inner {
    generation: LoadGeneration,
    cancel: CancellationToken,
    adapter: Option<Arc<dyn StreamingAdapter>>,
    drm_session: Option<DrmSession>,
    current_source: Option<String>,
    current_strategy: Option<String>,
    disposed: bool,
}

struct Shared {
    registry: AdapterRegistry,
    probe: Arc<dyn CapabilityProbe>,
    surface: Arc<PlaybackSurface>,
    plugins: PluginManager,
    drm: Option<DrmSessionController>,
    config: EngineConfig,
    logger: RwLock<Arc<dyn Logger>>,
    inner: Mutex<Inner>,
    phase_tx: watch::Sender<LoadPhase>,
    actions_tx: broadcast::Sender<PlayerAction>,
    store: PlayerStore,
}

/// Builder for [`PlaybackOrchestrator`]
pub struct OrchestratorBuilder {
    registry: AdapterRegistry,
    probe: Arc<dyn CapabilityProbe>,
    surface: Arc<PlaybackSurface>,
    plugins: Vec<Arc<dyn Plugin>>,
    drm: Option<DrmSessionController>,
    config: EngineConfig,
    logger: Arc<dyn Logger>,
}

impl OrchestratorBuilder {
    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn plugins(mut self, plugins: impl IntoIterator<Item = Arc<dyn Plugin>>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    pub fn drm(mut self, controller: DrmSessionController) -> Self {
        self.drm = Some(controller);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Validate the configuration, run plugin `setup` and `on_init`
    pub fn build(self) -> Result<PlaybackOrchestrator> {
        self.config.validate()?;

        let capabilities = self.probe.probe();
        let plugins = PluginManager::with_logger(self.plugins, self.logger.clone());
        let (phase_tx, _) = watch::channel(LoadPhase::Idle);
        let (actions_tx, _) = broadcast::channel(256);

        let shared = Arc::new(Shared {
            registry: self.registry,
            probe: self.probe,
            surface: self.surface,
            plugins,
            drm: self.drm,
            config: self.config,
            logger: RwLock::new(self.logger),
            inner: Mutex::new(Inner {
                generation: 0,
                cancel: CancellationToken::new(),
                adapter: None,
                drm_session: None,
                current_source: None,
                current_strategy: None,
                disposed: false,
            }),
            phase_tx,
            actions_tx,
            store: PlayerStore::default(),
        });

        shared.plugins.setup(&PluginContext {
            surface: shared.surface.clone(),
            capabilities,
        });
        shared.plugins.init(&InitEvent {
            capabilities,
            adapters: shared.registry.descriptors(),
        });
        info!(
            adapters = shared.registry.len(),
            plugins = shared.plugins.len(),
            drm = shared.drm.is_some(),
            "Orchestrator ready"
        );

        Ok(PlaybackOrchestrator { shared })
    }
}

/// Loads sources into one playback surface
///
/// Cloning yields another handle to the same orchestrator.
#[derive(Clone)]
pub struct PlaybackOrchestrator {
    shared: Arc<Shared>,
}

impl PlaybackOrchestrator {
    pub fn builder(
        registry: AdapterRegistry,
        probe: impl CapabilityProbe + 'static,
        surface: Arc<PlaybackSurface>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            registry,
            probe: Arc::new(probe),
            surface,
            plugins: Vec::new(),
            drm: None,
            config: EngineConfig::default(),
            logger: default_logger(),
        }
    }

    /// Load a request, superseding any load in flight
    ///
    /// Resolves exactly once: with the winning source, with the terminal
    /// error, or with `Error::Superseded` when a newer call took over.
    #[instrument(skip(self, request), fields(src = %request.src))]
    pub async fn load_source(&self, request: LoadRequest) -> Result<LoadOutcome> {
        request.validate()?;
        let (generation, cancel) = self.shared.begin()?;
        self.shared.run(generation, &cancel, &request).await
    }

    /// Source of the last successful load in the current generation
    pub fn current_source(&self) -> Option<String> {
        self.shared.inner.lock().current_source.clone()
    }

    /// Adapter id that loaded the current source
    pub fn current_strategy(&self) -> Option<String> {
        self.shared.inner.lock().current_strategy.clone()
    }

    pub fn generation(&self) -> LoadGeneration {
        self.shared.inner.lock().generation
    }

    pub fn phase(&self) -> LoadPhase {
        *self.shared.phase_tx.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<LoadPhase> {
        self.shared.phase_tx.subscribe()
    }

    /// Every state-changing action applied to the player store
    pub fn subscribe_actions(&self) -> broadcast::Receiver<PlayerAction> {
        self.shared.actions_tx.subscribe()
    }

    pub fn state(&self) -> Arc<PlayerState> {
        self.shared.store.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<Arc<PlayerState>> {
        self.shared.store.subscribe()
    }

    pub fn surface(&self) -> &Arc<PlaybackSurface> {
        &self.shared.surface
    }

    pub fn capabilities(&self) -> CapabilitySnapshot {
        self.shared.probe.probe()
    }

    pub fn quality_levels(&self) -> Vec<QualityLevel> {
        self.shared
            .current_adapter()
            .map(|adapter| adapter.quality_levels())
            .unwrap_or_default()
    }

    /// Select a quality level on the attached adapter
    pub fn set_quality(&self, id: &str) -> Result<()> {
        self.shared.ensure_live()?;
        match self.shared.current_adapter() {
            Some(adapter) => adapter.set_quality(id),
            None => Err(Error::InvalidQuality(id.to_string())),
        }
    }

    pub fn play(&self) -> Result<()> {
        self.shared.ensure_live()?;
        self.shared.surface.play();
        if self.shared.apply(PlayerAction::Play) {
            let current_time = self.shared.store.state().current_time;
            self.shared.plugins.play(&PlaybackEvent { current_time });
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.shared.ensure_live()?;
        self.shared.surface.pause();
        if self.shared.apply(PlayerAction::Pause) {
            let current_time = self.shared.store.state().current_time;
            self.shared.plugins.pause(&PlaybackEvent { current_time });
        }
        Ok(())
    }

    pub fn set_volume(&self, volume: f64) -> Result<()> {
        self.shared.ensure_live()?;
        self.shared.surface.set_volume(volume);
        self.shared.volume_changed();
        Ok(())
    }

    pub fn set_muted(&self, muted: bool) -> Result<()> {
        self.shared.ensure_live()?;
        self.shared.surface.set_muted(muted);
        self.shared.volume_changed();
        Ok(())
    }

    /// Feed a playback position report from the host. Ignored once disposed.
    pub fn report_time_update(&self, current_time: f64, duration: f64) {
        if self.shared.ensure_live().is_err() {
            return;
        }
        if self.shared.apply(PlayerAction::TimeUpdate {
            current_time,
            duration,
        }) {
            let state = self.shared.store.state();
            self.shared.plugins.time_update(&TimeUpdateEvent {
                current_time: state.current_time,
                duration: state.duration,
            });
        }
    }

    /// Replace the logger used here and by the plugin manager
    pub fn set_logger(&self, logger: Arc<dyn Logger>) {
        self.shared.plugins.set_logger(logger.clone());
        *self.shared.logger.write() = logger;
    }

    pub fn reset_logger(&self) {
        self.set_logger(default_logger());
    }

    /// Cancel in-flight work and release the surface. Idempotent.
    pub fn dispose(&self) {
        let (generation, adapter, session) = {
            let mut inner = self.shared.inner.lock();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            inner.cancel.cancel();
            inner.current_source = None;
            inner.current_strategy = None;
            (inner.generation, inner.adapter.take(), inner.drm_session.take())
        };

        if let Some(adapter) = adapter {
            adapter.destroy();
        }
        if let Some(session) = session {
            session.destroy();
        }
        self.shared.phase_tx.send_replace(LoadPhase::Idle);
        self.shared.plugins.dispose(&DisposeEvent { generation });
        self.shared.logger().info(LOG_SCOPE, "disposed");
    }
}

impl Shared {
    fn logger(&self) -> Arc<dyn Logger> {
        self.logger.read().clone()
    }

    fn current_adapter(&self) -> Option<Arc<dyn StreamingAdapter>> {
        self.inner.lock().adapter.clone()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.lock().disposed {
            return Err(Error::Disposed);
        }
        Ok(())
    }

    /// Mint a generation and cancel the previous one
    fn begin(&self) -> Result<(LoadGeneration, CancellationToken)> {
        let (generation, cancel, previous) = {
            let mut inner = self.inner.lock();
            if inner.disposed {
                return Err(Error::Disposed);
            }
            inner.cancel.cancel();
            inner.cancel = CancellationToken::new();
            inner.generation += 1;
            inner.current_source = None;
            inner.current_strategy = None;
            (inner.generation, inner.cancel.clone(), inner.adapter.take())
        };
        // The surface belongs to the new generation even if it never attaches
        if let Some(previous) = previous {
            previous.destroy();
        }
        debug!(generation, "Load generation started");
        self.apply(PlayerAction::LoadStart);
        Ok((generation, cancel))
    }

    /// Error to report when `generation` no longer owns the surface
    fn check(&self, generation: LoadGeneration) -> Result<()> {
        let inner = self.inner.lock();
        if inner.disposed {
            Err(Error::Disposed)
        } else if inner.generation != generation {
            Err(Error::Superseded)
        } else {
            Ok(())
        }
    }

    fn set_phase(&self, generation: LoadGeneration, phase: LoadPhase) -> Result<()> {
        let inner = self.inner.lock();
        if inner.disposed {
            return Err(Error::Disposed);
        }
        if inner.generation != generation {
            return Err(Error::Superseded);
        }
        let previous = *self.phase_tx.borrow();
        if !previous.can_transition_to(phase) {
            warn!(from = %previous, to = %phase, "Unexpected phase transition");
        }
        self.phase_tx.send_replace(phase);
        if phase.is_terminal() {
            info!(generation, phase = %phase, "Load generation settled");
        } else {
            debug!(generation, from = %previous, to = %phase, "Phase transition");
        }
        Ok(())
    }

    /// Reduce an action into the store. True when state changed.
    fn apply(&self, action: PlayerAction) -> bool {
        let changed = self.store.dispatch(&action);
        if changed {
            let _ = self.actions_tx.send(action);
        }
        changed
    }

    fn volume_changed(&self) {
        let volume = self.surface.volume();
        let muted = self.surface.muted();
        if self.apply(PlayerAction::VolumeChange { volume, muted }) {
            self.plugins.volume_change(&VolumeEvent { volume, muted });
        }
    }

    /// Terminal failure for the generation: phase, state, error hook
    fn fail(&self, generation: LoadGeneration, error: Error) -> Error {
        if let Err(stale) = self.set_phase(generation, LoadPhase::Failed) {
            return stale;
        }
        self.apply(PlayerAction::Error {
            message: error.to_string(),
        });
        self.logger().error(LOG_SCOPE, &format!("load failed: {}", error));
        self.plugins.error(&ErrorEvent {
            generation,
            error: error.clone(),
        });
        error
    }

    async fn run(
        self: &Arc<Self>,
        generation: LoadGeneration,
        cancel: &CancellationToken,
        request: &LoadRequest,
    ) -> Result<LoadOutcome> {
        let started = Instant::now();
        let key_system = match request.drm_enabled() {
            Some(drm) => {
                self.set_phase(generation, LoadPhase::ResolvingDrm)?;
                Some(self.negotiate_drm(generation, cancel, drm).await?)
            }
            None => None,
        };

        let candidates = request.candidates();
        let total = candidates.len();
        let mut failures = Vec::with_capacity(total);

        for (index, source) in candidates.iter().enumerate() {
            self.set_phase(generation, LoadPhase::ResolvingAdapter)?;
            let capabilities = self.probe.probe();
            self.plugins.source_load_start(&SourceLoadStart {
                generation,
                source: source.clone(),
                candidate_index: index,
                total_candidates: total,
                capabilities,
            });

            let error = match self.registry.resolve(source, &capabilities) {
                Some(descriptor) => {
                    let attempt = SourceAttempt {
                        generation,
                        cancel,
                        source,
                        index,
                        total,
                    };
                    match self.load_candidate(&attempt, descriptor).await {
                        Ok((strategy, attempts)) => {
                            let buffering_time = started.elapsed().as_secs_f64();
                            self.apply(PlayerAction::LoadEnd { buffering_time });
                            return Ok(LoadOutcome {
                                generation,
                                source: source.clone(),
                                strategy,
                                candidate_index: index,
                                attempts,
                                key_system,
                                loaded_at: Utc::now(),
                            });
                        }
                        Err(e @ (Error::Superseded | Error::Disposed)) => return Err(e),
                        Err(e) => e,
                    }
                }
                None => {
                    let error = Error::NoAdapterResolved {
                        source_url: source.clone(),
                    };
                    self.check(generation)?;
                    self.logger().warn(LOG_SCOPE, &error.to_string());
                    self.plugins.source_load_failed(&SourceLoadFailed {
                        generation,
                        source: source.clone(),
                        strategy: None,
                        attempt: 1,
                        max_attempts: 1,
                        candidate_index: index,
                        total_candidates: total,
                        error: error.clone(),
                        will_retry: false,
                    });
                    error
                }
            };

            failures.push(SourceFailure {
                source: source.clone(),
                error,
            });

            if let Some(next) = candidates.get(index + 1) {
                self.set_phase(generation, LoadPhase::FailingOver)?;
                info!(from = %source, to = %next, "Failing over");
                self.plugins.failover(&FailoverEvent {
                    generation,
                    from: source.clone(),
                    to: next.clone(),
                    candidate_index: index + 1,
                    total_candidates: total,
                });
            }
        }

        Err(self.fail(generation, Error::AllSourcesFailed { failures }))
    }

    /// Bind media keys for this generation. Returns the negotiated key system.
    async fn negotiate_drm(
        &self,
        generation: LoadGeneration,
        cancel: &CancellationToken,
        drm: &crate::types::DrmConfiguration,
    ) -> Result<String> {
        let previous = self.inner.lock().drm_session.take();
        if let Some(previous) = previous {
            previous.destroy();
        }

        let result = match &self.drm {
            Some(controller) => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.check(generation).err().unwrap_or(Error::Superseded)),
                result = controller.setup(drm, &self.surface) => result,
            },
            None => Err(Error::DrmUnsupported {
                tried: drm.key_systems(),
            }),
        };

        match result {
            Ok(session) => {
                let key_system = session.key_system().to_string();
                let stale = {
                    let mut inner = self.inner.lock();
                    if inner.disposed || inner.generation != generation {
                        Some(session)
                    } else {
                        inner.drm_session = Some(session);
                        None
                    }
                };
                if let Some(session) = stale {
                    // Only unbind keys this session still owns
                    if self.surface.media_keys().as_ref() == Some(session.media_keys()) {
                        session.destroy();
                    }
                    self.check(generation)?;
                }
                Ok(key_system)
            }
            Err(error) => {
                self.check(generation)?;
                warn!(error = %error, "DRM negotiation failed");
                Err(self.fail(generation, error))
            }
        }
    }

    /// Attach an adapter for one candidate and run its retry budget
    async fn load_candidate(
        self: &Arc<Self>,
        attempt: &SourceAttempt<'_>,
        descriptor: Arc<dyn AdapterDescriptor>,
    ) -> Result<(String, u32)> {
        let SourceAttempt {
            generation,
            cancel,
            source,
            index,
            total,
        } = *attempt;

        // Destroy before create: one adapter on the surface at a time
        let previous = self.inner.lock().adapter.take();
        if let Some(previous) = previous {
            previous.destroy();
        }
        let adapter = descriptor.create();
        {
            let mut inner = self.inner.lock();
            if inner.disposed {
                return Err(Error::Disposed);
            }
            if inner.generation != generation {
                return Err(Error::Superseded);
            }
            inner.adapter = Some(adapter.clone());
        }
        let strategy = adapter.id().to_string();
        let max_attempts = self.config.max_attempts();
        let mut attempt = 1;

        loop {
            self.set_phase(generation, LoadPhase::Loading)?;
            debug!(source, strategy = %strategy, attempt, "Loading");

            let context = LoadContext::new(self.surface.clone(), source)
                .with_cancel(cancel.clone())
                .with_quality_callback(quality_callback(
                    Arc::downgrade(self),
                    generation,
                    strategy.clone(),
                ));
            let result = adapter.load(context).await;
            self.check(generation)?;

            let error = match result {
                Ok(()) => {
                    {
                        let mut inner = self.inner.lock();
                        inner.current_source = Some(source.to_string());
                        inner.current_strategy = Some(strategy.clone());
                    }
                    info!(source, strategy = %strategy, attempt, "Source loaded");
                    self.plugins.source_loaded(&SourceLoaded {
                        generation,
                        source: source.to_string(),
                        strategy: strategy.clone(),
                        candidate_index: index,
                        total_candidates: total,
                        attempt,
                    });
                    self.set_phase(generation, LoadPhase::Succeeded)?;
                    return Ok((strategy, attempt));
                }
                Err(error) => error,
            };

            let will_retry = attempt < max_attempts && error.is_retryable();
            self.logger().warn(
                LOG_SCOPE,
                &format!(
                    "{} failed on attempt {}/{} with {}: {}",
                    source, attempt, max_attempts, strategy, error
                ),
            );
            self.plugins.source_load_failed(&SourceLoadFailed {
                generation,
                source: source.to_string(),
                strategy: Some(strategy.clone()),
                attempt,
                max_attempts,
                candidate_index: index,
                total_candidates: total,
                error: error.clone(),
                will_retry,
            });

            if !will_retry {
                adapter.destroy();
                let mut inner = self.inner.lock();
                if inner
                    .adapter
                    .as_ref()
                    .is_some_and(|current| Arc::ptr_eq(current, &adapter))
                {
                    inner.adapter = None;
                }
                return Err(error);
            }

            let delay = self.config.retry_delay();
            self.set_phase(generation, LoadPhase::Retrying)?;
            self.plugins.retry(&RetryEvent {
                generation,
                source: source.to_string(),
                strategy: strategy.clone(),
                attempt: attempt + 1,
                max_attempts,
                delay,
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.check(generation)?;
                    return Err(Error::Superseded);
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

/// Position of one candidate within a generation
#[derive(Clone, Copy)]
struct SourceAttempt<'a> {
    generation: LoadGeneration,
    cancel: &'a CancellationToken,
    source: &'a str,
    index: usize,
    total: usize,
}

/// Quality notifications for one generation; dropped once superseded
fn quality_callback(
    shared: Weak<Shared>,
    generation: LoadGeneration,
    strategy: String,
) -> QualityCallback {
    Arc::new(move |level: QualityLevel| {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        if shared.check(generation).is_err() {
            return;
        }
        if shared.apply(PlayerAction::QualityChange {
            label: level.label.clone(),
        }) {
            shared.plugins.quality_change(&QualityEvent {
                strategy: strategy.clone(),
                level,
            });
        }
    })
}
