//! Integration tests for Kino Engine

use async_trait::async_trait;
use kino_engine::drm::NoLicenseTransport;
use kino_engine::plugin::{
    ErrorEvent, FailoverEvent, HookResult, QualityEvent, RetryEvent, SourceLoadFailed,
    SourceLoadStart, SourceLoaded,
};
use kino_engine::{
    AdapterRegistry, CapabilitySnapshot, DrmConfiguration, DrmSessionController, EngineConfig,
    EngineEvent, EngineKind, EngineLevel, EngineProvider, EngineSettings, Error, FnDescriptor,
    KeySystemAccess, KeySystemConfig, KeySystemGrant, LicenseTransport, LoadPhase, LoadRequest,
    LogLevel, Logger, MediaKeys, PlaybackOrchestrator, PlaybackSurface, Plugin, Result,
    StaticProbe, StreamingAdapter, StreamingEngine, SurfaceCommand, SurfaceEvent,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_test::{assert_err, assert_ok};

// =============================================================================
// Fixtures
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("kino_engine=debug")
        .with_test_writer()
        .try_init();
}

/// Plays the host side of the surface: "broken" sources error out, "stall"
/// sources never answer, everything else decodes.
fn spawn_host(surface: Arc<PlaybackSurface>, mut commands: mpsc::UnboundedReceiver<SurfaceCommand>) {
    tokio::spawn(async move {
        let mut source: Option<String> = None;
        while let Some(command) = commands.recv().await {
            match command {
                SurfaceCommand::SetSource(src) => source = Some(src),
                SurfaceCommand::ClearSource => source = None,
                SurfaceCommand::Load => match source.as_deref() {
                    Some(src) if src.contains("broken") => surface.dispatch(SurfaceEvent::Error {
                        code: 2,
                        message: "MEDIA_ERR_NETWORK".into(),
                    }),
                    Some(src) if src.contains("stall") => {}
                    Some(_) => {
                        surface.dispatch(SurfaceEvent::LoadedData);
                        surface.dispatch(SurfaceEvent::CanPlay);
                    }
                    None => {}
                },
                _ => {}
            }
        }
    });
}

struct LiveEngine {
    events: broadcast::Sender<EngineEvent>,
    selected: Mutex<Option<usize>>,
}

impl StreamingEngine for LiveEngine {
    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn attach(&self, _surface: &Arc<PlaybackSurface>, _source: &str) -> Result<()> {
        let _ = self.events.send(EngineEvent::Ready);
        let _ = self.events.send(EngineEvent::LevelSwitched { level: 1 });
        Ok(())
    }

    fn levels(&self) -> Vec<EngineLevel> {
        vec![
            EngineLevel { index: 0, bitrate: 800_000, width: Some(640), height: Some(360) },
            EngineLevel { index: 1, bitrate: 2_500_000, width: Some(1280), height: Some(720) },
        ]
    }

    fn select_level(&self, level: Option<usize>) {
        *self.selected.lock() = level;
    }

    fn destroy(&self) {}
}

struct LiveProvider(EngineKind);

#[async_trait]
impl EngineProvider for LiveProvider {
    fn kind(&self) -> EngineKind {
        self.0
    }

    async fn instantiate(&self, _settings: &EngineSettings) -> Result<Arc<dyn StreamingEngine>> {
        let (events, _) = broadcast::channel(16);
        Ok(Arc::new(LiveEngine {
            events,
            selected: Mutex::new(None),
        }))
    }
}

fn default_registry(config: &EngineConfig) -> AdapterRegistry {
    AdapterRegistry::with_defaults(
        Arc::new(LiveProvider(EngineKind::Hls)),
        Arc::new(LiveProvider(EngineKind::Dash)),
        config,
    )
}

#[derive(Default)]
struct Recorder {
    hooks: Mutex<Vec<String>>,
}

impl Recorder {
    fn hooks(&self) -> Vec<String> {
        self.hooks.lock().clone()
    }

    fn matching(&self, prefixes: &[&str]) -> Vec<String> {
        self.hooks()
            .into_iter()
            .filter(|h| prefixes.iter().any(|p| h.starts_with(p)))
            .collect()
    }

    fn push(&self, hook: String) -> HookResult {
        self.hooks.lock().push(hook);
        Ok(())
    }
}

impl Plugin for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn on_source_load_start(&self, event: &SourceLoadStart) -> HookResult {
        self.push(format!("start:{}", event.source))
    }

    fn on_source_loaded(&self, event: &SourceLoaded) -> HookResult {
        self.push(format!("loaded:{}:{}", event.source, event.strategy))
    }

    fn on_source_load_failed(&self, event: &SourceLoadFailed) -> HookResult {
        self.push(format!("failed:{}", event.source))
    }

    fn on_retry(&self, event: &RetryEvent) -> HookResult {
        self.push(format!("retry:{}:{}", event.source, event.attempt))
    }

    fn on_failover(&self, event: &FailoverEvent) -> HookResult {
        self.push(format!("failover:{}->{}", event.from, event.to))
    }

    fn on_quality_change(&self, event: &QualityEvent) -> HookResult {
        self.push(format!("quality:{}", event.level.label))
    }

    fn on_error(&self, event: &ErrorEvent) -> HookResult {
        self.push(format!("error:{}", event.error.error_code()))
    }
}

struct Exploding;

impl Plugin for Exploding {
    fn name(&self) -> &str {
        "exploding"
    }

    fn on_source_load_start(&self, _event: &SourceLoadStart) -> HookResult {
        anyhow::bail!("analytics endpoint unreachable")
    }
}

#[derive(Default)]
struct RecordingLogger {
    entries: Mutex<Vec<(LogLevel, String)>>,
}

impl Logger for RecordingLogger {
    fn log(&self, level: LogLevel, scope: &str, _message: &str) {
        self.entries.lock().push((level, scope.to_string()));
    }
}

impl RecordingLogger {
    fn warnings_from(&self, scope: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|(level, s)| *level == LogLevel::Warn && s == scope)
            .count()
    }
}

struct Grant(String);

#[async_trait]
impl KeySystemGrant for Grant {
    fn key_system(&self) -> &str {
        &self.0
    }

    async fn create_media_keys(
        &self,
        config: &KeySystemConfig,
        _transport: Arc<dyn LicenseTransport>,
    ) -> anyhow::Result<MediaKeys> {
        Ok(MediaKeys::new(config.key_system.clone()))
    }
}

struct Environment {
    granted: Vec<&'static str>,
}

#[async_trait]
impl KeySystemAccess for Environment {
    async fn request_access(
        &self,
        config: &KeySystemConfig,
    ) -> anyhow::Result<Arc<dyn KeySystemGrant>> {
        if self.granted.contains(&config.key_system.as_str()) {
            Ok(Arc::new(Grant(config.key_system.clone())))
        } else {
            anyhow::bail!("NotSupportedError: {}", config.key_system)
        }
    }
}

fn drm_controller(granted: Vec<&'static str>) -> DrmSessionController {
    DrmSessionController::new(Arc::new(Environment { granted }))
        .with_transport(Arc::new(NoLicenseTransport))
}

struct Harness {
    orchestrator: PlaybackOrchestrator,
    recorder: Arc<Recorder>,
    surface: Arc<PlaybackSurface>,
}

fn harness(config: EngineConfig) -> Harness {
    let registry = default_registry(&config);
    harness_with(config, registry, None)
}

fn harness_with(
    config: EngineConfig,
    registry: AdapterRegistry,
    drm: Option<DrmSessionController>,
) -> Harness {
    init_tracing();
    let (surface, commands) = PlaybackSurface::new();
    spawn_host(surface.clone(), commands);
    let recorder = Arc::new(Recorder::default());

    let mut builder = PlaybackOrchestrator::builder(
        registry,
        StaticProbe(CapabilitySnapshot::desktop()),
        surface.clone(),
    )
    .config(config)
    .plugin(recorder.clone());
    if let Some(drm) = drm {
        builder = builder.drm(drm);
    }

    Harness {
        orchestrator: builder.build().unwrap(),
        recorder,
        surface,
    }
}

fn no_retries() -> EngineConfig {
    EngineConfig::default().with_retries(0, Duration::ZERO)
}

// =============================================================================
// Failover Tests
// =============================================================================

#[tokio::test]
async fn test_fallback_after_primary_failure() {
    let h = harness(no_retries());

    let outcome = h
        .orchestrator
        .load_source(LoadRequest::new("https://cdn.example.com/broken.mp4").with_fallback("https://cdn.example.com/good.mp4"))
        .await
        .unwrap();

    assert_eq!(outcome.source, "https://cdn.example.com/good.mp4");
    assert_eq!(outcome.candidate_index, 1);
    assert_eq!(h.orchestrator.current_source().as_deref(), Some("https://cdn.example.com/good.mp4"));
    assert_eq!(h.orchestrator.current_strategy().as_deref(), Some("direct"));
    assert_eq!(
        h.recorder.matching(&["start", "failed", "loaded"]),
        vec![
            "start:https://cdn.example.com/broken.mp4",
            "failed:https://cdn.example.com/broken.mp4",
            "start:https://cdn.example.com/good.mp4",
            "loaded:https://cdn.example.com/good.mp4:direct",
        ]
    );
    assert_eq!(h.recorder.matching(&["failover"]).len(), 1);
    assert!(h.recorder.matching(&["error"]).is_empty());
    assert_eq!(h.orchestrator.phase(), LoadPhase::Succeeded);
}

#[tokio::test]
async fn test_all_sources_failed_aggregates_in_order() {
    let h = harness(no_retries());

    let err = h
        .orchestrator
        .load_source(LoadRequest::new("broken-1.mp4").with_fallback("broken-2.mp4"))
        .await
        .unwrap_err();

    let sources: Vec<_> = err.failures().iter().map(|f| f.source.as_str()).collect();
    assert_eq!(sources, vec!["broken-1.mp4", "broken-2.mp4"]);
    assert_eq!(err.error_code(), "ALL_SOURCES_FAILED");
    assert_eq!(h.recorder.matching(&["failed"]).len(), 2);
    assert_eq!(h.recorder.matching(&["error"]), vec!["error:ALL_SOURCES_FAILED"]);
    assert_eq!(h.orchestrator.phase(), LoadPhase::Failed);
    assert!(h.orchestrator.current_source().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhaust_before_failover() {
    let h = harness(EngineConfig::default().with_retries(1, Duration::from_millis(250)));

    h.orchestrator
        .load_source(LoadRequest::new("broken.mp4").with_fallback("good.mp4"))
        .await
        .unwrap();

    assert_eq!(
        h.recorder.hooks(),
        vec![
            "start:broken.mp4",
            "failed:broken.mp4",
            "retry:broken.mp4:2",
            "failed:broken.mp4",
            "failover:broken.mp4->good.mp4",
            "start:good.mp4",
            "loaded:good.mp4:direct",
        ]
    );
}

#[tokio::test]
async fn test_unresolvable_source_skips_retries() {
    let h = harness(EngineConfig::default().with_retries(2, Duration::from_millis(1)));

    let outcome = h
        .orchestrator
        .load_source(LoadRequest::new("movie.avi").with_fallback("movie.mp4"))
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 1);
    assert!(h.recorder.matching(&["retry"]).is_empty());
    assert_eq!(h.recorder.matching(&["failed"]), vec!["failed:movie.avi"]);
}

#[tokio::test]
async fn test_load_request_json_drives_failover() {
    let h = harness(no_retries());
    let request = LoadRequest::from_json(
        r#"{"src": "broken.mp4", "fallbackSources": ["good.webm"]}"#,
    )
    .unwrap();

    let outcome = h.orchestrator.load_source(request).await.unwrap();
    assert_eq!(outcome.source, "good.webm");
}

// =============================================================================
// Adaptive Engine Tests
// =============================================================================

#[tokio::test]
async fn test_hls_engine_levels_reach_state_and_plugins() {
    let h = harness(no_retries());
    let mut state = h.orchestrator.subscribe_state();

    let outcome = h
        .orchestrator
        .load_source(LoadRequest::new("https://cdn.example.com/live/master.m3u8"))
        .await
        .unwrap();
    assert_eq!(outcome.strategy, "hls");

    tokio::time::timeout(Duration::from_secs(1), state.wait_for(|s| s.quality == "720p"))
        .await
        .unwrap()
        .unwrap();

    let labels: Vec<_> = h.orchestrator.quality_levels().into_iter().map(|l| l.label).collect();
    assert_eq!(labels, vec!["360p", "720p"]);
    assert!(h.orchestrator.set_quality("0").is_ok());
    assert!(h.orchestrator.set_quality("auto").is_ok());
    assert!(matches!(h.orchestrator.set_quality("7"), Err(Error::InvalidQuality(_))));
    assert!(h.recorder.hooks().contains(&"quality:720p".to_string()));
}

// =============================================================================
// DRM Tests
// =============================================================================

fn counting_registry(created: Arc<AtomicUsize>) -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry.register(FnDescriptor::new("direct", 10, |_, _| true, move || {
        created.fetch_add(1, Ordering::SeqCst);
        Arc::new(kino_engine::adapter::DirectAdapter::new()) as Arc<dyn StreamingAdapter>
    }));
    registry
}

#[tokio::test]
async fn test_drm_rejection_prevents_adapter_attempts() {
    let created = Arc::new(AtomicUsize::new(0));
    let h = harness_with(
        no_retries(),
        counting_registry(created.clone()),
        Some(drm_controller(vec![])),
    );

    let request = LoadRequest::new("good.mp4")
        .with_fallback("good.webm")
        .with_drm(DrmConfiguration::widevine("https://license.example.com/widevine"));
    let err = h.orchestrator.load_source(request).await.unwrap_err();

    assert!(matches!(err, Error::DrmUnsupported { .. }));
    assert_eq!(created.load(Ordering::SeqCst), 0);
    assert!(h.surface.media_keys().is_none());
    assert!(h.recorder.matching(&["start"]).is_empty());
    assert_eq!(h.recorder.matching(&["error"]), vec!["error:DRM_UNSUPPORTED"]);
    assert_eq!(h.orchestrator.phase(), LoadPhase::Failed);
}

#[tokio::test]
async fn test_drm_session_bound_then_released_on_dispose() {
    let created = Arc::new(AtomicUsize::new(0));
    let h = harness_with(
        no_retries(),
        counting_registry(created.clone()),
        Some(drm_controller(vec!["com.microsoft.playready"])),
    );

    let request = LoadRequest::new("good.mp4").with_drm(DrmConfiguration::new(vec![
        KeySystemConfig::new("com.widevine.alpha", "https://license.example.com/wv"),
        KeySystemConfig::new("com.microsoft.playready", "https://license.example.com/pr"),
    ]));
    let outcome = h.orchestrator.load_source(request).await.unwrap();

    assert_eq!(outcome.key_system.as_deref(), Some("com.microsoft.playready"));
    assert_eq!(
        h.surface.media_keys().map(|k| k.key_system).as_deref(),
        Some("com.microsoft.playready")
    );
    assert_eq!(created.load(Ordering::SeqCst), 1);

    h.orchestrator.dispose();
    assert!(h.surface.media_keys().is_none());
    assert!(h.surface.source().is_none());
}

#[tokio::test]
async fn test_drm_enabled_without_controller_is_unsupported() {
    let h = harness(no_retries());
    let request = LoadRequest::new("good.mp4")
        .with_drm(DrmConfiguration::widevine("https://license.example.com/wv"));

    let err = h.orchestrator.load_source(request).await.unwrap_err();
    assert!(err.is_drm());
    assert!(h.recorder.matching(&["start"]).is_empty());
}

// =============================================================================
// Supersession Tests
// =============================================================================

#[tokio::test]
async fn test_newer_load_supersedes_pending_one() {
    let h = harness(no_retries());
    let mut phase = h.orchestrator.subscribe_phase();

    let first = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        async move { orchestrator.load_source(LoadRequest::new("stall.mp4")).await }
    });
    phase.wait_for(|p| *p == LoadPhase::Loading).await.unwrap();

    let outcome = assert_ok!(h.orchestrator.load_source(LoadRequest::new("good.mp4")).await);
    let err = assert_err!(first.await.unwrap());

    assert!(matches!(err, Error::Superseded));
    assert!(err.is_expected());
    assert_eq!(outcome.generation, 2);
    assert_eq!(h.orchestrator.generation(), 2);
    assert_eq!(h.orchestrator.current_source().as_deref(), Some("good.mp4"));
    assert_eq!(h.surface.source().as_deref(), Some("good.mp4"));
    assert_eq!(
        h.recorder.hooks(),
        vec!["start:stall.mp4", "start:good.mp4", "loaded:good.mp4:direct"]
    );
}

#[tokio::test]
async fn test_dispose_resolves_pending_load() {
    let h = harness(no_retries());
    let mut phase = h.orchestrator.subscribe_phase();

    let pending = tokio::spawn({
        let orchestrator = h.orchestrator.clone();
        async move { orchestrator.load_source(LoadRequest::new("stall.mp4")).await }
    });
    phase.wait_for(|p| *p == LoadPhase::Loading).await.unwrap();

    h.orchestrator.dispose();
    let err = assert_err!(pending.await.unwrap());
    assert!(matches!(err, Error::Disposed));
    assert!(h.recorder.matching(&["error"]).is_empty());
}

#[tokio::test]
async fn test_rejected_drm_releases_previous_adapter() {
    let h = harness_with(
        no_retries(),
        default_registry(&EngineConfig::default()),
        Some(drm_controller(vec![])),
    );
    assert_ok!(h.orchestrator.load_source(LoadRequest::new("good.mp4")).await);
    assert_eq!(h.surface.source().as_deref(), Some("good.mp4"));

    let request = LoadRequest::new("other.mp4")
        .with_drm(DrmConfiguration::widevine("https://license.example.com/widevine"));
    let err = assert_err!(h.orchestrator.load_source(request).await);

    assert!(matches!(err, Error::DrmUnsupported { .. }));
    assert!(h.surface.source().is_none());
    assert!(h.orchestrator.current_source().is_none());
    assert!(h.orchestrator.current_strategy().is_none());
    assert!(matches!(h.orchestrator.set_quality("auto"), Err(Error::InvalidQuality(_))));
}

#[tokio::test]
async fn test_unresolvable_load_releases_previous_adapter() {
    let h = harness(no_retries());
    let outcome = assert_ok!(
        h.orchestrator
            .load_source(LoadRequest::new("https://cdn.example.com/live/master.m3u8"))
            .await
    );
    assert_eq!(outcome.strategy, "hls");
    assert_eq!(h.orchestrator.quality_levels().len(), 2);

    let err = assert_err!(h.orchestrator.load_source(LoadRequest::new("movie.avi")).await);

    assert!(matches!(err, Error::AllSourcesFailed { .. }));
    assert!(h.orchestrator.quality_levels().is_empty());
    assert!(matches!(h.orchestrator.set_quality("0"), Err(Error::InvalidQuality(_))));
    assert_eq!(h.orchestrator.phase(), LoadPhase::Failed);
}

// =============================================================================
// Plugin Isolation Tests
// =============================================================================

#[tokio::test]
async fn test_failing_plugin_does_not_block_load() {
    let (surface, commands) = PlaybackSurface::new();
    spawn_host(surface.clone(), commands);
    let logger = Arc::new(RecordingLogger::default());
    let recorder = Arc::new(Recorder::default());

    let orchestrator = PlaybackOrchestrator::builder(
        default_registry(&EngineConfig::default()),
        StaticProbe(CapabilitySnapshot::desktop()),
        surface,
    )
    .config(no_retries())
    .logger(logger.clone())
    .plugin(Arc::new(Exploding))
    .plugin(recorder.clone())
    .build()
    .unwrap();

    orchestrator.load_source(LoadRequest::new("good.mp4")).await.unwrap();

    assert_eq!(logger.warnings_from("exploding"), 1);
    assert_eq!(recorder.matching(&["start"]), vec!["start:good.mp4"]);
    assert_eq!(recorder.matching(&["loaded"]).len(), 1);
}

#[tokio::test]
async fn test_logger_reset_restores_default() {
    let (surface, commands) = PlaybackSurface::new();
    spawn_host(surface.clone(), commands);
    let logger = Arc::new(RecordingLogger::default());

    let orchestrator = PlaybackOrchestrator::builder(
        default_registry(&EngineConfig::default()),
        StaticProbe(CapabilitySnapshot::desktop()),
        surface,
    )
    .config(no_retries())
    .plugin(Arc::new(Exploding))
    .build()
    .unwrap();

    orchestrator.set_logger(logger.clone());
    orchestrator.load_source(LoadRequest::new("good.mp4")).await.unwrap();
    assert_eq!(logger.warnings_from("exploding"), 1);

    orchestrator.reset_logger();
    orchestrator.load_source(LoadRequest::new("good.mp4")).await.unwrap();
    assert_eq!(logger.warnings_from("exploding"), 1);
}

// =============================================================================
// Player State Tests
// =============================================================================

#[tokio::test]
async fn test_playback_controls_update_state() {
    let h = harness(no_retries());
    h.orchestrator.load_source(LoadRequest::new("good.mp4")).await.unwrap();
    assert!(!h.orchestrator.state().loading);

    assert_ok!(h.orchestrator.play());
    h.orchestrator.report_time_update(30.0, 600.0);
    assert_ok!(h.orchestrator.set_muted(true));
    assert_ok!(h.orchestrator.pause());

    let state = h.orchestrator.state();
    assert_eq!(state.play_count, 1);
    assert!(state.muted);
    assert!(state.paused);
    assert!((state.total_watch_time - 30.0).abs() < 1e-9);
    assert!(h.surface.paused());
    assert!(h.surface.muted());
}
