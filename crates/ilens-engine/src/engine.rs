//! The scanning engine.
//!
//! One `ScanEngine` drives one camera feed. `start` spawns the backend
//! loops for the configured pipeline mode, `submit_frame` hands them the
//! latest frame, and `stop` winds everything down and freezes the
//! session. All backends funnel into the shared [`Reconciler`]; the
//! caller observes progress through watch channels and a broadcast
//! event stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ilens_media::crop_to_jpeg;
use ilens_models::{ClassLabel, ClassObservation, Detection, DetectionId, Frame, ScanSession, SessionId};
use ilens_vision::{FrameClassifier, GeminiVision, ObjectDetector};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::enrichment::{EnrichmentHandle, EnrichmentJob, EnrichmentQueue};
use crate::error::{EngineError, EngineResult};
use crate::metrics;
use crate::pipeline::{PipelineMode, PipelineState};
use crate::reconciler::{IngestOutcome, Reconciler};
use crate::session::SessionAggregator;
use crate::sink::{NullSink, SessionSink};

const ENRICHMENT_CROP_QUALITY: u8 = 80;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Which backend produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Cloud,
    LocalDetector,
    Classifier,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Cloud => "cloud",
            Backend::LocalDetector => "local_detector",
            Backend::Classifier => "classifier",
        }
    }
}

/// Live notifications emitted while a session runs.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A new canonical detection entered the list.
    DetectionAdded {
        id: DetectionId,
        name: String,
        backend: Backend,
    },
    /// The first detection of the session, with time since start.
    FirstDetection { elapsed: Duration },
    /// A hands-off mode completed its first cloud response; interim
    /// backends are gated off from here on.
    CloudHandoff,
    /// The session was stopped and frozen.
    SessionFinished {
        session_id: SessionId,
        item_count: usize,
    },
}

/// Configures and validates a [`ScanEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    cloud: Option<Arc<GeminiVision>>,
    detector: Option<Arc<dyn ObjectDetector>>,
    classifier: Option<Arc<dyn FrameClassifier>>,
    sink: Arc<dyn SessionSink>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            cloud: None,
            detector: None,
            classifier: None,
            sink: Arc::new(NullSink),
        }
    }

    pub fn with_cloud(mut self, cloud: Arc<GeminiVision>) -> Self {
        self.cloud = Some(cloud);
        self
    }

    pub fn with_detector(mut self, detector: Arc<dyn ObjectDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn FrameClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn SessionSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Build the engine.
    ///
    /// The cloud client is mandatory in every mode. A mode that wants an
    /// interim backend which is not configured degrades to cloud-only
    /// with a warning instead of failing.
    pub fn build(self) -> EngineResult<ScanEngine> {
        let cloud = self.cloud.ok_or_else(|| {
            EngineError::backend_unavailable("no cloud identification client configured")
        })?;

        let mut config = self.config;
        if config.mode.uses_local_detector() && self.detector.is_none() {
            warn!(
                "Mode '{}' needs an object detector but none is configured, falling back to cloud_only",
                config.mode.as_str()
            );
            config.mode = PipelineMode::CloudOnly;
        }
        if config.mode.uses_classifier() && self.classifier.is_none() {
            warn!(
                "Mode '{}' needs a frame classifier but none is configured, falling back to cloud_only",
                config.mode.as_str()
            );
            config.mode = PipelineMode::CloudOnly;
        }

        let (frame_tx, _) = watch::channel(None);
        let (analyzing_tx, _) = watch::channel(false);
        let (count_tx, _) = watch::channel(0usize);
        let (events_tx, _) = broadcast::channel(64);

        Ok(ScanEngine {
            reconciler: Arc::new(Mutex::new(Reconciler::new(config.clone()))),
            config,
            cloud,
            detector: self.detector,
            classifier: self.classifier,
            sink: self.sink,
            frame_tx,
            analyzing_tx,
            count_tx: Arc::new(count_tx),
            events_tx,
            running: Mutex::new(None),
        })
    }
}

/// State owned by one started session.
struct RunningSession {
    shutdown: watch::Sender<bool>,
    aggregator: Arc<std::sync::Mutex<SessionAggregator>>,
    enrichment: Option<EnrichmentQueue>,
    tasks: Vec<JoinHandle<()>>,
}

/// Camera-to-inventory scanning engine.
pub struct ScanEngine {
    config: EngineConfig,
    cloud: Arc<GeminiVision>,
    detector: Option<Arc<dyn ObjectDetector>>,
    classifier: Option<Arc<dyn FrameClassifier>>,
    sink: Arc<dyn SessionSink>,
    reconciler: Arc<Mutex<Reconciler>>,
    frame_tx: watch::Sender<Option<Arc<Frame>>>,
    analyzing_tx: watch::Sender<bool>,
    count_tx: Arc<watch::Sender<usize>>,
    events_tx: broadcast::Sender<EngineEvent>,
    running: Mutex<Option<RunningSession>>,
}

impl ScanEngine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// The effective pipeline mode, after any build-time degrade.
    pub fn mode(&self) -> PipelineMode {
        self.config.mode
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events_tx.subscribe()
    }

    /// True from `start` until `stop`.
    pub fn watch_analyzing(&self) -> watch::Receiver<bool> {
        self.analyzing_tx.subscribe()
    }

    /// Canonical list size, updated after every ingest.
    pub fn watch_item_count(&self) -> watch::Receiver<usize> {
        self.count_tx.subscribe()
    }

    /// Snapshot of the canonical detections, oldest first.
    pub async fn detections(&self) -> Vec<Detection> {
        self.reconciler.lock().await.detections()
    }

    /// Offer the latest camera frame. Cheap; the loops pick the newest
    /// one up at their own pace and frames in between are dropped.
    pub fn submit_frame(&self, frame: Frame) {
        self.frame_tx.send_replace(Some(Arc::new(frame)));
    }

    /// Begin a scanning session.
    pub async fn start(&self) -> EngineResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        self.reconciler.lock().await.reset();
        self.frame_tx.send_replace(None);
        self.count_tx.send_replace(0);
        self.analyzing_tx.send_replace(true);

        let pipeline = Arc::new(std::sync::Mutex::new(PipelineState::new(self.config.mode)));
        let aggregator = Arc::new(std::sync::Mutex::new(SessionAggregator::start()));
        let session_id = aggregator
            .lock()
            .map(|agg| agg.session_id().clone())
            .map_err(|_| EngineError::internal("session aggregator lock poisoned"))?;

        let enrichment = if self.config.enrichment_enabled {
            Some(EnrichmentQueue::spawn(
                Arc::clone(&self.cloud),
                Arc::clone(&self.reconciler),
                self.config.enrichment_gap,
            ))
        } else {
            None
        };

        let (shutdown, _) = watch::channel(false);
        let shared = LoopShared {
            config: self.config.clone(),
            reconciler: Arc::clone(&self.reconciler),
            pipeline: Arc::clone(&pipeline),
            aggregator: Arc::clone(&aggregator),
            events: self.events_tx.clone(),
            count_tx: Arc::clone(&self.count_tx),
            enrichment: enrichment.as_ref().map(|q| q.handle()),
            started_at: Instant::now(),
            first_emitted: Arc::new(AtomicBool::new(false)),
        };

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(cloud_loop(
            Arc::clone(&self.cloud),
            self.frame_tx.subscribe(),
            shutdown.subscribe(),
            shared.clone(),
        )));

        if self.config.mode.uses_local_detector() {
            if let Some(detector) = &self.detector {
                tasks.push(tokio::spawn(local_loop(
                    LocalBackend::Detector(Arc::clone(detector)),
                    self.frame_tx.subscribe(),
                    shutdown.subscribe(),
                    shared.clone(),
                )));
            }
        } else if self.config.mode.uses_classifier() {
            if let Some(classifier) = &self.classifier {
                tasks.push(tokio::spawn(local_loop(
                    LocalBackend::Classifier(Arc::clone(classifier)),
                    self.frame_tx.subscribe(),
                    shutdown.subscribe(),
                    shared.clone(),
                )));
            }
        }

        info!(
            "Engine started in {} mode, session {}",
            self.config.mode.as_str(),
            session_id
        );

        *running = Some(RunningSession {
            shutdown,
            aggregator,
            enrichment,
            tasks,
        });
        Ok(())
    }

    /// Stop the session: wind the loops down, cancel enrichment, run the
    /// final sweep and deliver the frozen session to the sink.
    ///
    /// A sink failure is logged, not returned; the caller still gets
    /// the session.
    pub async fn stop(&self) -> EngineResult<ScanSession> {
        let mut running = self.running.lock().await;
        let Some(session) = running.take() else {
            return Err(EngineError::NotRunning);
        };

        let _ = session.shutdown.send(true);

        if let Some(queue) = session.enrichment {
            if tokio::time::timeout(SHUTDOWN_GRACE, queue.shutdown())
                .await
                .is_err()
            {
                warn!("Enrichment worker did not stop within grace period");
            }
        }
        for task in session.tasks {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!("Backend loop did not stop within grace period");
            }
        }

        let canonical = self.reconciler.lock().await.detections();
        let record = session
            .aggregator
            .lock()
            .map(|mut agg| agg.finish(&canonical))
            .map_err(|_| EngineError::internal("session aggregator lock poisoned"))?;

        self.analyzing_tx.send_replace(false);
        metrics::record_session_items(record.item_count() as f64);
        let _ = self.events_tx.send(EngineEvent::SessionFinished {
            session_id: record.id.clone(),
            item_count: record.item_count(),
        });
        info!(
            "Session {} finished with {} items",
            record.id,
            record.item_count()
        );

        if let Err(e) = self.sink.deliver(&record, &canonical).await {
            error!("Failed to deliver session {}: {}", record.id, e);
        }

        Ok(record)
    }
}

/// Everything a backend loop needs, cheap to clone per task.
#[derive(Clone)]
struct LoopShared {
    config: EngineConfig,
    reconciler: Arc<Mutex<Reconciler>>,
    pipeline: Arc<std::sync::Mutex<PipelineState>>,
    aggregator: Arc<std::sync::Mutex<SessionAggregator>>,
    events: broadcast::Sender<EngineEvent>,
    count_tx: Arc<watch::Sender<usize>>,
    enrichment: Option<EnrichmentHandle>,
    started_at: Instant,
    first_emitted: Arc<AtomicBool>,
}

impl LoopShared {
    /// Push one ingest outcome to the session, events and metrics.
    fn publish(&self, outcome: IngestOutcome, backend: Backend) {
        metrics::record_evictions(outcome.evicted as u64);
        self.count_tx.send_replace(outcome.total);

        for detection in outcome.created {
            let newly_recorded = self
                .aggregator
                .lock()
                .map(|mut agg| agg.on_new_detection(&detection.id))
                .unwrap_or(false);
            if !newly_recorded {
                continue;
            }

            metrics::record_detection(backend.as_str());
            info!("Detected '{}' via {}", detection.name, backend.as_str());
            let _ = self.events.send(EngineEvent::DetectionAdded {
                id: detection.id.clone(),
                name: detection.name.clone(),
                backend,
            });

            if !self.first_emitted.swap(true, Ordering::SeqCst) {
                let elapsed = self.started_at.elapsed();
                metrics::record_first_detection(elapsed.as_secs_f64());
                info!("First detection after {} ms", elapsed.as_millis());
                let _ = self.events.send(EngineEvent::FirstDetection { elapsed });
            }

            self.enqueue_enrichment(&detection);
        }
    }

    fn enqueue_enrichment(&self, detection: &Detection) {
        let Some(handle) = &self.enrichment else {
            return;
        };
        let Some(frame) = detection.frame.clone() else {
            return;
        };

        // Interim detections carry a usable crop box; cloud items get
        // the whole frame so the model keeps its context.
        let job = match (&detection.local_class, detection.primary_box()) {
            (Some(label), Some(lbox)) => {
                match crop_to_jpeg(&frame, &lbox.rect, ENRICHMENT_CROP_QUALITY) {
                    Ok(jpeg) => EnrichmentJob::Crop {
                        id: detection.id.clone(),
                        jpeg,
                        label: label.clone(),
                    },
                    Err(e) => {
                        debug!(
                            "Crop for '{}' failed ({}), enriching from the whole frame",
                            detection.name, e
                        );
                        EnrichmentJob::WholeItem {
                            id: detection.id.clone(),
                            frame,
                            name: detection.name.clone(),
                        }
                    }
                }
            }
            _ => EnrichmentJob::WholeItem {
                id: detection.id.clone(),
                frame,
                name: detection.name.clone(),
            },
        };
        handle.enqueue(job);
    }

    fn interim_allowed(&self) -> bool {
        self.pipeline
            .lock()
            .map(|p| p.interim_results_allowed())
            .unwrap_or(false)
    }
}

async fn cloud_loop(
    cloud: Arc<GeminiVision>,
    mut frames: watch::Receiver<Option<Arc<Frame>>>,
    mut shutdown: watch::Receiver<bool>,
    shared: LoopShared,
) {
    let mut interval = tokio::time::interval(shared.config.cloud_attempt_interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {
                let frame = frames.borrow_and_update().clone();
                let Some(frame) = frame else { continue; };

                // Race the call against shutdown so stop() never waits
                // out a full request timeout.
                let result = tokio::select! {
                    _ = shutdown.changed() => break,
                    result = cloud.analyze(&frame) => result,
                };
                match result {
                    // Throttled or already in flight, no request was made.
                    Ok(None) => {}
                    Ok(Some(items)) => {
                        metrics::record_cloud_request("ok");
                        let handoff = shared
                            .pipeline
                            .lock()
                            .map(|mut p| p.on_cloud_response())
                            .unwrap_or(false);
                        if handoff {
                            info!("First cloud response received, interim backend handed off");
                            let _ = shared.events.send(EngineEvent::CloudHandoff);
                        }
                        let outcome = shared
                            .reconciler
                            .lock()
                            .await
                            .ingest_cloud(items, &frame, Instant::now());
                        shared.publish(outcome, Backend::Cloud);
                    }
                    Err(e) => {
                        let label = if e.is_rate_limited() { "rate_limited" } else { "error" };
                        metrics::record_cloud_request(label);
                        warn!("Cloud identification failed: {}", e);
                    }
                }
            }
        }
    }
    debug!("Cloud loop stopped");
}

enum LocalBackend {
    Detector(Arc<dyn ObjectDetector>),
    Classifier(Arc<dyn FrameClassifier>),
}

enum LocalOutput {
    Observations(Vec<ClassObservation>),
    Labels(Vec<ClassLabel>),
}

impl LocalBackend {
    fn kind(&self) -> Backend {
        match self {
            LocalBackend::Detector(_) => Backend::LocalDetector,
            LocalBackend::Classifier(_) => Backend::Classifier,
        }
    }

    fn name(&self) -> String {
        match self {
            LocalBackend::Detector(d) => d.name().to_string(),
            LocalBackend::Classifier(c) => c.name().to_string(),
        }
    }
}

async fn local_loop(
    backend: LocalBackend,
    mut frames: watch::Receiver<Option<Arc<Frame>>>,
    mut shutdown: watch::Receiver<bool>,
    shared: LoopShared,
) {
    let min_interval = shared.config.local_min_interval;
    let mut last_run: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
                let frame = frames.borrow_and_update().clone();
                let Some(frame) = frame else { continue; };

                if !shared.interim_allowed() {
                    if shared.config.mode.hands_off() {
                        debug!("Interim backend '{}' gated off", backend.name());
                        break;
                    }
                    continue;
                }
                if let Some(last) = last_run {
                    if last.elapsed() < min_interval {
                        continue;
                    }
                }
                last_run = Some(Instant::now());

                // Model inference is CPU-bound, keep it off the runtime.
                let joined = match &backend {
                    LocalBackend::Detector(d) => {
                        let d = Arc::clone(d);
                        let f = Arc::clone(&frame);
                        tokio::task::spawn_blocking(move || {
                            d.detect(&f).map(LocalOutput::Observations)
                        })
                        .await
                    }
                    LocalBackend::Classifier(c) => {
                        let c = Arc::clone(c);
                        let f = Arc::clone(&frame);
                        tokio::task::spawn_blocking(move || {
                            c.classify(&f).map(LocalOutput::Labels)
                        })
                        .await
                    }
                };
                let result = match joined {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("Local inference task panicked: {}", e);
                        continue;
                    }
                };

                match result {
                    Ok(output) => {
                        // The handoff may have fired while inference ran;
                        // late results are discarded at the gate.
                        if !shared.interim_allowed() {
                            debug!("Interim results discarded after handoff");
                            if shared.config.mode.hands_off() {
                                break;
                            }
                            continue;
                        }
                        let now = Instant::now();
                        let outcome = match output {
                            LocalOutput::Observations(obs) if !obs.is_empty() => {
                                shared.reconciler.lock().await.ingest_local(obs, &frame, now)
                            }
                            LocalOutput::Labels(labels) if !labels.is_empty() => {
                                shared
                                    .reconciler
                                    .lock()
                                    .await
                                    .ingest_classifier(labels, &frame, now)
                            }
                            _ => continue,
                        };
                        shared.publish(outcome, backend.kind());
                    }
                    Err(e) => {
                        warn!("Local inference failed on '{}': {}", backend.name(), e);
                    }
                }
            }
        }
    }
    debug!("Local loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    use ilens_vision::{GeminiVisionConfig, VisionResult};

    struct EmptyDetector;

    impl ObjectDetector for EmptyDetector {
        fn name(&self) -> &str {
            "empty"
        }

        fn detect(&self, _frame: &Frame) -> VisionResult<Vec<ClassObservation>> {
            Ok(Vec::new())
        }
    }

    fn cloud_client() -> Arc<GeminiVision> {
        Arc::new(GeminiVision::with_api_key(
            "test-key",
            GeminiVisionConfig::default(),
        ))
    }

    #[test]
    fn test_builder_requires_cloud_client() {
        let err = EngineBuilder::new(EngineConfig::default()).build();
        assert!(matches!(err, Err(EngineError::BackendUnavailable(_))));
    }

    #[test]
    fn test_builder_degrades_hybrid_without_detector() {
        let config = EngineConfig {
            mode: PipelineMode::Hybrid,
            ..EngineConfig::default()
        };
        let engine = EngineBuilder::new(config)
            .with_cloud(cloud_client())
            .build()
            .unwrap();
        assert_eq!(engine.mode(), PipelineMode::CloudOnly);
    }

    #[test]
    fn test_builder_keeps_mode_with_detector() {
        let config = EngineConfig {
            mode: PipelineMode::BootstrapHandoff,
            ..EngineConfig::default()
        };
        let engine = EngineBuilder::new(config)
            .with_cloud(cloud_client())
            .with_detector(Arc::new(EmptyDetector))
            .build()
            .unwrap();
        assert_eq!(engine.mode(), PipelineMode::BootstrapHandoff);
    }

    #[tokio::test]
    async fn test_stop_before_start_is_an_error() {
        let engine = EngineBuilder::new(EngineConfig::default())
            .with_cloud(cloud_client())
            .build()
            .unwrap();
        assert!(matches!(engine.stop().await, Err(EngineError::NotRunning)));
    }

    #[tokio::test]
    async fn test_double_start_is_an_error() {
        let engine = EngineBuilder::new(EngineConfig::default())
            .with_cloud(cloud_client())
            .build()
            .unwrap();
        engine.start().await.unwrap();
        assert!(matches!(
            engine.start().await,
            Err(EngineError::AlreadyRunning)
        ));
        assert!(engine.is_running().await);
        engine.stop().await.unwrap();
        assert!(!engine.is_running().await);
    }

    #[tokio::test]
    async fn test_analyzing_flag_tracks_session() {
        let engine = EngineBuilder::new(EngineConfig::default())
            .with_cloud(cloud_client())
            .build()
            .unwrap();
        let analyzing = engine.watch_analyzing();
        assert!(!*analyzing.borrow());
        engine.start().await.unwrap();
        assert!(*analyzing.borrow());
        engine.stop().await.unwrap();
        assert!(!*analyzing.borrow());
    }
}
