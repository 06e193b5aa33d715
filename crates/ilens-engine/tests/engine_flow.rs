//! End-to-end engine tests.
//!
//! Each test runs a real engine against a wiremock stand-in for the
//! cloud identification endpoint, with scripted on-device backends
//! where the pipeline mode wants one. No external services required.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ilens_engine::{
    Backend, EngineConfig, EngineEvent, JsonInventorySink, PipelineMode, ScanEngine,
};
use ilens_models::{ClassLabel, ClassObservation, Frame, FrameRotation, NormalizedRect};
use ilens_vision::{
    FrameClassifier, GeminiVision, GeminiVisionConfig, ObjectDetector, VisionResult,
};

fn test_frame() -> Frame {
    Frame::from_rgb(vec![96u8; 32 * 24 * 3], 32, 24, FrameRotation::None).unwrap()
}

fn cloud_client(uri: &str) -> Arc<GeminiVision> {
    let config = GeminiVisionConfig {
        base_url: uri.to_string(),
        min_call_interval: Duration::ZERO,
        ..GeminiVisionConfig::default()
    };
    Arc::new(GeminiVision::with_api_key("test-key", config))
}

fn fast_config(mode: PipelineMode) -> EngineConfig {
    EngineConfig {
        mode,
        cloud_attempt_interval: Duration::from_millis(20),
        local_min_interval: Duration::from_millis(10),
        enrichment_enabled: false,
        ..EngineConfig::default()
    }
}

fn gemini_body(text: &str) -> serde_json::Value {
    json!({
        "candidates": [
            {"content": {"parts": [{"text": text}]}}
        ]
    })
}

/// Matches identification requests only; enrichment prompts ask for a
/// single JSON object instead.
fn identification() -> wiremock::MockBuilder {
    Mock::given(method("POST")).and(body_string_contains("inventory assistant"))
}

fn enrichment() -> wiremock::MockBuilder {
    Mock::given(method("POST")).and(body_string_contains("single JSON object"))
}

async fn feed_frames(engine: &ScanEngine, count: usize, every: Duration) {
    for _ in 0..count {
        engine.submit_frame(test_frame());
        tokio::time::sleep(every).await;
    }
}

async fn wait_for_count(engine: &ScanEngine, at_least: usize) {
    let mut rx = engine.watch_item_count();
    tokio::time::timeout(Duration::from_secs(5), async {
        while *rx.borrow() < at_least {
            if rx.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .expect("item count did not reach target in time");
}

fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Emits one previously unseen class per call, so a gated-off detector
/// is visible as a canonical list that stops growing.
struct NoveltyDetector {
    labels: Vec<&'static str>,
    calls: AtomicUsize,
}

impl NoveltyDetector {
    fn new() -> Self {
        Self {
            labels: vec![
                "chair", "plant", "monitor", "keyboard", "mouse", "bottle", "backpack", "clock",
                "vase", "scissors", "book", "cup", "bowl", "laptop", "remote", "umbrella",
                "handbag", "tie", "suitcase", "skateboard",
            ],
            calls: AtomicUsize::new(0),
        }
    }
}

impl ObjectDetector for NoveltyDetector {
    fn name(&self) -> &str {
        "scripted-detector"
    }

    fn detect(&self, _frame: &Frame) -> VisionResult<Vec<ClassObservation>> {
        let i = self.calls.fetch_add(1, Ordering::SeqCst);
        let Some(label) = self.labels.get(i) else {
            return Ok(Vec::new());
        };
        let rect = NormalizedRect::new(
            0.02 + 0.19 * (i % 5) as f64,
            0.05 + 0.3 * ((i / 5) % 3) as f64,
            0.15,
            0.2,
        );
        Ok(vec![ClassObservation::new(*label, rect, 0.9)])
    }
}

/// Always sees the same cup in the same place.
struct CupDetector;

impl ObjectDetector for CupDetector {
    fn name(&self) -> &str {
        "scripted-detector"
    }

    fn detect(&self, _frame: &Frame) -> VisionResult<Vec<ClassObservation>> {
        Ok(vec![ClassObservation::new(
            "cup",
            NormalizedRect::new(0.4, 0.4, 0.2, 0.2),
            0.9,
        )])
    }
}

struct ScriptedClassifier;

impl FrameClassifier for ScriptedClassifier {
    fn name(&self) -> &str {
        "scripted-classifier"
    }

    fn classify(&self, _frame: &Frame) -> VisionResult<Vec<ClassLabel>> {
        Ok(vec![
            ClassLabel::new("cup", 0.91),
            ClassLabel::new("bowl", 0.44),
        ])
    }
}

/// Test the full cloud-only path: identify, enrich in queue order, and
/// deliver the finished session to a JSON inventory file.
#[tokio::test]
async fn test_cloud_only_scan_delivers_session_to_sink() {
    let server = MockServer::start().await;
    identification()
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_body(
            r#"[{"name": "Sony WH-1000XM4 headphones", "box_2d": [200, 150, 600, 500]}, {"name": "desk lamp"}]"#,
        )))
        .mount(&server)
        .await;
    // Enrichment jobs run FIFO, so the first reply belongs to the
    // headphones and the second to the lamp.
    enrichment()
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_body(
            r#"{"name": null, "brand": "Sony", "color": "black", "size": null, "category": "electronics"}"#,
        )))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    enrichment()
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_body(
            r#"{"name": null, "brand": "IKEA", "color": null, "size": null, "category": "lighting"}"#,
        )))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let inventory_path = dir.path().join("inventory.json");
    let mut config = fast_config(PipelineMode::CloudOnly);
    config.enrichment_enabled = true;
    config.enrichment_gap = Duration::from_millis(50);

    let engine = ScanEngine::builder(config)
        .with_cloud(cloud_client(&server.uri()))
        .with_sink(Arc::new(JsonInventorySink::new(inventory_path.clone())))
        .build()
        .unwrap();
    let mut events = engine.subscribe_events();

    engine.start().await.unwrap();
    engine.submit_frame(test_frame());
    wait_for_count(&engine, 2).await;
    // Leave room for both enrichment dispatches and the gap between.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let session = engine.stop().await.unwrap();
    assert_eq!(session.item_count(), 2);

    let items = engine.detections().await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].name, "Sony WH-1000XM4 headphones");
    assert_eq!(items[0].metadata.brand.as_deref(), Some("Sony"));
    assert_eq!(items[1].name, "desk lamp");
    assert_eq!(items[1].metadata.brand.as_deref(), Some("IKEA"));

    let doc: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&inventory_path).unwrap()).unwrap();
    assert_eq!(doc["sessions"].as_array().unwrap().len(), 1);
    assert_eq!(doc["sessions"][0]["item_count"], 2);
    let session_id = session.id.to_string();
    assert_eq!(doc["sessions"][0]["session_id"], session_id.as_str());
    let file_items = doc["items"].as_array().unwrap();
    assert_eq!(file_items.len(), 2);
    assert!(file_items.iter().all(|i| i["session_id"] == session_id.as_str()));
    assert_eq!(file_items[0]["brand"], "Sony");
    assert_eq!(file_items[1]["brand"], "IKEA");

    let events = drain_events(&mut events);
    let first_detections = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::FirstDetection { .. }))
        .count();
    assert_eq!(first_detections, 1);
    assert!(events.iter().any(
        |e| matches!(e, EngineEvent::SessionFinished { item_count, .. } if *item_count == 2)
    ));
}

/// Test that bootstrap_handoff stops accepting detector results once the
/// first cloud response lands, while keeping what the detector found.
#[tokio::test]
async fn test_bootstrap_handoff_gates_local_detector() {
    let server = MockServer::start().await;
    // Slow cloud so the detector gets several frames to itself first.
    identification()
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(gemini_body(r#"[{"name": "ceramic mug"}]"#))
                .set_delay(Duration::from_millis(250)),
        )
        .mount(&server)
        .await;

    let engine = ScanEngine::builder(fast_config(PipelineMode::BootstrapHandoff))
        .with_cloud(cloud_client(&server.uri()))
        .with_detector(Arc::new(NoveltyDetector::new()))
        .build()
        .unwrap();
    let mut events = engine.subscribe_events();

    engine.start().await.unwrap();
    feed_frames(&engine, 20, Duration::from_millis(25)).await;

    let after_handoff = engine.detections().await.len();
    // The detector would keep inventing classes if it were still live.
    feed_frames(&engine, 10, Duration::from_millis(30)).await;
    let settled = engine.detections().await.len();
    assert_eq!(settled, after_handoff);

    let items = engine.detections().await;
    assert!(items.iter().any(|d| d.name == "ceramic mug"));
    assert!(settled >= 2, "expected interim results before handoff, got {settled}");

    engine.stop().await.unwrap();

    let events = drain_events(&mut events);
    let handoffs = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::CloudHandoff))
        .count();
    assert_eq!(handoffs, 1);
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::DetectionAdded { backend: Backend::LocalDetector, .. }
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::DetectionAdded { backend: Backend::Cloud, .. }
    )));
}

/// Test that stop does not wait for an in-flight enrichment request and
/// leaves the detection unenriched.
#[tokio::test]
async fn test_stop_abandons_in_flight_enrichment() {
    let server = MockServer::start().await;
    identification()
        .respond_with(ResponseTemplate::new(200).set_body_json(gemini_body(
            r#"[{"name": "table lamp"}]"#,
        )))
        .mount(&server)
        .await;
    enrichment()
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(gemini_body(r#"{"brand": "Too Late"}"#))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let mut config = fast_config(PipelineMode::CloudOnly);
    config.enrichment_enabled = true;
    config.enrichment_gap = Duration::from_millis(50);

    let engine = ScanEngine::builder(config)
        .with_cloud(cloud_client(&server.uri()))
        .build()
        .unwrap();

    engine.start().await.unwrap();
    engine.submit_frame(test_frame());
    wait_for_count(&engine, 1).await;
    // Give the queue time to put the enrichment request on the wire.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let begun = Instant::now();
    let session = engine.stop().await.unwrap();
    assert!(
        begun.elapsed() < Duration::from_secs(2),
        "stop waited out the enrichment request"
    );

    assert_eq!(session.item_count(), 1);
    let items = engine.detections().await;
    assert_eq!(items[0].name, "table lamp");
    assert!(items[0].metadata.is_empty());
}

/// Test that hybrid mode collapses the same item reported by both
/// backends into one canonical detection.
#[tokio::test]
async fn test_hybrid_merges_overlapping_names() {
    let server = MockServer::start().await;
    identification()
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(gemini_body(
                    r#"[{"name": "cup"}, {"name": "floor lamp"}]"#,
                ))
                .set_delay(Duration::from_millis(100)),
        )
        .mount(&server)
        .await;

    let engine = ScanEngine::builder(fast_config(PipelineMode::Hybrid))
        .with_cloud(cloud_client(&server.uri()))
        .with_detector(Arc::new(CupDetector))
        .build()
        .unwrap();

    engine.start().await.unwrap();
    feed_frames(&engine, 20, Duration::from_millis(25)).await;
    engine.stop().await.unwrap();

    let names: Vec<String> = engine
        .detections()
        .await
        .iter()
        .map(|d| d.name.clone())
        .collect();
    assert_eq!(names, vec!["cup", "floor lamp"]);
}

/// Test classifier_bootstrap: only the classifier's top label surfaces,
/// and the classifier is gated off after the first cloud response.
#[tokio::test]
async fn test_classifier_bootstrap_keeps_top_label_until_handoff() {
    let server = MockServer::start().await;
    identification()
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(gemini_body(r#"[{"name": "kitchen knife"}]"#))
                .set_delay(Duration::from_millis(250)),
        )
        .mount(&server)
        .await;

    let engine = ScanEngine::builder(fast_config(PipelineMode::ClassifierBootstrap))
        .with_cloud(cloud_client(&server.uri()))
        .with_classifier(Arc::new(ScriptedClassifier))
        .build()
        .unwrap();
    let mut events = engine.subscribe_events();

    engine.start().await.unwrap();
    feed_frames(&engine, 20, Duration::from_millis(25)).await;
    engine.stop().await.unwrap();

    let names: Vec<String> = engine
        .detections()
        .await
        .iter()
        .map(|d| d.name.clone())
        .collect();
    // The runner-up label never becomes an item.
    assert_eq!(names, vec!["cup", "kitchen knife"]);

    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(e, EngineEvent::CloudHandoff)));
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::DetectionAdded { backend: Backend::Classifier, .. }
    )));
}
