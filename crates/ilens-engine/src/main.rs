//! Inventory scanning binary.
//!
//! Feeds frames from an image directory through the engine at a fixed
//! rate, then stops and prints the finished session. A stand-in for the
//! camera feed embedders provide.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ilens_engine::{EngineConfig, EngineEvent, JsonInventorySink, ScanEngine};
use ilens_media::decode_image_to_frame;
use ilens_models::FrameRotation;
use ilens_vision::{
    is_model_available, GeminiVision, GeminiVisionConfig, OrtClassifierConfig, OrtDetectorConfig,
    OrtFrameClassifier, OrtObjectDetector,
};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("ilens=info".parse().unwrap())
        .add_directive("ort=warn".parse().unwrap())
        .add_directive("onnxruntime=warn".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting ilens-scan");

    let config = EngineConfig::from_env();
    info!("Engine config: {:?}", config);

    let cloud = match GeminiVision::new(GeminiVisionConfig::from_env()) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to create cloud identification client: {}", e);
            std::process::exit(1);
        }
    };

    let inventory_path =
        std::env::var("ILENS_INVENTORY_PATH").unwrap_or_else(|_| "inventory.json".to_string());
    let mut builder = ScanEngine::builder(config)
        .with_cloud(cloud)
        .with_sink(Arc::new(JsonInventorySink::new(&inventory_path)));

    // On-device backends are optional; the engine degrades to cloud-only
    // when a mode wants one that is not on disk.
    let detector_config = OrtDetectorConfig {
        model_path: std::env::var("ILENS_YOLO_MODEL")
            .unwrap_or_else(|_| "models/yolov8n.onnx".to_string()),
        ..OrtDetectorConfig::default()
    };
    if is_model_available(&detector_config.model_path) {
        match OrtObjectDetector::new(detector_config) {
            Ok(detector) => builder = builder.with_detector(Arc::new(detector)),
            Err(e) => warn!("Object detector unavailable: {}", e),
        }
    }
    let classifier_config = OrtClassifierConfig {
        model_path: std::env::var("ILENS_CLASSIFIER_MODEL")
            .unwrap_or_else(|_| "models/classifier.onnx".to_string()),
        labels_path: std::env::var("ILENS_CLASSIFIER_LABELS")
            .unwrap_or_else(|_| "models/classifier_labels.txt".to_string()),
        ..OrtClassifierConfig::default()
    };
    if is_model_available(&classifier_config.model_path) {
        match OrtFrameClassifier::new(classifier_config) {
            Ok(classifier) => builder = builder.with_classifier(Arc::new(classifier)),
            Err(e) => warn!("Frame classifier unavailable: {}", e),
        }
    }

    let engine = match builder.build() {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to build engine: {}", e);
            std::process::exit(1);
        }
    };

    let frame_dir =
        PathBuf::from(std::env::var("ILENS_FRAME_DIR").unwrap_or_else(|_| "frames".to_string()));
    let frames = match load_frame_paths(&frame_dir) {
        Ok(frames) if !frames.is_empty() => frames,
        Ok(_) => {
            error!("No frames found in {}", frame_dir.display());
            std::process::exit(1);
        }
        Err(e) => {
            error!("Failed to read frame directory {}: {}", frame_dir.display(), e);
            std::process::exit(1);
        }
    };
    info!("Feeding {} frames from {}", frames.len(), frame_dir.display());

    let frame_interval = Duration::from_millis(
        std::env::var("ILENS_FRAME_INTERVAL_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(200),
    );
    let scan_duration = Duration::from_secs(
        std::env::var("ILENS_SCAN_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30),
    );

    if let Err(e) = engine.start().await {
        error!("Failed to start engine: {}", e);
        std::process::exit(1);
    }

    // Mirror live events into the log while frames flow.
    let mut events = engine.subscribe_events();
    let event_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::DetectionAdded { name, backend, .. }) => {
                    info!("+ {} (via {})", name, backend.as_str());
                }
                Ok(EngineEvent::FirstDetection { elapsed }) => {
                    info!("First detection after {} ms", elapsed.as_millis());
                }
                Ok(EngineEvent::CloudHandoff) => {
                    info!("Cloud handoff complete, interim backend off");
                }
                Ok(EngineEvent::SessionFinished { item_count, .. }) => {
                    info!("Session finished with {} items", item_count);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event stream lagged, {} events dropped", skipped);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    feed_frames(&engine, &frames, frame_interval, scan_duration).await;

    let session = match engine.stop().await {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to stop engine: {}", e);
            std::process::exit(1);
        }
    };
    event_task.abort();

    let items = engine.detections().await;
    println!();
    println!(
        "Session {} | {} item(s), saved to {}",
        session.id,
        session.item_count(),
        inventory_path
    );
    let cloud_count = items.iter().filter(|i| i.local_class.is_none()).count();
    let enriched = items.iter().filter(|i| !i.metadata.is_empty()).count();
    println!(
        "  {} cloud / {} on-device, {} of {} enriched",
        cloud_count,
        items.len() - cloud_count,
        enriched,
        items.len()
    );
    for item in &items {
        let mut line = format!("  - {}", item.name);
        let attrs: Vec<String> = [
            ("brand", &item.metadata.brand),
            ("color", &item.metadata.color),
            ("size", &item.metadata.size),
            ("category", &item.metadata.category),
        ]
        .iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| format!("{key}: {v}")))
        .collect();
        if !attrs.is_empty() {
            line.push_str(&format!(" ({})", attrs.join(", ")));
        }
        println!("{line}");
    }

    info!("Scan complete");
}

/// Collect image files from the frame directory, name order.
fn load_frame_paths(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("jpg") | Some("jpeg") | Some("png")
            )
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Cycle through the frame files at a fixed rate until the scan window
/// closes or the process is interrupted.
async fn feed_frames(
    engine: &ScanEngine,
    frames: &[PathBuf],
    interval: Duration,
    duration: Duration,
) {
    let deadline = tokio::time::Instant::now() + duration;
    let mut ticker = tokio::time::interval(interval);
    let mut index = 0usize;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
            _ = tokio::time::sleep_until(deadline) => {
                info!("Scan window elapsed");
                break;
            }
            _ = ticker.tick() => {
                let path = &frames[index % frames.len()];
                index += 1;
                match std::fs::read(path) {
                    Ok(bytes) => match decode_image_to_frame(&bytes, FrameRotation::None) {
                        Ok(frame) => engine.submit_frame(frame),
                        Err(e) => warn!("Skipping {}: {}", path.display(), e),
                    },
                    Err(e) => warn!("Skipping {}: {}", path.display(), e),
                }
            }
        }
    }
}
