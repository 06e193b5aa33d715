//! Traits for on-device detection backends.
//!
//! Implementations run synchronously on the calling thread; the engine
//! schedules them off the async runtime when needed.

use ilens_models::{ClassLabel, ClassObservation, Frame};

use crate::error::VisionResult;

/// A local object detector producing localized class hits.
///
/// Rects are normalized to the upright display orientation of the frame.
pub trait ObjectDetector: Send + Sync {
    /// Backend name for logs and metrics, e.g. "yolov8n".
    fn name(&self) -> &str;

    /// Detect objects in a frame. Results are sorted by confidence,
    /// highest first.
    fn detect(&self, frame: &Frame) -> VisionResult<Vec<ClassObservation>>;
}

/// A whole-frame classifier producing labels without geometry.
pub trait FrameClassifier: Send + Sync {
    /// Backend name for logs and metrics.
    fn name(&self) -> &str;

    /// Classify the dominant content of a frame. Results are sorted by
    /// confidence, highest first.
    fn classify(&self, frame: &Frame) -> VisionResult<Vec<ClassLabel>>;
}
