//! Vision backends for the Inventory Lens engine.
//!
//! Three ways of looking at a frame:
//! - `GeminiVision`: cloud identification and enrichment over HTTP,
//!   throttled and single-flight.
//! - `OrtObjectDetector`: on-device YOLO-family detection via ONNX
//!   Runtime.
//! - `OrtFrameClassifier`: on-device whole-frame classification.
//!
//! The local backends sit behind the `ObjectDetector` / `FrameClassifier`
//! traits so the engine can be driven with test doubles.

pub mod error;
pub mod gemini;
pub mod local;
pub mod onnx;
pub mod parse;

pub use error::{VisionError, VisionResult};
pub use gemini::{GeminiVision, GeminiVisionConfig};
pub use local::{FrameClassifier, ObjectDetector};
pub use onnx::{
    is_model_available, OrtClassifierConfig, OrtDetectorConfig, OrtFrameClassifier,
    OrtObjectDetector, COCO_CLASSES,
};
