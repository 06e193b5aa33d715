//! ONNX Runtime implementations of the local backends.
//!
//! `OrtObjectDetector` wraps a YOLOv8-family model (NCHW f32 input,
//! `[1, 84, N]` output). `OrtFrameClassifier` wraps a whole-frame
//! classification model with a labels file beside it. Model files are
//! runtime assets; construction fails when they are absent and callers
//! decide whether to degrade.

use std::path::Path;
use std::sync::Mutex;

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::{Tensor, Value};
use tracing::{debug, info};

use ilens_media::encode::upright_image;
use ilens_models::{ClassLabel, ClassObservation, Frame, NormalizedRect};

use crate::error::{VisionError, VisionResult};
use crate::local::{FrameClassifier, ObjectDetector};

/// COCO class names (80 classes) for the detector's output vocabulary.
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck",
    "boat", "traffic light", "fire hydrant", "stop sign", "parking meter", "bench",
    "bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra",
    "giraffe", "backpack", "umbrella", "handbag", "tie", "suitcase", "frisbee",
    "skis", "snowboard", "sports ball", "kite", "baseball bat", "baseball glove",
    "skateboard", "surfboard", "tennis racket", "bottle", "wine glass", "cup",
    "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink",
    "refrigerator", "book", "clock", "vase", "scissors", "teddy bear", "hair drier",
    "toothbrush",
];

/// Check whether a model asset exists at the given path.
pub fn is_model_available(path: &str) -> bool {
    Path::new(path).exists()
}

/// Configuration for the ONNX object detector.
#[derive(Debug, Clone)]
pub struct OrtDetectorConfig {
    /// Path to the ONNX model file
    pub model_path: String,
    /// Confidence threshold for detections
    pub confidence_threshold: f32,
    /// IoU threshold for NMS
    pub nms_threshold: f32,
    /// Square model input size in pixels
    pub input_size: u32,
}

impl Default for OrtDetectorConfig {
    fn default() -> Self {
        Self {
            model_path: "models/yolov8n.onnx".to_string(),
            confidence_threshold: 0.25,
            nms_threshold: 0.45,
            input_size: 640,
        }
    }
}

/// YOLO-family detector running through ONNX Runtime on CPU.
pub struct OrtObjectDetector {
    session: Mutex<Session>,
    config: OrtDetectorConfig,
}

impl OrtObjectDetector {
    /// Create a detector, loading the model into a session.
    ///
    /// Returns `VisionError::ModelNotFound` when the model file is
    /// absent so callers can degrade to cloud-only operation.
    pub fn new(config: OrtDetectorConfig) -> VisionResult<Self> {
        let model_path = Path::new(&config.model_path);
        if !model_path.exists() {
            return Err(VisionError::model_not_found(&config.model_path));
        }
        let session = Mutex::new(create_session(model_path)?);
        info!(
            model_path = %config.model_path,
            input_size = config.input_size,
            "object detector initialized"
        );
        Ok(Self { session, config })
    }

    pub fn config(&self) -> &OrtDetectorConfig {
        &self.config
    }

    fn preprocess(&self, img: &RgbImage) -> VisionResult<Value> {
        let size = self.config.input_size;
        let resized = image::imageops::resize(img, size, size, FilterType::Triangle);
        let (w, h) = (size as usize, size as usize);

        // HWC -> CHW with normalization to [0, 1]
        let mut chw: Vec<f32> = Vec::with_capacity(3 * h * w);
        for c in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    let pixel = resized.get_pixel(x as u32, y as u32);
                    chw.push(pixel[c] as f32 / 255.0);
                }
            }
        }

        let shape = vec![1usize, 3, h, w];
        Tensor::from_array((shape, chw.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| VisionError::inference(format!("Failed to create tensor: {}", e)))
    }

    fn run_inference(&self, input: Value) -> VisionResult<Vec<f32>> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| VisionError::internal("session lock poisoned"))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| VisionError::inference(format!("ONNX inference failed: {}", e)))?;

        let output = outputs
            .get("output0")
            .ok_or_else(|| VisionError::inference("Missing output0 tensor"))?;

        let tensor = output
            .try_extract_tensor::<f32>()
            .map_err(|e| VisionError::inference(format!("Failed to extract tensor: {}", e)))?;

        Ok(tensor.1.iter().copied().collect())
    }
}

impl ObjectDetector for OrtObjectDetector {
    fn name(&self) -> &str {
        "yolov8"
    }

    fn detect(&self, frame: &Frame) -> VisionResult<Vec<ClassObservation>> {
        let img = upright_image(frame).map_err(|e| VisionError::invalid_frame(e.to_string()))?;
        let input = self.preprocess(&img)?;
        let outputs = self.run_inference(input)?;

        let candidates = decode_boxes(
            &outputs,
            self.config.input_size as f32,
            self.config.confidence_threshold,
        )?;
        let kept = non_maximum_suppression(candidates, self.config.nms_threshold);

        let mut observations: Vec<ClassObservation> = kept
            .into_iter()
            .map(|b| {
                ClassObservation::new(
                    COCO_CLASSES[b.class_id],
                    NormalizedRect::new(b.x as f64, b.y as f64, b.width as f64, b.height as f64),
                    b.score,
                )
            })
            .collect();
        observations.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));

        debug!(count = observations.len(), "local detection completed");
        Ok(observations)
    }
}

/// Configuration for the ONNX whole-frame classifier.
#[derive(Debug, Clone)]
pub struct OrtClassifierConfig {
    /// Path to the ONNX model file
    pub model_path: String,
    /// Path to the labels file, one label per line, index-aligned with
    /// the model's output axis.
    pub labels_path: String,
    /// Square model input size in pixels
    pub input_size: u32,
    /// Maximum number of labels to return
    pub top_k: usize,
    /// Labels below this probability are dropped.
    pub min_confidence: f32,
}

impl Default for OrtClassifierConfig {
    fn default() -> Self {
        Self {
            model_path: "models/classifier.onnx".to_string(),
            labels_path: "models/classifier_labels.txt".to_string(),
            input_size: 224,
            top_k: 3,
            min_confidence: 0.35,
        }
    }
}

/// Whole-frame classifier running through ONNX Runtime on CPU.
///
/// Expects logit outputs; probabilities are produced with a softmax over
/// the class axis.
pub struct OrtFrameClassifier {
    session: Mutex<Session>,
    output_name: String,
    labels: Vec<String>,
    config: OrtClassifierConfig,
}

impl OrtFrameClassifier {
    pub fn new(config: OrtClassifierConfig) -> VisionResult<Self> {
        let model_path = Path::new(&config.model_path);
        if !model_path.exists() {
            return Err(VisionError::model_not_found(&config.model_path));
        }
        let labels_path = Path::new(&config.labels_path);
        if !labels_path.exists() {
            return Err(VisionError::model_not_found(&config.labels_path));
        }

        let labels: Vec<String> = std::fs::read_to_string(labels_path)?
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        if labels.is_empty() {
            return Err(VisionError::inference("classifier labels file is empty"));
        }

        let session = create_session(model_path)?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| VisionError::inference("classifier model declares no outputs"))?;

        info!(
            model_path = %config.model_path,
            labels = labels.len(),
            "frame classifier initialized"
        );

        Ok(Self {
            session: Mutex::new(session),
            output_name,
            labels,
            config,
        })
    }

    pub fn config(&self) -> &OrtClassifierConfig {
        &self.config
    }

    fn preprocess(&self, img: &RgbImage) -> VisionResult<Value> {
        let size = self.config.input_size;
        let resized = image::imageops::resize(img, size, size, FilterType::Triangle);
        let (w, h) = (size as usize, size as usize);

        let mut chw: Vec<f32> = Vec::with_capacity(3 * h * w);
        for c in 0..3 {
            for y in 0..h {
                for x in 0..w {
                    let pixel = resized.get_pixel(x as u32, y as u32);
                    chw.push(pixel[c] as f32 / 255.0);
                }
            }
        }

        let shape = vec![1usize, 3, h, w];
        Tensor::from_array((shape, chw.into_boxed_slice()))
            .map(Value::from)
            .map_err(|e| VisionError::inference(format!("Failed to create tensor: {}", e)))
    }
}

impl FrameClassifier for OrtFrameClassifier {
    fn name(&self) -> &str {
        "onnx-classifier"
    }

    fn classify(&self, frame: &Frame) -> VisionResult<Vec<ClassLabel>> {
        let img = upright_image(frame).map_err(|e| VisionError::invalid_frame(e.to_string()))?;
        let input = self.preprocess(&img)?;

        let logits = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| VisionError::internal("session lock poisoned"))?;
            let outputs = session
                .run(ort::inputs![input])
                .map_err(|e| VisionError::inference(format!("ONNX inference failed: {}", e)))?;
            let output = outputs.get(&self.output_name).ok_or_else(|| {
                VisionError::inference(format!("Missing {} tensor", self.output_name))
            })?;
            let tensor = output
                .try_extract_tensor::<f32>()
                .map_err(|e| VisionError::inference(format!("Failed to extract tensor: {}", e)))?;
            tensor.1.iter().copied().collect::<Vec<f32>>()
        };

        if logits.len() != self.labels.len() {
            return Err(VisionError::inference(format!(
                "classifier output size {} does not match label count {}",
                logits.len(),
                self.labels.len()
            )));
        }

        let probs = softmax(&logits);
        let mut indexed: Vec<(usize, f32)> = probs.into_iter().enumerate().collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let labels: Vec<ClassLabel> = indexed
            .into_iter()
            .take(self.config.top_k)
            .filter(|(_, p)| *p >= self.config.min_confidence)
            .map(|(i, p)| ClassLabel::new(self.labels[i].clone(), p))
            .collect();

        debug!(count = labels.len(), "frame classification completed");
        Ok(labels)
    }
}

/// Detection candidate in normalized display coordinates, before NMS.
#[derive(Debug, Clone)]
struct RawBox {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    class_id: usize,
    score: f32,
}

impl RawBox {
    fn iou(&self, other: &RawBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let inter_w = (x2 - x1).max(0.0);
        let inter_h = (y2 - y1).max(0.0);
        let intersection = inter_w * inter_h;

        let union = self.width * self.height + other.width * other.height - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Decodes a YOLOv8 `[1, 84, N]` output buffer into normalized boxes.
///
/// Row layout is 4 bbox rows (cx, cy, w, h in model pixels) followed by
/// one score row per class.
fn decode_boxes(
    outputs: &[f32],
    input_size: f32,
    confidence_threshold: f32,
) -> VisionResult<Vec<RawBox>> {
    let num_classes = COCO_CLASSES.len();
    let num_features = num_classes + 4;

    if outputs.is_empty() || outputs.len() % num_features != 0 {
        return Err(VisionError::inference(format!(
            "Unexpected output size: {} is not a multiple of {}",
            outputs.len(),
            num_features
        )));
    }
    let num_boxes = outputs.len() / num_features;

    // [84, N] transposed to [N, 84]
    let output_array = Array::from_shape_vec((num_features, num_boxes), outputs.to_vec())
        .map_err(|e| VisionError::inference(format!("Failed to reshape output: {}", e)))?;
    let transposed = output_array.t();

    let mut candidates = Vec::new();
    for i in 0..num_boxes {
        let cx = transposed[[i, 0]];
        let cy = transposed[[i, 1]];
        let w = transposed[[i, 2]];
        let h = transposed[[i, 3]];

        let mut best_class = 0;
        let mut best_score = 0.0f32;
        for c in 0..num_classes {
            let score = transposed[[i, 4 + c]];
            if score > best_score {
                best_score = score;
                best_class = c;
            }
        }

        if best_score < confidence_threshold {
            continue;
        }

        // Center format to corner format, normalized to [0, 1]
        let x = ((cx - w / 2.0) / input_size).clamp(0.0, 1.0);
        let y = ((cy - h / 2.0) / input_size).clamp(0.0, 1.0);
        let width = (w / input_size).min(1.0 - x);
        let height = (h / input_size).min(1.0 - y);
        if width <= 0.0 || height <= 0.0 {
            continue;
        }

        candidates.push(RawBox {
            x,
            y,
            width,
            height,
            class_id: best_class,
            score: best_score,
        });
    }

    Ok(candidates)
}

/// Per-class non-maximum suppression, highest score first.
fn non_maximum_suppression(mut boxes: Vec<RawBox>, threshold: f32) -> Vec<RawBox> {
    if boxes.is_empty() {
        return boxes;
    }
    boxes.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<RawBox> = Vec::new();
    let mut suppressed = vec![false; boxes.len()];

    for i in 0..boxes.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(boxes[i].clone());
        for j in (i + 1)..boxes.len() {
            if suppressed[j] || boxes[i].class_id != boxes[j].class_id {
                continue;
            }
            if boxes[i].iou(&boxes[j]) > threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|v| v / sum).collect()
}

/// Create an ONNX Runtime session from a model file.
fn create_session(model_path: &Path) -> VisionResult<Session> {
    let model_bytes = std::fs::read(model_path)?;

    let builder = Session::builder()
        .map_err(|e| VisionError::inference(format!("Failed to create session builder: {}", e)))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| VisionError::inference(format!("Failed to set optimization level: {}", e)))?;

    builder
        .commit_from_memory(&model_bytes)
        .map_err(|e| VisionError::inference(format!("Failed to load ONNX model: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coco_classes() {
        assert_eq!(COCO_CLASSES.len(), 80);
        assert_eq!(COCO_CLASSES[41], "cup");
        assert_eq!(COCO_CLASSES[56], "chair");
    }

    #[test]
    fn test_detector_config_default() {
        let config = OrtDetectorConfig::default();
        assert_eq!(config.input_size, 640);
        assert!((config.confidence_threshold - 0.25).abs() < 0.001);
        assert!((config.nms_threshold - 0.45).abs() < 0.001);
    }

    #[test]
    fn test_missing_model_errors() {
        let config = OrtDetectorConfig {
            model_path: "/nonexistent/model.onnx".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            OrtObjectDetector::new(config),
            Err(VisionError::ModelNotFound(_))
        ));
        assert!(!is_model_available("/nonexistent/model.onnx"));
    }

    #[test]
    fn test_decode_boxes_synthetic_output() {
        // 84 features x 2 boxes, row-major by feature. Box 0 is a
        // centered half-frame "cup" at 0.9, box 1 stays at zero scores.
        let num_boxes = 2;
        let mut data = vec![0f32; 84 * num_boxes];
        data[0] = 320.0; // cx
        data[num_boxes] = 320.0; // cy
        data[2 * num_boxes] = 320.0; // w
        data[3 * num_boxes] = 320.0; // h
        data[(4 + 41) * num_boxes] = 0.9; // cup score

        let boxes = decode_boxes(&data, 640.0, 0.25).unwrap();
        assert_eq!(boxes.len(), 1);
        let b = &boxes[0];
        assert_eq!(b.class_id, 41);
        assert!((b.x - 0.25).abs() < 1e-6);
        assert!((b.y - 0.25).abs() < 1e-6);
        assert!((b.width - 0.5).abs() < 1e-6);
        assert!((b.score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_decode_boxes_rejects_bad_length() {
        assert!(decode_boxes(&[0.0; 85], 640.0, 0.25).is_err());
        assert!(decode_boxes(&[], 640.0, 0.25).is_err());
    }

    #[test]
    fn test_nms_suppresses_same_class_overlap() {
        let a = RawBox { x: 0.1, y: 0.1, width: 0.3, height: 0.3, class_id: 41, score: 0.9 };
        let b = RawBox { x: 0.12, y: 0.12, width: 0.3, height: 0.3, class_id: 41, score: 0.6 };
        let kept = non_maximum_suppression(vec![b, a], 0.45);
        assert_eq!(kept.len(), 1);
        assert!((kept[0].score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_different_classes() {
        let a = RawBox { x: 0.1, y: 0.1, width: 0.3, height: 0.3, class_id: 41, score: 0.9 };
        let b = RawBox { x: 0.12, y: 0.12, width: 0.3, height: 0.3, class_id: 56, score: 0.6 };
        assert_eq!(non_maximum_suppression(vec![a, b], 0.45).len(), 2);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn test_raw_box_iou_identical() {
        let a = RawBox { x: 0.1, y: 0.1, width: 0.2, height: 0.2, class_id: 0, score: 0.5 };
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }
}
