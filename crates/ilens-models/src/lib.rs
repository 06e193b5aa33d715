//! Shared data models for the Inventory Lens engine.
//!
//! This crate provides Serde-serializable types for:
//! - Canonical detections and their metadata
//! - Normalized bounding-box geometry
//! - Camera frames with rotation metadata
//! - Scan sessions
//! - Raw per-backend observations

pub mod detection;
pub mod frame;
pub mod observation;
pub mod rect;
pub mod session;

// Re-export common types
pub use detection::{Detection, DetectionId, ItemMetadata, LabeledBox};
pub use frame::{Frame, FrameError, FrameRotation};
pub use observation::{ClassLabel, ClassObservation, EnrichmentReply, RawDetection};
pub use rect::NormalizedRect;
pub use session::{ScanSession, SessionId};
