use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::detection::ItemMetadata;
use crate::rect::NormalizedRect;

/// A single object reported by a vision backend for one frame, before
/// reconciliation. Carries whatever the backend could determine; the
/// rect is absent when the backend did not localize the object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RawDetection {
    pub name: String,
    #[serde(default)]
    pub metadata: ItemMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rect: Option<NormalizedRect>,
}

impl RawDetection {
    pub fn new(name: impl Into<String>, rect: Option<NormalizedRect>) -> Self {
        Self {
            name: name.into(),
            metadata: ItemMetadata::default(),
            rect,
        }
    }

    /// An observation with a name only, no geometry or attributes.
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, None)
    }

    pub fn with_metadata(mut self, metadata: ItemMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A localized class hit from the on-device object detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassObservation {
    /// Class label from the model's fixed vocabulary, e.g. "cup".
    pub label: String,
    pub rect: NormalizedRect,
    pub confidence: f32,
}

impl ClassObservation {
    pub fn new(label: impl Into<String>, rect: NormalizedRect, confidence: f32) -> Self {
        Self {
            label: label.into(),
            rect,
            confidence,
        }
    }
}

/// A whole-frame label from the on-device classifier. No geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassLabel {
    pub label: String,
    pub confidence: f32,
}

impl ClassLabel {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// Structured answer from a single-item enrichment request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EnrichmentReply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl EnrichmentReply {
    pub fn into_metadata(self) -> ItemMetadata {
        ItemMetadata {
            brand: self.brand,
            color: self.color,
            size: self.size,
            category: self.category,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.brand.is_none()
            && self.color.is_none()
            && self.size.is_none()
            && self.category.is_none()
    }
}
