use std::sync::Arc;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::frame::Frame;
use crate::rect::NormalizedRect;

/// Unique identifier for a detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct DetectionId(pub String);

impl DetectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DetectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DetectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Item attributes filled in by enrichment. All fields optional; a
/// field is absent when no backend has supplied it yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ItemMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl ItemMetadata {
    pub fn is_empty(&self) -> bool {
        self.brand.is_none() && self.color.is_none() && self.size.is_none() && self.category.is_none()
    }

    /// Fills in fields that are still `None` from `other`. Existing
    /// values are never overwritten.
    pub fn merge_from(&mut self, other: &ItemMetadata) {
        if self.brand.is_none() {
            self.brand = other.brand.clone();
        }
        if self.color.is_none() {
            self.color = other.color.clone();
        }
        if self.size.is_none() {
            self.size = other.size.clone();
        }
        if self.category.is_none() {
            self.category = other.category.clone();
        }
    }
}

/// A named bounding box within a detection's frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LabeledBox {
    pub label: String,
    pub rect: NormalizedRect,
}

impl LabeledBox {
    pub fn new(label: impl Into<String>, rect: NormalizedRect) -> Self {
        Self {
            label: label.into(),
            rect,
        }
    }
}

/// A canonical identified object. One detection represents one physical
/// item surfaced to the caller; backends contribute to it but never own it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    pub id: DetectionId,
    /// Display name, e.g. "Sony WH-1000XM4 headphones".
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: ItemMetadata,
    /// Bounding boxes in the source frame, upright orientation. May be
    /// empty when the backend reported the item without localizing it.
    #[serde(default)]
    pub boxes: Vec<LabeledBox>,
    /// The frame the item was identified in. Dropped on eviction to
    /// bound memory; never serialized.
    #[serde(skip)]
    #[schemars(skip)]
    pub frame: Option<Arc<Frame>>,
    /// Local classifier label that seeded this detection, when one did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_class: Option<String>,
}

impl Detection {
    pub fn new(name: impl Into<String>, frame: Option<Arc<Frame>>) -> Self {
        Self {
            id: DetectionId::new(),
            name: name.into(),
            created_at: Utc::now(),
            metadata: ItemMetadata::default(),
            boxes: Vec::new(),
            frame,
            local_class: None,
        }
    }

    pub fn with_box(mut self, label: impl Into<String>, rect: NormalizedRect) -> Self {
        self.boxes.push(LabeledBox::new(label, rect));
        self
    }

    /// The box to crop or annotate with, when any exists.
    pub fn primary_box(&self) -> Option<&LabeledBox> {
        self.boxes.first()
    }

    pub fn has_frame(&self) -> bool {
        self.frame.is_some()
    }

    /// Drops the retained frame, keeping everything else.
    pub fn release_frame(&mut self) {
        self.frame = None;
    }

    /// Case-insensitive name comparison used for dedup.
    pub fn matches_name(&self, other: &str) -> bool {
        self.name.eq_ignore_ascii_case(other)
    }
}
