use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detection::DetectionId;

/// Unique identifier for a scan session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
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

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contiguous scanning run. Records which detections were surfaced
/// between `begin` and `finish`, in first-seen order.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ScanSession {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Detection ids in the order they were first recorded.
    #[serde(default)]
    pub detection_ids: Vec<DetectionId>,
    /// Whether the session's items have been merged into an inventory.
    #[serde(default)]
    pub merged: bool,
}

impl ScanSession {
    pub fn begin() -> Self {
        Self {
            id: SessionId::new(),
            started_at: Utc::now(),
            ended_at: None,
            detection_ids: Vec::new(),
            merged: false,
        }
    }

    /// Records a detection id once. Returns `true` when the id was new
    /// to this session.
    pub fn record(&mut self, id: &DetectionId) -> bool {
        if self.detection_ids.contains(id) {
            return false;
        }
        self.detection_ids.push(id.clone());
        true
    }

    pub fn finish(&mut self) {
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }

    pub fn item_count(&self) -> usize {
        self.detection_ids.len()
    }

    pub fn contains(&self, id: &DetectionId) -> bool {
        self.detection_ids.contains(id)
    }
}
