//! Engine configuration.

use std::time::Duration;

use crate::pipeline::PipelineMode;

/// Labels too generic to count as inventory items.
///
/// Applied to interim backend output before reconciliation when strict
/// class filtering is on. People are excluded from inventory as well,
/// matching the cloud identification prompt.
pub const DEFAULT_GENERIC_LABELS: &[&str] = &[
    "person",
    "wall",
    "floor",
    "ceiling",
    "room",
    "material",
    "furniture",
    "product",
    "design",
    "property",
    "interior",
    "building",
    "font",
    "rectangle",
];

/// Engine configuration.
///
/// Cloud request throttling and per-request timeouts live on the vision
/// client config; this covers the loops, reconciliation and enrichment
/// pacing around it.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Which backends feed the canonical list
    pub mode: PipelineMode,
    /// How often the cloud loop offers the latest frame to the client
    pub cloud_attempt_interval: Duration,
    /// Minimum gap between interim backend inferences
    pub local_min_interval: Duration,
    /// Maximum canonical detections kept per session
    pub canonical_cap: usize,
    /// How long a tracked interim observation blocks re-detection
    pub track_ttl: Duration,
    /// Window during which a repeated name is treated as the same item
    pub name_dedup_window: Duration,
    /// Minimum overlap for two same-class boxes to count as one object
    pub iou_threshold: f64,
    /// Whether detections get queued for attribute enrichment
    pub enrichment_enabled: bool,
    /// Pause between consecutive enrichment dispatches
    pub enrichment_gap: Duration,
    /// Whether generic interim labels are dropped before reconciliation
    pub strict_class_filter: bool,
    /// Lowercased labels dropped by the strict filter
    pub generic_labels: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: PipelineMode::CloudOnly,
            cloud_attempt_interval: Duration::from_millis(500),
            local_min_interval: Duration::from_millis(250),
            canonical_cap: 200,
            track_ttl: Duration::from_secs(10),
            name_dedup_window: Duration::from_secs(10),
            iou_threshold: 0.3,
            enrichment_enabled: true,
            enrichment_gap: Duration::from_secs(1),
            strict_class_filter: true,
            generic_labels: default_generic_labels(),
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            mode: std::env::var("ILENS_PIPELINE_MODE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            cloud_attempt_interval: Duration::from_millis(
                std::env::var("ILENS_CLOUD_ATTEMPT_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(500),
            ),
            local_min_interval: Duration::from_millis(
                std::env::var("ILENS_LOCAL_MIN_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(250),
            ),
            canonical_cap: std::env::var("ILENS_CANONICAL_CAP")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(200),
            track_ttl: Duration::from_secs(
                std::env::var("ILENS_TRACK_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
            name_dedup_window: Duration::from_secs(
                std::env::var("ILENS_NAME_DEDUP_WINDOW_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
            iou_threshold: std::env::var("ILENS_IOU_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0.3),
            enrichment_enabled: std::env::var("ILENS_ENRICHMENT_ENABLED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
            enrichment_gap: Duration::from_millis(
                std::env::var("ILENS_ENRICHMENT_GAP_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            strict_class_filter: std::env::var("ILENS_STRICT_CLASS_FILTER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(true),
            generic_labels: std::env::var("ILENS_GENERIC_LABELS")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|p| p.trim().to_lowercase())
                        .filter(|p| !p.is_empty())
                        .collect()
                })
                .unwrap_or_else(default_generic_labels),
        }
    }

    /// Whether a lowercased label falls under the strict class filter.
    pub fn is_generic_label(&self, label: &str) -> bool {
        if !self.strict_class_filter {
            return false;
        }
        let label = label.trim().to_lowercase();
        self.generic_labels.iter().any(|g| g == &label)
    }
}

fn default_generic_labels() -> Vec<String> {
    DEFAULT_GENERIC_LABELS
        .iter()
        .map(|s| s.to_string())
        .collect()
}
