//! Detection reconciliation: the canonical item list and its dedup rules.
//!
//! Every backend funnels through here. Three rules keep one physical
//! object from appearing twice:
//! - Name window: a name that matches a canonical detection created
//!   within the dedup window is treated as the same item.
//! - Overlap: an interim observation whose class matches a live track
//!   and overlaps it above the IoU threshold refreshes that track.
//! - Class suppression: a same-class observation that does not overlap
//!   any live track is still suppressed while one lives. The bias is
//!   deliberate: under counting beats inflating the inventory.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use ilens_models::{
    ClassLabel, ClassObservation, Detection, DetectionId, EnrichmentReply, Frame, NormalizedRect,
    RawDetection,
};
use tracing::debug;

use crate::config::EngineConfig;

/// A recently sighted interim observation, kept to suppress duplicates
/// until it goes unseen for the track TTL.
#[derive(Debug, Clone)]
struct TrackedRecord {
    detection_id: DetectionId,
    /// Lowercased class label
    class: String,
    rect: NormalizedRect,
    last_seen: Instant,
}

/// What one ingest call changed.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    /// Newly created canonical detections, in creation order.
    pub created: Vec<Detection>,
    /// Observations folded into existing items instead of creating one.
    pub deduplicated: usize,
    /// Detections evicted by the capacity limit.
    pub evicted: usize,
    /// Canonical list size after the call.
    pub total: usize,
}

/// Owns the canonical detection list for one session.
pub struct Reconciler {
    config: EngineConfig,
    canonical: VecDeque<Detection>,
    tracks: Vec<TrackedRecord>,
    /// Normalized name to creation time of the last canonical carrying it.
    /// Not refreshed on later sightings: after the window passes, a
    /// repeated name is allowed to become a second item.
    recent_names: HashMap<String, Instant>,
}

impl Reconciler {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            canonical: VecDeque::new(),
            tracks: Vec::new(),
            recent_names: HashMap::new(),
        }
    }

    /// Ingest one completed cloud identification response.
    ///
    /// Cloud names are trusted as-is; only the name window applies.
    pub fn ingest_cloud(
        &mut self,
        items: Vec<RawDetection>,
        frame: &Arc<Frame>,
        now: Instant,
    ) -> IngestOutcome {
        self.purge_stale(now);
        let mut outcome = IngestOutcome::default();

        for item in items {
            let key = normalize_name(&item.name);
            if key.is_empty() {
                continue;
            }
            if self.name_blocked(&key, now) {
                outcome.deduplicated += 1;
                continue;
            }

            let mut detection = Detection::new(item.name.clone(), Some(Arc::clone(frame)));
            if let Some(rect) = item.rect {
                detection = detection.with_box(item.name.clone(), rect);
            }
            detection.metadata = item.metadata;
            self.admit(detection, key, now, &mut outcome);
        }

        outcome.total = self.canonical.len();
        outcome
    }

    /// Ingest one batch of on-device detector observations.
    pub fn ingest_local(
        &mut self,
        observations: Vec<ClassObservation>,
        frame: &Arc<Frame>,
        now: Instant,
    ) -> IngestOutcome {
        self.purge_stale(now);
        let mut outcome = IngestOutcome::default();

        for obs in observations {
            let class = normalize_name(&obs.label);
            if class.is_empty() || self.config.is_generic_label(&class) {
                continue;
            }

            // An overlapping same-class sighting refreshes its track. A
            // distant one is suppressed without a refresh, so a second
            // physical instance can surface once the track expires.
            let mut same_class = false;
            for track in self.tracks.iter_mut().filter(|t| t.class == class) {
                same_class = true;
                if track.rect.iou(&obs.rect) >= self.config.iou_threshold {
                    track.rect = obs.rect;
                    track.last_seen = now;
                    debug!(detection_id = %track.detection_id, class = %class, "refreshed track");
                    break;
                }
            }
            if same_class {
                outcome.deduplicated += 1;
                continue;
            }

            if self.name_blocked(&class, now) {
                outcome.deduplicated += 1;
                continue;
            }

            let mut detection = Detection::new(obs.label.clone(), Some(Arc::clone(frame)))
                .with_box(obs.label.clone(), obs.rect);
            detection.local_class = Some(class.clone());
            self.tracks.push(TrackedRecord {
                detection_id: detection.id.clone(),
                class: class.clone(),
                rect: obs.rect,
                last_seen: now,
            });
            self.admit(detection, class, now, &mut outcome);
        }

        outcome.total = self.canonical.len();
        outcome
    }

    /// Ingest one whole-frame classification.
    ///
    /// Only the top label that survives the filter is admitted; frame
    /// labels carry no geometry, so the name window is the only dedup.
    pub fn ingest_classifier(
        &mut self,
        labels: Vec<ClassLabel>,
        frame: &Arc<Frame>,
        now: Instant,
    ) -> IngestOutcome {
        self.purge_stale(now);
        let mut outcome = IngestOutcome::default();

        let hit = labels.iter().find(|l| {
            let key = normalize_name(&l.label);
            !key.is_empty() && !self.config.is_generic_label(&key)
        });
        if let Some(hit) = hit {
            let key = normalize_name(&hit.label);
            if self.name_blocked(&key, now) {
                outcome.deduplicated += 1;
            } else {
                let mut detection = Detection::new(hit.label.clone(), Some(Arc::clone(frame)));
                detection.local_class = Some(key.clone());
                self.admit(detection, key, now, &mut outcome);
            }
        }

        outcome.total = self.canonical.len();
        outcome
    }

    /// Merge an enrichment reply into the detection it was requested for.
    ///
    /// Returns `false` when the detection is gone, typically evicted
    /// while the request was in flight. Attributes only fill fields that
    /// are still empty; the display name is corrected when the reply
    /// carries one.
    pub fn apply_enrichment(&mut self, id: &DetectionId, reply: EnrichmentReply) -> bool {
        let Some(detection) = self.canonical.iter_mut().find(|d| &d.id == id) else {
            debug!(detection_id = %id, "enrichment target no longer in canonical list");
            return false;
        };

        if let Some(name) = &reply.name {
            if !name.trim().is_empty() && !detection.matches_name(name) {
                debug!(
                    detection_id = %id,
                    from = %detection.name,
                    to = %name,
                    "enrichment corrected item name"
                );
                detection.name = name.trim().to_string();
            }
        }
        let metadata = reply.into_metadata();
        detection.metadata.merge_from(&metadata);
        true
    }

    /// Drop tracks and name stamps older than their windows.
    pub fn purge_stale(&mut self, now: Instant) {
        let ttl = self.config.track_ttl;
        self.tracks.retain(|t| now.duration_since(t.last_seen) < ttl);
        let window = self.config.name_dedup_window;
        self.recent_names.retain(|_, at| now.duration_since(*at) < window);
    }

    /// Snapshot of the canonical list, oldest first.
    pub fn detections(&self) -> Vec<Detection> {
        self.canonical.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }

    pub fn get(&self, id: &DetectionId) -> Option<&Detection> {
        self.canonical.iter().find(|d| &d.id == id)
    }

    pub fn live_track_count(&self, now: Instant) -> usize {
        self.tracks
            .iter()
            .filter(|t| now.duration_since(t.last_seen) < self.config.track_ttl)
            .count()
    }

    /// Clear all state for a fresh session.
    pub fn reset(&mut self) {
        self.canonical.clear();
        self.tracks.clear();
        self.recent_names.clear();
    }

    fn name_blocked(&self, key: &str, now: Instant) -> bool {
        self.recent_names
            .get(key)
            .is_some_and(|at| now.duration_since(*at) < self.config.name_dedup_window)
    }

    fn admit(
        &mut self,
        detection: Detection,
        key: String,
        now: Instant,
        outcome: &mut IngestOutcome,
    ) {
        self.recent_names.insert(key, now);
        outcome.created.push(detection.clone());
        self.canonical.push_back(detection);
        outcome.evicted += self.enforce_capacity();
    }

    /// Evict oldest-first until the list fits. Frames are released
    /// before removal so eviction always frees the pixels, even when a
    /// snapshot of the detection is still held elsewhere.
    fn enforce_capacity(&mut self) -> usize {
        let mut evicted = 0;
        while self.canonical.len() > self.config.canonical_cap {
            if let Some(mut oldest) = self.canonical.pop_front() {
                oldest.release_frame();
                debug!(
                    detection_id = %oldest.id,
                    name = %oldest.name,
                    "canonical list full, evicted oldest detection"
                );
                evicted += 1;
            }
        }
        evicted
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;
    use std::time::Duration;

    use ilens_models::FrameRotation;

    fn test_config() -> EngineConfig {
        EngineConfig::default()
    }

    fn test_frame() -> Arc<Frame> {
        Arc::new(Frame::from_rgb(vec![0u8; 27], 3, 3, FrameRotation::None).unwrap())
    }

    fn rect(x: f64, y: f64, w: f64, h: f64) -> NormalizedRect {
        NormalizedRect::new(x, y, w, h)
    }

    fn named(name: &str) -> RawDetection {
        RawDetection::new(name, Some(rect(0.1, 0.1, 0.2, 0.2)))
    }

    #[test]
    fn test_cloud_items_create_detections() {
        let mut rec = Reconciler::new(test_config());
        let frame = test_frame();
        let out = rec.ingest_cloud(
            vec![named("ceramic mug"), named("desk lamp")],
            &frame,
            Instant::now(),
        );
        assert_eq!(out.created.len(), 2);
        assert_eq!(out.total, 2);
        assert_eq!(rec.len(), 2);
        assert_eq!(out.created[0].name, "ceramic mug");
        assert!(out.created[0].has_frame());
        assert_eq!(out.created[0].boxes.len(), 1);
    }

    #[test]
    fn test_cloud_item_without_box_kept() {
        let mut rec = Reconciler::new(test_config());
        let frame = test_frame();
        let out = rec.ingest_cloud(vec![RawDetection::bare("poster")], &frame, Instant::now());
        assert_eq!(out.created.len(), 1);
        assert!(out.created[0].boxes.is_empty());
    }

    #[test]
    fn test_name_window_blocks_repeat_until_it_passes() {
        let mut rec = Reconciler::new(test_config());
        let frame = test_frame();
        let t0 = Instant::now();

        rec.ingest_cloud(vec![named("toaster")], &frame, t0);
        let mid = rec.ingest_cloud(vec![named("toaster")], &frame, t0 + Duration::from_secs(5));
        assert_eq!(mid.created.len(), 0);
        assert_eq!(mid.deduplicated, 1);
        assert_eq!(rec.len(), 1);

        let late = rec.ingest_cloud(vec![named("toaster")], &frame, t0 + Duration::from_secs(11));
        assert_eq!(late.created.len(), 1);
        assert_eq!(rec.len(), 2);
    }

    #[test]
    fn test_name_match_is_case_insensitive() {
        let mut rec = Reconciler::new(test_config());
        let frame = test_frame();
        let t0 = Instant::now();
        rec.ingest_cloud(vec![named("Coffee Mug")], &frame, t0);
        let out = rec.ingest_cloud(vec![named("coffee mug")], &frame, t0 + Duration::from_secs(1));
        assert_eq!(out.deduplicated, 1);
        assert_eq!(rec.len(), 1);
    }

    #[test]
    fn test_repeated_name_within_one_response_collapses() {
        let mut rec = Reconciler::new(test_config());
        let frame = test_frame();
        let out = rec.ingest_cloud(
            vec![named("fork"), named("fork"), named("fork")],
            &frame,
            Instant::now(),
        );
        assert_eq!(out.created.len(), 1);
        assert_eq!(out.deduplicated, 2);
    }

    #[test]
    fn test_local_overlapping_same_class_collapses() {
        let mut rec = Reconciler::new(test_config());
        let frame = test_frame();
        let t0 = Instant::now();

        let first = rec.ingest_local(
            vec![ClassObservation::new("cup", rect(0.2, 0.2, 0.2, 0.2), 0.9)],
            &frame,
            t0,
        );
        assert_eq!(first.created.len(), 1);
        assert_eq!(first.created[0].local_class.as_deref(), Some("cup"));

        // Slightly shifted sighting of the same cup
        let second = rec.ingest_local(
            vec![ClassObservation::new("cup", rect(0.22, 0.22, 0.2, 0.2), 0.8)],
            &frame,
            t0 + Duration::from_millis(300),
        );
        assert_eq!(second.created.len(), 0);
        assert_eq!(second.deduplicated, 1);
        assert_eq!(rec.len(), 1);
        assert_eq!(rec.live_track_count(t0 + Duration::from_millis(300)), 1);
    }

    #[test]
    fn test_local_distant_same_class_suppressed() {
        let mut rec = Reconciler::new(test_config());
        let frame = test_frame();
        let t0 = Instant::now();

        rec.ingest_local(
            vec![ClassObservation::new("cup", rect(0.0, 0.0, 0.2, 0.2), 0.9)],
            &frame,
            t0,
        );
        // No overlap at all, still the same class
        let out = rec.ingest_local(
            vec![ClassObservation::new("cup", rect(0.7, 0.7, 0.2, 0.2), 0.9)],
            &frame,
            t0 + Duration::from_secs(1),
        );
        assert_eq!(out.created.len(), 0);
        assert_eq!(out.deduplicated, 1);
        assert_eq!(rec.len(), 1);
    }

    #[test]
    fn test_local_new_class_creates_detection() {
        let mut rec = Reconciler::new(test_config());
        let frame = test_frame();
        let t0 = Instant::now();
        rec.ingest_local(
            vec![ClassObservation::new("cup", rect(0.1, 0.1, 0.2, 0.2), 0.9)],
            &frame,
            t0,
        );
        let out = rec.ingest_local(
            vec![ClassObservation::new("book", rect(0.1, 0.1, 0.2, 0.2), 0.9)],
            &frame,
            t0 + Duration::from_millis(250),
        );
        assert_eq!(out.created.len(), 1);
        assert_eq!(rec.len(), 2);
    }

    #[test]
    fn test_track_expiry_allows_second_instance() {
        let mut rec = Reconciler::new(test_config());
        let frame = test_frame();
        let t0 = Instant::now();

        rec.ingest_local(
            vec![ClassObservation::new("cup", rect(0.2, 0.2, 0.2, 0.2), 0.9)],
            &frame,
            t0,
        );
        // Overlapping sighting at t+5 refreshes the track
        rec.ingest_local(
            vec![ClassObservation::new("cup", rect(0.21, 0.2, 0.2, 0.2), 0.9)],
            &frame,
            t0 + Duration::from_secs(5),
        );
        // At t+12 the name window (anchored at creation) has passed but
        // the refreshed track still suppresses a distant cup.
        let blocked = rec.ingest_local(
            vec![ClassObservation::new("cup", rect(0.7, 0.7, 0.2, 0.2), 0.9)],
            &frame,
            t0 + Duration::from_secs(12),
        );
        assert_eq!(blocked.created.len(), 0);
        assert_eq!(rec.len(), 1);

        // At t+16 the track (last refreshed t+5) has expired too.
        let allowed = rec.ingest_local(
            vec![ClassObservation::new("cup", rect(0.7, 0.7, 0.2, 0.2), 0.9)],
            &frame,
            t0 + Duration::from_secs(16),
        );
        assert_eq!(allowed.created.len(), 1);
        assert_eq!(rec.len(), 2);
    }

    #[test]
    fn test_generic_labels_filtered() {
        let mut rec = Reconciler::new(test_config());
        let frame = test_frame();
        let out = rec.ingest_local(
            vec![
                ClassObservation::new("wall", rect(0.0, 0.0, 1.0, 1.0), 0.9),
                ClassObservation::new("person", rect(0.3, 0.1, 0.2, 0.8), 0.95),
            ],
            &frame,
            Instant::now(),
        );
        assert_eq!(out.created.len(), 0);
        assert_eq!(out.deduplicated, 0);
        assert!(rec.is_empty());
    }

    #[test]
    fn test_generic_filter_can_be_relaxed() {
        let config = EngineConfig {
            strict_class_filter: false,
            ..test_config()
        };
        let mut rec = Reconciler::new(config);
        let frame = test_frame();
        let out = rec.ingest_local(
            vec![ClassObservation::new("wall", rect(0.0, 0.0, 1.0, 1.0), 0.9)],
            &frame,
            Instant::now(),
        );
        assert_eq!(out.created.len(), 1);
    }

    #[test]
    fn test_classifier_takes_top_surviving_label() {
        let mut rec = Reconciler::new(test_config());
        let frame = test_frame();
        let out = rec.ingest_classifier(
            vec![
                ClassLabel::new("wall", 0.9),
                ClassLabel::new("keyboard", 0.8),
                ClassLabel::new("mouse", 0.7),
            ],
            &frame,
            Instant::now(),
        );
        assert_eq!(out.created.len(), 1);
        assert_eq!(out.created[0].name, "keyboard");
        assert!(out.created[0].boxes.is_empty());
        assert!(out.created[0].has_frame());
        assert_eq!(rec.len(), 1);
    }

    #[test]
    fn test_classifier_respects_name_window() {
        let mut rec = Reconciler::new(test_config());
        let frame = test_frame();
        let t0 = Instant::now();
        rec.ingest_classifier(vec![ClassLabel::new("keyboard", 0.8)], &frame, t0);
        let out = rec.ingest_classifier(
            vec![ClassLabel::new("keyboard", 0.85)],
            &frame,
            t0 + Duration::from_secs(3),
        );
        assert_eq!(out.created.len(), 0);
        assert_eq!(out.deduplicated, 1);
    }

    #[test]
    fn test_capacity_evicts_oldest_and_releases_frames() {
        let config = EngineConfig {
            canonical_cap: 5,
            ..test_config()
        };
        let mut rec = Reconciler::new(config);
        let t0 = Instant::now();

        let mut weak_frames: Vec<Weak<Frame>> = Vec::new();
        let mut evicted_total = 0;
        for i in 0..8 {
            let frame = test_frame();
            weak_frames.push(Arc::downgrade(&frame));
            let out = rec.ingest_cloud(vec![RawDetection::bare(format!("item {i}"))], &frame, t0);
            evicted_total += out.evicted;
        }

        assert_eq!(rec.len(), 5);
        assert_eq!(evicted_total, 3);
        let names: Vec<String> = rec.detections().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names[0], "item 3");
        assert_eq!(names[4], "item 7");

        // Evicted detections dropped their frames; survivors kept theirs.
        for (i, weak) in weak_frames.iter().enumerate() {
            if i < 3 {
                assert!(weak.upgrade().is_none(), "frame {i} should be released");
            } else {
                assert!(weak.upgrade().is_some(), "frame {i} should be retained");
            }
        }
    }

    #[test]
    fn test_apply_enrichment_merges_and_corrects_name() {
        let mut rec = Reconciler::new(test_config());
        let frame = test_frame();
        let out = rec.ingest_cloud(vec![named("mug")], &frame, Instant::now());
        let id = out.created[0].id.clone();

        let applied = rec.apply_enrichment(
            &id,
            EnrichmentReply {
                name: Some("espresso cup".to_string()),
                brand: Some("Bialetti".to_string()),
                color: Some("red".to_string()),
                size: None,
                category: Some("kitchenware".to_string()),
            },
        );
        assert!(applied);
        let det = rec.get(&id).unwrap();
        assert_eq!(det.name, "espresso cup");
        assert_eq!(det.metadata.brand.as_deref(), Some("Bialetti"));

        // A second reply never overwrites filled fields.
        rec.apply_enrichment(
            &id,
            EnrichmentReply {
                brand: Some("DeLonghi".to_string()),
                size: Some("small".to_string()),
                ..Default::default()
            },
        );
        let det = rec.get(&id).unwrap();
        assert_eq!(det.metadata.brand.as_deref(), Some("Bialetti"));
        assert_eq!(det.metadata.size.as_deref(), Some("small"));
    }

    #[test]
    fn test_apply_enrichment_unknown_id() {
        let mut rec = Reconciler::new(test_config());
        assert!(!rec.apply_enrichment(&DetectionId::new(), EnrichmentReply::default()));
    }

    #[test]
    fn test_enrichment_after_eviction_is_dropped() {
        let config = EngineConfig {
            canonical_cap: 1,
            ..test_config()
        };
        let mut rec = Reconciler::new(config);
        let frame = test_frame();
        let t0 = Instant::now();
        let first = rec.ingest_cloud(vec![named("vase")], &frame, t0);
        let id = first.created[0].id.clone();
        rec.ingest_cloud(vec![named("clock")], &frame, t0 + Duration::from_secs(1));

        assert!(!rec.apply_enrichment(
            &id,
            EnrichmentReply {
                brand: Some("Ikea".to_string()),
                ..Default::default()
            }
        ));
    }

    #[test]
    fn test_reset_clears_session_state() {
        let mut rec = Reconciler::new(test_config());
        let frame = test_frame();
        let t0 = Instant::now();
        rec.ingest_cloud(vec![named("plant pot")], &frame, t0);
        assert_eq!(rec.len(), 1);

        rec.reset();
        assert!(rec.is_empty());

        // The name window does not survive a reset.
        let out = rec.ingest_cloud(vec![named("plant pot")], &frame, t0 + Duration::from_secs(1));
        assert_eq!(out.created.len(), 1);
    }
}
