//! Session aggregation.
//!
//! Collects which detections a scanning run surfaced. Recording is
//! idempotent, so backends can report the same detection more than once
//! without inflating the count. `finish` runs a final sweep over the
//! canonical list to pick up anything the live events missed, then
//! freezes the session.

use ilens_models::{Detection, DetectionId, ScanSession, SessionId};
use tracing::debug;

/// Builds one [`ScanSession`] over the lifetime of a scanning run.
pub struct SessionAggregator {
    session: ScanSession,
}

impl SessionAggregator {
    pub fn start() -> Self {
        Self {
            session: ScanSession::begin(),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session.id
    }

    pub fn item_count(&self) -> usize {
        self.session.item_count()
    }

    /// Record a detection. Returns `true` when it was new to the session.
    ///
    /// Recording after `finish` is ignored.
    pub fn on_new_detection(&mut self, id: &DetectionId) -> bool {
        if self.session.is_finished() {
            debug!(detection_id = %id, "detection reported after session finished, ignored");
            return false;
        }
        self.session.record(id)
    }

    /// Sweep the canonical list for anything not yet recorded, freeze
    /// the session, and return the finished record.
    pub fn finish(&mut self, canonical: &[Detection]) -> ScanSession {
        if !self.session.is_finished() {
            for detection in canonical {
                if self.session.record(&detection.id) {
                    debug!(
                        detection_id = %detection.id,
                        name = %detection.name,
                        "final sweep picked up unreported detection"
                    );
                }
            }
            self.session.finish();
        }
        self.session.clone()
    }
}
