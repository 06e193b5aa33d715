//! Pipeline modes and the cloud handoff state machine.
//!
//! Every mode keeps the cloud identifier running for the whole session.
//! The modes differ in which interim backend runs alongside it and for
//! how long: hybrid keeps the on-device detector running continuously,
//! while the bootstrap modes gate the interim backend off permanently
//! after the first completed cloud response.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which backends feed the canonical detection list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Cloud identification only.
    #[default]
    CloudOnly,
    /// Cloud plus a continuously running on-device detector.
    Hybrid,
    /// On-device detector until the first cloud response, then cloud only.
    BootstrapHandoff,
    /// Frame classifier until the first cloud response, then cloud only.
    ClassifierBootstrap,
}

impl PipelineMode {
    pub const ALL: [PipelineMode; 4] = [
        PipelineMode::CloudOnly,
        PipelineMode::Hybrid,
        PipelineMode::BootstrapHandoff,
        PipelineMode::ClassifierBootstrap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineMode::CloudOnly => "cloud_only",
            PipelineMode::Hybrid => "hybrid",
            PipelineMode::BootstrapHandoff => "bootstrap_handoff",
            PipelineMode::ClassifierBootstrap => "classifier_bootstrap",
        }
    }

    /// Whether the mode runs the on-device object detector.
    pub fn uses_local_detector(&self) -> bool {
        matches!(
            self,
            PipelineMode::Hybrid | PipelineMode::BootstrapHandoff
        )
    }

    /// Whether the mode runs the whole-frame classifier.
    pub fn uses_classifier(&self) -> bool {
        matches!(self, PipelineMode::ClassifierBootstrap)
    }

    /// Whether the interim backend stops after the first cloud response.
    pub fn hands_off(&self) -> bool {
        matches!(
            self,
            PipelineMode::BootstrapHandoff | PipelineMode::ClassifierBootstrap
        )
    }
}

impl FromStr for PipelineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cloud_only" | "cloud" => Ok(PipelineMode::CloudOnly),
            "hybrid" => Ok(PipelineMode::Hybrid),
            "bootstrap_handoff" | "bootstrap" => Ok(PipelineMode::BootstrapHandoff),
            "classifier_bootstrap" | "classifier" => Ok(PipelineMode::ClassifierBootstrap),
            other => Err(format!("unknown pipeline mode: {other}")),
        }
    }
}

/// Where the session is relative to the cloud handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    /// No cloud response has completed yet.
    AwaitingFirstCloud,
    /// At least one cloud round trip completed.
    SteadyState,
}

/// Tracks the handoff for one session.
///
/// The handoff fires exactly once, on the first completed cloud round
/// trip (even when it identified nothing), and is irreversible for the
/// rest of the session.
#[derive(Debug)]
pub struct PipelineState {
    mode: PipelineMode,
    phase: PipelinePhase,
}

impl PipelineState {
    pub fn new(mode: PipelineMode) -> Self {
        Self {
            mode,
            phase: PipelinePhase::AwaitingFirstCloud,
        }
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    pub fn phase(&self) -> PipelinePhase {
        self.phase
    }

    /// Record a completed cloud round trip.
    ///
    /// Returns `true` when this response triggered the handoff, i.e. it
    /// was the first response in a hands-off mode.
    pub fn on_cloud_response(&mut self) -> bool {
        let handoff =
            self.mode.hands_off() && self.phase == PipelinePhase::AwaitingFirstCloud;
        self.phase = PipelinePhase::SteadyState;
        handoff
    }

    /// Whether interim backend results may still enter the canonical list.
    ///
    /// Results from an inference that was already running when the
    /// handoff fired must be checked against this again before ingest.
    pub fn interim_results_allowed(&self) -> bool {
        match self.mode {
            PipelineMode::CloudOnly => false,
            PipelineMode::Hybrid => true,
            PipelineMode::BootstrapHandoff | PipelineMode::ClassifierBootstrap => {
                self.phase == PipelinePhase::AwaitingFirstCloud
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_serde_snake_case() {
        let json = serde_json::to_string(&PipelineMode::BootstrapHandoff).unwrap();
        assert_eq!(json, "\"bootstrap_handoff\"");
        let mode: PipelineMode = serde_json::from_str("\"classifier_bootstrap\"").unwrap();
        assert_eq!(mode, PipelineMode::ClassifierBootstrap);
    }

    #[test]
    fn test_mode_from_str_accepts_short_names() {
        assert_eq!(
            "bootstrap".parse::<PipelineMode>().unwrap(),
            PipelineMode::BootstrapHandoff
        );
        assert_eq!(
            "Cloud_Only".parse::<PipelineMode>().unwrap(),
            PipelineMode::CloudOnly
        );
        assert!("turbo".parse::<PipelineMode>().is_err());
    }

    #[test]
    fn test_backend_selection_per_mode() {
        assert!(!PipelineMode::CloudOnly.uses_local_detector());
        assert!(PipelineMode::Hybrid.uses_local_detector());
        assert!(!PipelineMode::Hybrid.hands_off());
        assert!(PipelineMode::BootstrapHandoff.uses_local_detector());
        assert!(PipelineMode::BootstrapHandoff.hands_off());
        assert!(PipelineMode::ClassifierBootstrap.uses_classifier());
        assert!(!PipelineMode::ClassifierBootstrap.uses_local_detector());
    }

    #[test]
    fn test_handoff_fires_exactly_once() {
        let mut state = PipelineState::new(PipelineMode::BootstrapHandoff);
        assert!(state.interim_results_allowed());
        assert!(state.on_cloud_response());
        assert!(!state.interim_results_allowed());
        // Later responses never re-fire the handoff.
        assert!(!state.on_cloud_response());
        assert_eq!(state.phase(), PipelinePhase::SteadyState);
    }

    #[test]
    fn test_hybrid_keeps_interim_results_after_cloud_response() {
        let mut state = PipelineState::new(PipelineMode::Hybrid);
        assert!(!state.on_cloud_response());
        assert!(state.interim_results_allowed());
    }

    #[test]
    fn test_cloud_only_never_allows_interim_results() {
        let state = PipelineState::new(PipelineMode::CloudOnly);
        assert!(!state.interim_results_allowed());
    }
}
