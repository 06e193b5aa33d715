//! Engine error types.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine is not running")]
    NotRunning,

    #[error("Engine is already running")]
    AlreadyRunning,

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Session sink failed: {0}")]
    SinkFailed(String),

    #[error("Vision error: {0}")]
    Vision(#[from] ilens_vision::VisionError),

    #[error("Media error: {0}")]
    Media(#[from] ilens_media::MediaError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn backend_unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    pub fn sink_failed(msg: impl Into<String>) -> Self {
        Self::SinkFailed(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if the error means the engine was used in the wrong run state.
    pub fn is_state_error(&self) -> bool {
        matches!(self, EngineError::NotRunning | EngineError::AlreadyRunning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::backend_unavailable("no cloud client configured");
        assert_eq!(
            err.to_string(),
            "Backend unavailable: no cloud client configured"
        );
    }

    #[test]
    fn test_state_errors() {
        assert!(EngineError::NotRunning.is_state_error());
        assert!(EngineError::AlreadyRunning.is_state_error());
        assert!(!EngineError::sink_failed("disk full").is_state_error());
    }
}
