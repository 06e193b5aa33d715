//! Error types for vision backends.

use thiserror::Error;

/// Result type for vision operations.
pub type VisionResult<T> = Result<T, VisionError>;

/// Errors from cloud identification or on-device inference.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("GEMINI_API_KEY not set")]
    MissingApiKey,

    #[error("Vision API returned {status}: {body}")]
    RequestFailed { status: u16, body: String },

    #[error("Vision API rate limited")]
    RateLimited,

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Empty response from vision API")]
    EmptyResponse,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl VisionError {
    /// Create a request failure error.
    pub fn request_failed(status: u16, body: impl Into<String>) -> Self {
        Self::RequestFailed {
            status,
            body: body.into(),
        }
    }

    /// Create a model not found error.
    pub fn model_not_found(path: impl Into<String>) -> Self {
        Self::ModelNotFound(path.into())
    }

    /// Create an inference failure error.
    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference(message.into())
    }

    /// Create an invalid frame error.
    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether this error came from rate limiting.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited)
    }

    /// Whether a later attempt could succeed without any change on our
    /// side. The throttled analysis loop treats these as skip-and-wait.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited | Self::Timeout(_) | Self::Network(_) | Self::EmptyResponse => true,
            Self::RequestFailed { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
