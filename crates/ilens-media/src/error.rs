//! Error types for raster operations.

use thiserror::Error;

/// Result type for raster operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while cropping, annotating, or encoding frames.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Frame pixels already released")]
    FrameReleased,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Invalid region: {0}")]
    InvalidRegion(String),

    #[error("Image encode failed: {0}")]
    Encode(String),

    #[error("Image decode failed: {0}")]
    Decode(String),

    #[error("Font unavailable: {0}")]
    FontUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MediaError {
    /// Create an invalid frame error.
    pub fn invalid_frame(message: impl Into<String>) -> Self {
        Self::InvalidFrame(message.into())
    }

    /// Create an invalid region error.
    pub fn invalid_region(message: impl Into<String>) -> Self {
        Self::InvalidRegion(message.into())
    }

    /// Create an encode failure error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode(message.into())
    }

    /// Create a decode failure error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }
}
