use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Buffer size mismatch: expected {expected} bytes for {width}x{height} RGB, got {actual}")]
    BufferSize {
        expected: usize,
        actual: usize,
        width: u32,
        height: u32,
    },

    #[error("Frame dimensions must be non-zero: {width}x{height}")]
    EmptyDimensions { width: u32, height: u32 },
}

/// Rotation to apply to the stored pixel buffer to obtain the upright image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameRotation {
    /// Buffer is already upright.
    None,
    /// Rotate 90 degrees clockwise to get the upright image.
    Cw90,
    /// Rotate 90 degrees counter-clockwise to get the upright image.
    Ccw90,
    /// Rotate 180 degrees to get the upright image.
    HalfTurn,
}

impl FrameRotation {
    pub const ALL: [FrameRotation; 4] = [
        FrameRotation::None,
        FrameRotation::Cw90,
        FrameRotation::Ccw90,
        FrameRotation::HalfTurn,
    ];

    pub fn as_degrees(&self) -> u32 {
        match self {
            FrameRotation::None => 0,
            FrameRotation::Cw90 => 90,
            FrameRotation::Ccw90 => 270,
            FrameRotation::HalfTurn => 180,
        }
    }

    /// Whether this rotation swaps width and height.
    pub fn swaps_axes(&self) -> bool {
        matches!(self, FrameRotation::Cw90 | FrameRotation::Ccw90)
    }
}

impl Default for FrameRotation {
    fn default() -> Self {
        FrameRotation::None
    }
}

/// A captured camera frame: packed RGB pixels plus the rotation needed
/// to display it upright. Normalized rects attached to detections are
/// expressed in the upright orientation, not buffer orientation.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Packed RGB8 pixel data in buffer orientation, row-major.
    pub rgb: Vec<u8>,
    /// Buffer width in pixels.
    pub width: u32,
    /// Buffer height in pixels.
    pub height: u32,
    /// Rotation from buffer orientation to upright.
    pub rotation: FrameRotation,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    /// Builds a frame from a packed RGB8 buffer, validating its size.
    pub fn from_rgb(
        rgb: Vec<u8>,
        width: u32,
        height: u32,
        rotation: FrameRotation,
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyDimensions { width, height });
        }
        let expected = width as usize * height as usize * 3;
        if rgb.len() != expected {
            return Err(FrameError::BufferSize {
                expected,
                actual: rgb.len(),
                width,
                height,
            });
        }
        Ok(Self {
            rgb,
            width,
            height,
            rotation,
            captured_at: Utc::now(),
        })
    }

    /// Upright (display) dimensions after applying the rotation.
    pub fn display_size(&self) -> (u32, u32) {
        if self.rotation.swaps_axes() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }

    /// Approximate heap footprint of the pixel buffer, in bytes.
    pub fn byte_len(&self) -> usize {
        self.rgb.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(width: u32, height: u32, rotation: FrameRotation) -> Frame {
        let rgb = vec![127u8; width as usize * height as usize * 3];
        Frame::from_rgb(rgb, width, height, rotation).unwrap()
    }

    #[test]
    fn test_from_rgb_valid() {
        let frame = solid_frame(4, 2, FrameRotation::None);
        assert_eq!(frame.byte_len(), 24);
        assert_eq!(frame.display_size(), (4, 2));
    }

    #[test]
    fn test_from_rgb_rejects_bad_buffer() {
        let err = Frame::from_rgb(vec![0u8; 10], 4, 2, FrameRotation::None).unwrap_err();
        assert!(matches!(err, FrameError::BufferSize { expected: 24, actual: 10, .. }));
    }

    #[test]
    fn test_from_rgb_rejects_zero_dims() {
        let err = Frame::from_rgb(Vec::new(), 0, 2, FrameRotation::None).unwrap_err();
        assert!(matches!(err, FrameError::EmptyDimensions { .. }));
    }

    #[test]
    fn test_display_size_swaps_for_quarter_turns() {
        assert_eq!(solid_frame(4, 2, FrameRotation::Cw90).display_size(), (2, 4));
        assert_eq!(solid_frame(4, 2, FrameRotation::Ccw90).display_size(), (2, 4));
        assert_eq!(solid_frame(4, 2, FrameRotation::HalfTurn).display_size(), (4, 2));
    }

    #[test]
    fn test_rotation_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&FrameRotation::Cw90).unwrap(),
            "\"cw90\""
        );
        assert_eq!(
            serde_json::from_str::<FrameRotation>("\"half_turn\"").unwrap(),
            FrameRotation::HalfTurn
        );
    }
}
