//! Rotation-aware mapping from display-space rects to raw buffer pixels.
//!
//! Detections carry normalized rects in the upright (display) orientation
//! while frame pixels are stored in buffer orientation. Cropping therefore
//! maps the rect through the inverse of the frame's rotation before
//! touching pixels, then rotates the cropped region upright.

use image::{imageops, RgbImage};

use ilens_models::{Frame, FrameRotation, NormalizedRect};

use crate::encode::{frame_to_rgb_image, rotate_upright};
use crate::error::{MediaError, MediaResult};

/// Axis-aligned pixel rectangle in buffer orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Maps a normalized display-space rect into buffer pixel coordinates.
///
/// The rect is clamped to the unit square first; the returned pixel rect
/// always has at least one pixel in each dimension.
pub fn map_display_rect_to_raw(rect: &NormalizedRect, frame: &Frame) -> MediaResult<PixelRect> {
    if rect.width <= 0.0 || rect.height <= 0.0 {
        return Err(MediaError::invalid_region(format!(
            "degenerate rect {}x{}",
            rect.width, rect.height
        )));
    }
    let r = rect.clamped();
    if r.width <= 0.0 || r.height <= 0.0 {
        return Err(MediaError::invalid_region("rect entirely outside frame"));
    }

    // Inverse of the buffer-to-upright rotation, in normalized coordinates.
    let (bx1, by1, bx2, by2) = match frame.rotation {
        FrameRotation::None => (r.x, r.y, r.x2(), r.y2()),
        FrameRotation::Cw90 => (r.y, 1.0 - r.x2(), r.y2(), 1.0 - r.x),
        FrameRotation::Ccw90 => (1.0 - r.y2(), r.x, 1.0 - r.y, r.x2()),
        FrameRotation::HalfTurn => (1.0 - r.x2(), 1.0 - r.y2(), 1.0 - r.x, 1.0 - r.y),
    };

    let w = frame.width as f64;
    let h = frame.height as f64;
    let px1 = (bx1 * w).floor().clamp(0.0, w - 1.0) as u32;
    let py1 = (by1 * h).floor().clamp(0.0, h - 1.0) as u32;
    let px2 = (bx2 * w).ceil().clamp(1.0, w) as u32;
    let py2 = (by2 * h).ceil().clamp(1.0, h) as u32;

    Ok(PixelRect {
        x: px1,
        y: py1,
        width: px2.saturating_sub(px1).max(1),
        height: py2.saturating_sub(py1).max(1),
    })
}

/// Crops a display-space region out of a frame, returning an upright
/// RGB image of the region.
pub fn crop_region(frame: &Frame, rect: &NormalizedRect) -> MediaResult<RgbImage> {
    let pixel = map_display_rect_to_raw(rect, frame)?;
    let raw = frame_to_rgb_image(frame)?;
    let sub = imageops::crop_imm(&raw, pixel.x, pixel.y, pixel.width, pixel.height).to_image();
    Ok(rotate_upright(sub, frame.rotation))
}

/// Crops a display-space region and encodes it as JPEG. Used for
/// per-item enrichment requests.
pub fn crop_to_jpeg(frame: &Frame, rect: &NormalizedRect, quality: u8) -> MediaResult<Vec<u8>> {
    let img = crop_region(frame, rect)?;
    crate::encode::encode_rgb_jpeg(&img, quality)
}
