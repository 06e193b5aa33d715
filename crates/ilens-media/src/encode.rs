//! Frame to image conversion and JPEG encoding.

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, RgbImage};

use ilens_models::{Frame, FrameRotation};

use crate::error::{MediaError, MediaResult};

/// Wraps the frame's raw buffer as an `RgbImage`, buffer orientation.
pub fn frame_to_rgb_image(frame: &Frame) -> MediaResult<RgbImage> {
    RgbImage::from_raw(frame.width, frame.height, frame.rgb.clone())
        .ok_or_else(|| MediaError::invalid_frame("buffer does not match dimensions"))
}

/// Rotates an image from buffer orientation to upright.
pub fn rotate_upright(img: RgbImage, rotation: FrameRotation) -> RgbImage {
    match rotation {
        FrameRotation::None => img,
        FrameRotation::Cw90 => imageops::rotate90(&img),
        FrameRotation::Ccw90 => imageops::rotate270(&img),
        FrameRotation::HalfTurn => imageops::rotate180(&img),
    }
}

/// Returns the frame as an upright `RgbImage`.
pub fn upright_image(frame: &Frame) -> MediaResult<RgbImage> {
    Ok(rotate_upright(frame_to_rgb_image(frame)?, frame.rotation))
}

/// Encodes an RGB image as JPEG.
pub fn encode_rgb_jpeg(img: &RgbImage, quality: u8) -> MediaResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode(img.as_raw(), img.width(), img.height(), image::ExtendedColorType::Rgb8)
        .map_err(|e| MediaError::encode(e.to_string()))?;
    Ok(out)
}

/// Encodes a frame as an upright JPEG, ready for the wire.
pub fn frame_to_jpeg(frame: &Frame, quality: u8) -> MediaResult<Vec<u8>> {
    let img = upright_image(frame)?;
    encode_rgb_jpeg(&img, quality)
}

/// Decodes image bytes (JPEG, PNG, ...) into a frame with the given
/// rotation metadata. Used by the scan harness and in tests.
pub fn decode_image_to_frame(bytes: &[u8], rotation: FrameRotation) -> MediaResult<Frame> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| MediaError::decode(e.to_string()))?
        .to_rgb8();
    let (width, height) = img.dimensions();
    Frame::from_rgb(img.into_raw(), width, height, rotation)
        .map_err(|e| MediaError::invalid_frame(e.to_string()))
}
