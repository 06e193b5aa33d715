//! Thumbnail rendering for identified items.
//!
//! With a bounding box the thumbnail is a padded crop around the item
//! with an outline and label; without one it is the scaled full frame
//! carrying an explicit missing-box marker, so the two cases are never
//! visually interchangeable.

use std::path::PathBuf;

use ab_glyph::FontVec;
use image::{imageops, RgbImage};
use imageproc::rect::Rect;
use tracing::debug;

use ilens_models::{Detection, Frame, LabeledBox};

use crate::annotate::{draw_label, draw_missing_box_marker, draw_outline, label_color};
use crate::crop::crop_region;
use crate::encode::{encode_rgb_jpeg, upright_image};
use crate::error::{MediaError, MediaResult};

/// Output thumbnails are scaled down to at most this width.
pub const THUMBNAIL_MAX_WIDTH: u32 = 480;

const LABEL_BAR_OFFSET: i32 = 18;

/// Configuration for thumbnail rendering.
#[derive(Debug, Clone)]
pub struct ThumbnailConfig {
    /// Maximum output width in pixels; aspect ratio is preserved.
    pub max_width: u32,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
    /// How much to grow the box on each side, as a fraction of its size.
    pub box_expand: f64,
    /// Outline width in pixels
    pub outline_thickness: u32,
    /// Optional TTF/OTF font for label text. Without it, labels render
    /// as a bare color bar.
    pub font_path: Option<PathBuf>,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            max_width: THUMBNAIL_MAX_WIDTH,
            jpeg_quality: 80,
            box_expand: 0.15,
            outline_thickness: 3,
            font_path: None,
        }
    }
}

/// Renders item thumbnails. Loads the label font once at construction.
pub struct ThumbnailRenderer {
    config: ThumbnailConfig,
    font: Option<FontVec>,
}

impl ThumbnailRenderer {
    /// Create a renderer, loading the label font when one is configured.
    ///
    /// Returns an error if a font path is set but the file cannot be
    /// read or parsed.
    pub fn new(config: ThumbnailConfig) -> MediaResult<Self> {
        let font = match &config.font_path {
            Some(path) => {
                let bytes = std::fs::read(path).map_err(|e| {
                    MediaError::FontUnavailable(format!("{}: {}", path.display(), e))
                })?;
                let font = FontVec::try_from_vec(bytes).map_err(|e| {
                    MediaError::FontUnavailable(format!("{}: {}", path.display(), e))
                })?;
                debug!(path = %path.display(), "thumbnail label font loaded");
                Some(font)
            }
            None => None,
        };
        Ok(Self { config, font })
    }

    /// Renderer with default settings and no font asset.
    pub fn with_defaults() -> Self {
        Self {
            config: ThumbnailConfig::default(),
            font: None,
        }
    }

    pub fn config(&self) -> &ThumbnailConfig {
        &self.config
    }

    /// Renders the thumbnail for a detection as JPEG bytes.
    ///
    /// Fails with `MediaError::FrameReleased` when the detection's frame
    /// has been dropped by capacity eviction.
    pub fn render(&self, detection: &Detection) -> MediaResult<Vec<u8>> {
        let frame = detection
            .frame
            .as_deref()
            .ok_or(MediaError::FrameReleased)?;

        match detection.primary_box() {
            Some(labeled) => self.render_boxed(&detection.name, frame, labeled),
            None => self.render_missing_box(frame),
        }
    }

    fn render_boxed(&self, name: &str, frame: &Frame, labeled: &LabeledBox) -> MediaResult<Vec<u8>> {
        let expanded = labeled.rect.expanded(self.config.box_expand);
        let crop = crop_region(frame, &expanded)?;
        let mut img = scale_to_width(crop, self.config.max_width);
        let (out_w, out_h) = img.dimensions();

        // Position of the unexpanded box inside the padded crop.
        let rel_x = ((labeled.rect.x - expanded.x) / expanded.width).clamp(0.0, 1.0);
        let rel_y = ((labeled.rect.y - expanded.y) / expanded.height).clamp(0.0, 1.0);
        let rel_w = (labeled.rect.width / expanded.width).clamp(0.0, 1.0);
        let rel_h = (labeled.rect.height / expanded.height).clamp(0.0, 1.0);

        let bx = (rel_x * out_w as f64).round() as i32;
        let by = (rel_y * out_h as f64).round() as i32;
        let bw = ((rel_w * out_w as f64).round() as u32).clamp(2, out_w);
        let bh = ((rel_h * out_h as f64).round() as u32).clamp(2, out_h);

        let color = label_color(&labeled.label);
        draw_outline(
            &mut img,
            Rect::at(bx, by).of_size(bw, bh),
            color,
            self.config.outline_thickness,
        );
        draw_label(
            &mut img,
            bx,
            by - LABEL_BAR_OFFSET,
            name,
            color,
            self.font.as_ref(),
        );

        encode_rgb_jpeg(&img, self.config.jpeg_quality)
    }

    fn render_missing_box(&self, frame: &Frame) -> MediaResult<Vec<u8>> {
        let img = upright_image(frame)?;
        let mut img = scale_to_width(img, self.config.max_width);
        draw_missing_box_marker(&mut img, self.font.as_ref());
        encode_rgb_jpeg(&img, self.config.jpeg_quality)
    }
}

/// Downscales to `max_width` preserving aspect ratio; never upscales.
fn scale_to_width(img: RgbImage, max_width: u32) -> RgbImage {
    let (w, h) = img.dimensions();
    if w <= max_width {
        return img;
    }
    let out_h = ((h as f64 * max_width as f64 / w as f64).round() as u32).max(1);
    imageops::resize(&img, max_width, out_h, imageops::FilterType::Triangle)
}
