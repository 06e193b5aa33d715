//! Drawing primitives for thumbnails: outlines, label bars, and the
//! missing-box marker.

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut,
};
use imageproc::rect::Rect;

/// Fixed palette for label colors. Chosen to stay readable on both
/// light and dark crops.
const LABEL_PALETTE: [[u8; 3]; 8] = [
    [230, 126, 34],
    [46, 204, 113],
    [52, 152, 219],
    [155, 89, 182],
    [241, 196, 15],
    [26, 188, 156],
    [231, 76, 60],
    [149, 165, 166],
];

const LABEL_BAR_HEIGHT: u32 = 18;
const LABEL_TEXT_SCALE: f32 = 14.0;

/// Picks a stable color for a label so repeated classes render the same.
pub fn label_color(label: &str) -> Rgb<u8> {
    // FNV-1a over the lowercased label
    let mut hash: u32 = 2166136261;
    for b in label.bytes() {
        hash ^= b.to_ascii_lowercase() as u32;
        hash = hash.wrapping_mul(16777619);
    }
    Rgb(LABEL_PALETTE[(hash % LABEL_PALETTE.len() as u32) as usize])
}

/// Draws a hollow rectangle `thickness` pixels wide by insetting.
pub fn draw_outline(img: &mut RgbImage, rect: Rect, color: Rgb<u8>, thickness: u32) {
    for i in 0..thickness {
        let w = rect.width().saturating_sub(2 * i);
        let h = rect.height().saturating_sub(2 * i);
        if w < 2 || h < 2 {
            break;
        }
        let inset = Rect::at(rect.left() + i as i32, rect.top() + i as i32).of_size(w, h);
        draw_hollow_rect_mut(img, inset, color);
    }
}

/// Draws a filled label bar with optional text. Without a font asset
/// the bar is drawn alone, which still marks the labeled box.
pub fn draw_label(
    img: &mut RgbImage,
    x: i32,
    y: i32,
    text: &str,
    color: Rgb<u8>,
    font: Option<&FontVec>,
) {
    let (img_w, img_h) = img.dimensions();
    if img_w == 0 || img_h == 0 {
        return;
    }
    let bar_w = (8 * text.len() as u32 + 8).clamp(24, img_w);
    let x = x.clamp(0, (img_w.saturating_sub(bar_w)) as i32);
    let y = y.clamp(0, (img_h.saturating_sub(LABEL_BAR_HEIGHT)) as i32);

    draw_filled_rect_mut(img, Rect::at(x, y).of_size(bar_w, LABEL_BAR_HEIGHT), color);
    if let Some(font) = font {
        let text_color = contrasting_text_color(color);
        draw_text_mut(
            img,
            text_color,
            x + 4,
            y + 2,
            PxScale::from(LABEL_TEXT_SCALE),
            font,
            text,
        );
    }
}

/// Marks a thumbnail that was rendered without any bounding box: a
/// hatched badge in the top-left corner, with "NO BOX" text when a font
/// is available. Keeps the full-frame fallback visually distinct from a
/// real crop.
pub fn draw_missing_box_marker(img: &mut RgbImage, font: Option<&FontVec>) {
    let (img_w, img_h) = img.dimensions();
    if img_w < 16 || img_h < 16 {
        return;
    }
    let badge_w = 96u32.min(img_w - 8);
    let badge_h = 24u32.min(img_h - 8);
    let badge = Rect::at(4, 4).of_size(badge_w, badge_h);
    let accent = Rgb([230, 126, 34]);

    draw_filled_rect_mut(img, badge, Rgb([40, 40, 40]));
    // Diagonal hatching
    let mut x = 4f32;
    while x < (4 + badge_w) as f32 {
        let x_end = (x + badge_h as f32).min((4 + badge_w) as f32);
        let y_end = 4.0 + (x_end - x);
        draw_line_segment_mut(img, (x, 4.0), (x_end, y_end), accent);
        x += 8.0;
    }
    draw_hollow_rect_mut(img, badge, accent);

    if let Some(font) = font {
        draw_text_mut(
            img,
            Rgb([255, 255, 255]),
            10,
            8,
            PxScale::from(LABEL_TEXT_SCALE),
            font,
            "NO BOX",
        );
    }
}

/// Black or white, whichever reads better on the given background.
fn contrasting_text_color(background: Rgb<u8>) -> Rgb<u8> {
    let [r, g, b] = background.0;
    let luminance = 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
    if luminance > 150.0 {
        Rgb([0, 0, 0])
    } else {
        Rgb([255, 255, 255])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_color_is_stable() {
        assert_eq!(label_color("cup"), label_color("cup"));
        assert_eq!(label_color("Cup"), label_color("cup"));
    }

    #[test]
    fn test_label_color_in_palette() {
        let Rgb(c) = label_color("refrigerator");
        assert!(LABEL_PALETTE.contains(&c));
    }

    #[test]
    fn test_draw_outline_changes_pixels() {
        let mut img = RgbImage::new(32, 32);
        draw_outline(&mut img, Rect::at(4, 4).of_size(20, 20), Rgb([255, 0, 0]), 3);
        assert_eq!(img.get_pixel(4, 4).0, [255, 0, 0]);
        assert_eq!(img.get_pixel(6, 4).0, [255, 0, 0]);
        // Interior untouched
        assert_eq!(img.get_pixel(14, 14).0, [0, 0, 0]);
    }

    #[test]
    fn test_draw_outline_tiny_rect_does_not_panic() {
        let mut img = RgbImage::new(8, 8);
        draw_outline(&mut img, Rect::at(0, 0).of_size(2, 2), Rgb([255, 0, 0]), 3);
    }

    #[test]
    fn test_missing_box_marker_changes_pixels() {
        let mut img = RgbImage::new(128, 64);
        let before = img.clone();
        draw_missing_box_marker(&mut img, None);
        assert_ne!(img.as_raw(), before.as_raw());
    }

    #[test]
    fn test_missing_box_marker_skips_tiny_images() {
        let mut img = RgbImage::new(8, 8);
        let before = img.clone();
        draw_missing_box_marker(&mut img, None);
        assert_eq!(img.as_raw(), before.as_raw());
    }

    #[test]
    fn test_label_without_font_draws_bar_only() {
        let mut img = RgbImage::new(64, 64);
        draw_label(&mut img, 2, 2, "mug", Rgb([52, 152, 219]), None);
        assert_eq!(img.get_pixel(4, 10).0, [52, 152, 219]);
    }
}
