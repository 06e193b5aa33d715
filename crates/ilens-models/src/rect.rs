use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Normalized rectangle with coordinates in [0, 1] range.
/// (0,0) is top-left, (1,1) is bottom-right of the upright frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NormalizedRect {
    /// X coordinate of top-left corner (0.0 to 1.0)
    pub x: f64,
    /// Y coordinate of top-left corner (0.0 to 1.0)
    pub y: f64,
    /// Width as fraction of frame width (0.0 to 1.0)
    pub width: f64,
    /// Height as fraction of frame height (0.0 to 1.0)
    pub height: f64,
}

impl NormalizedRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Full-frame rectangle.
    pub fn full() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }

    /// Builds a rect from corner coordinates given on a 0..=scale axis,
    /// ordered [y_min, x_min, y_max, x_max]. Returns `None` when the
    /// corners are inverted or the result degenerates to an empty box.
    /// Out-of-range values are clamped to the unit square first.
    pub fn from_corner_units(y_min: f64, x_min: f64, y_max: f64, x_max: f64, scale: f64) -> Option<Self> {
        if scale <= 0.0 {
            return None;
        }
        let clamp = |v: f64| (v / scale).clamp(0.0, 1.0);
        let (top, left, bottom, right) = (clamp(y_min), clamp(x_min), clamp(y_max), clamp(x_max));
        if bottom <= top || right <= left {
            return None;
        }
        Some(Self::new(left, top, right - left, bottom - top))
    }

    /// Validates that the rectangle is within bounds and has positive dimensions.
    pub fn is_valid(&self) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.width > 0.0
            && self.height > 0.0
            && (self.x + self.width) <= 1.001 // Allow small floating point errors
            && (self.y + self.height) <= 1.001
    }

    /// Returns the right edge (x + width).
    pub fn x2(&self) -> f64 {
        self.x + self.width
    }

    /// Returns the bottom edge (y + height).
    pub fn y2(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Intersection-over-union with another rect. Returns 0.0 when the
    /// rects do not overlap or either has no area.
    pub fn iou(&self, other: &NormalizedRect) -> f64 {
        let ix1 = self.x.max(other.x);
        let iy1 = self.y.max(other.y);
        let ix2 = self.x2().min(other.x2());
        let iy2 = self.y2().min(other.y2());

        if ix2 <= ix1 || iy2 <= iy1 {
            return 0.0;
        }

        let intersection = (ix2 - ix1) * (iy2 - iy1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    /// Expands the rect by `fraction` of its own size on every edge,
    /// then clamps to the unit square.
    pub fn expanded(&self, fraction: f64) -> Self {
        let dx = self.width * fraction;
        let dy = self.height * fraction;
        Self::new(
            self.x - dx,
            self.y - dy,
            self.width + 2.0 * dx,
            self.height + 2.0 * dy,
        )
        .clamped()
    }

    /// Clamps the rect to the unit square, preserving edges where possible.
    pub fn clamped(&self) -> Self {
        let x1 = self.x.clamp(0.0, 1.0);
        let y1 = self.y.clamp(0.0, 1.0);
        let x2 = self.x2().clamp(0.0, 1.0);
        let y2 = self.y2().clamp(0.0, 1.0);
        Self::new(x1, y1, (x2 - x1).max(0.0), (y2 - y1).max(0.0))
    }
}
