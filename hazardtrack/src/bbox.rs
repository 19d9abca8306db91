//! Bounding box geometry in pixel space

use serde::{Deserialize, Serialize};
use std::fmt;

/// Axis-aligned bounding box, corners in pixels (`xmin < xmax`, `ymin < ymax`)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox<T = f32> {
    pub xmin: T,
    pub ymin: T,
    pub xmax: T,
    pub ymax: T,
}

impl Bbox<f32> {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    /// Area clamped at zero for degenerate boxes
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center_x(&self) -> f32 {
        (self.xmin + self.xmax) / 2.0
    }

    pub fn center_y(&self) -> f32 {
        (self.ymin + self.ymax) / 2.0
    }

    pub fn center(&self) -> (f32, f32) {
        (self.center_x(), self.center_y())
    }

    /// Bottom edge (largest y) in pixels
    pub fn bottom(&self) -> f32 {
        self.ymax
    }

    /// Finite coordinates with strictly positive extent
    pub fn is_valid(&self) -> bool {
        self.to_bounds().iter().all(|v| v.is_finite())
            && self.xmax > self.xmin
            && self.ymax > self.ymin
    }

    /// Scale every coordinate, e.g. from detector-input space to frame space
    pub fn scaled(&self, scale_x: f32, scale_y: f32) -> Self {
        Self {
            xmin: self.xmin * scale_x,
            ymin: self.ymin * scale_y,
            xmax: self.xmax * scale_x,
            ymax: self.ymax * scale_y,
        }
    }

    /// Convert to bounds array [xmin, ymin, xmax, ymax]
    pub fn to_bounds(&self) -> [f32; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }
}

impl<T: fmt::Display> fmt::Display for Bbox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bbox({}, {}, {}, {})",
            self.xmin, self.ymin, self.xmax, self.ymax
        )
    }
}
