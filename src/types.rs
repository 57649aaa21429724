use serde::{Deserialize, Serialize};

/// Integer rectangle in pixel units, used for channel tiles and regions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub w: usize,
    pub h: usize,
}

impl Rect {
    pub fn new(x: usize, y: usize, w: usize, h: usize) -> Self {
        Self { x, y, w, h }
    }
}

/// A single detection: axis-aligned rectangle in source-image coordinates
/// plus the classifier margin (higher is better; can be negative).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub score: f32,
    /// Object class for multi-class suppression; single-class models use 0.
    #[serde(default)]
    pub class_id: u32,
}

impl Detection {
    pub fn new(x: f32, y: f32, w: f32, h: f32, score: f32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            score,
            class_id: 0,
        }
    }

    #[inline]
    pub fn right(&self) -> f32 {
        self.x + self.w
    }

    #[inline]
    pub fn bottom(&self) -> f32 {
        self.y + self.h
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    #[inline]
    pub fn center(&self) -> (f32, f32) {
        (self.x + 0.5 * self.w, self.y + 0.5 * self.h)
    }

    /// Intersection area with another rectangle (zero when disjoint).
    pub fn intersection(&self, other: &Detection) -> f32 {
        let iw = self.right().min(other.right()) - self.x.max(other.x);
        if iw <= 0.0 {
            return 0.0;
        }
        let ih = self.bottom().min(other.bottom()) - self.y.max(other.y);
        if ih <= 0.0 {
            return 0.0;
        }
        iw * ih
    }
}
