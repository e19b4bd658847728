//! Pixel-space geometry.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in pixel coordinates.
///
/// The origin is the top-left corner; `x + width` and `y + height` are
/// exclusive bounds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Create a new rectangle.
    #[inline]
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle anchored at the origin.
    #[inline]
    #[must_use]
    pub const fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Number of pixels covered.
    #[inline]
    #[must_use]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Exclusive right edge.
    #[inline]
    #[must_use]
    pub const fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// Exclusive bottom edge.
    #[inline]
    #[must_use]
    pub const fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    /// Check whether a pixel lies inside the rectangle.
    #[inline]
    #[must_use]
    pub const fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && (x as u64) < self.right() && (y as u64) < self.bottom()
    }

    /// Overlapping part of two rectangles, or `None` if they do not overlap.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Option<Self> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        if right <= u64::from(x) || bottom <= u64::from(y) {
            return None;
        }

        // Both edges are bounded by an input edge that fits in u32 space.
        Some(Self::new(
            x,
            y,
            u32::try_from(right - u64::from(x)).unwrap_or(u32::MAX),
            u32::try_from(bottom - u64::from(y)).unwrap_or(u32::MAX),
        ))
    }

    /// Shift the rectangle into the coordinate space of `origin`.
    ///
    /// Returns `None` if the rectangle starts before `origin`.
    #[must_use]
    pub fn relative_to(&self, origin: &Self) -> Option<Self> {
        Some(Self::new(
            self.x.checked_sub(origin.x)?,
            self.y.checked_sub(origin.y)?,
            self.width,
            self.height,
        ))
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}
