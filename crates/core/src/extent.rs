//! Drawable extents in pixels.

use std::fmt;

/// Width and height of a drawable area, in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    /// Creates a new extent.
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns `true` when either dimension is zero (minimized window).
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Width divided by height, or `1.0` for an empty extent.
    pub fn aspect_ratio(&self) -> f32 {
        if self.is_empty() {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    /// Clamps each dimension into `[min, max]`.
    pub fn clamp(self, min: Extent, max: Extent) -> Self {
        Self {
            width: self.width.clamp(min.width, max.width),
            height: self.height.clamp(min.height, max.height),
        }
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Extent {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_extent() {
        assert!(Extent::new(0, 600).is_empty());
        assert!(Extent::new(800, 0).is_empty());
        assert!(!Extent::new(1, 1).is_empty());
    }

    #[test]
    fn test_aspect_ratio() {
        assert_eq!(Extent::new(1600, 800).aspect_ratio(), 2.0);
        assert_eq!(Extent::default().aspect_ratio(), 1.0);
    }

    #[test]
    fn test_clamp() {
        let clamped = Extent::new(5000, 10).clamp(Extent::new(64, 64), Extent::new(4096, 4096));
        assert_eq!(clamped, Extent::new(4096, 64));
    }

    #[test]
    fn test_display() {
        assert_eq!(Extent::new(1280, 720).to_string(), "1280x720");
    }
}
