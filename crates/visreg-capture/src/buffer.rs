//! Captured pixel data.

use std::path::Path;

use image::{imageops, ImageBuffer, Rgba, RgbaImage};
use visreg_core::Rect;

/// An RGBA8 pixel buffer produced by a capture or loaded from a baseline.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    image: RgbaImage,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish_non_exhaustive()
    }
}

impl PixelBuffer {
    /// Create a fully transparent buffer.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: ImageBuffer::new(width, height),
        }
    }

    /// Create a buffer filled with a single color.
    #[must_use]
    pub fn filled(width: u32, height: u32, color: Rgba<u8>) -> Self {
        Self {
            image: ImageBuffer::from_pixel(width, height, color),
        }
    }

    /// Wrap raw RGBA data (4 bytes per pixel).
    ///
    /// Returns `None` if `data` does not match the dimensions.
    #[must_use]
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        ImageBuffer::from_raw(width, height, data).map(|image| Self { image })
    }

    #[must_use]
    pub const fn from_image(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Load a PNG from disk.
    pub fn load(path: impl AsRef<Path>) -> image::ImageResult<Self> {
        Ok(Self {
            image: image::open(path)?.to_rgba8(),
        })
    }

    /// Save as an image file, format chosen by extension.
    pub fn save(&self, path: impl AsRef<Path>) -> image::ImageResult<()> {
        self.image.save(path)
    }

    #[inline]
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    #[inline]
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    #[inline]
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Total pixel count.
    #[inline]
    #[must_use]
    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width()) * u64::from(self.height())
    }

    #[inline]
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        *self.image.get_pixel(x, y)
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, color: Rgba<u8>) {
        self.image.put_pixel(x, y, color);
    }

    /// Fill a rectangle, clipped to the buffer.
    pub fn fill_rect(&mut self, rect: Rect, color: Rgba<u8>) {
        let Some(clipped) = Rect::from_size(self.width(), self.height()).intersection(&rect) else {
            return;
        };
        for y in clipped.y..clipped.y + clipped.height {
            for x in clipped.x..clipped.x + clipped.width {
                self.image.put_pixel(x, y, color);
            }
        }
    }

    /// Copy out a sub-rectangle.
    ///
    /// Returns `None` unless `rect` lies entirely inside the buffer.
    #[must_use]
    pub fn crop(&self, rect: Rect) -> Option<Self> {
        if rect.right() > u64::from(self.width()) || rect.bottom() > u64::from(self.height()) {
            return None;
        }
        let view = imageops::crop_imm(&self.image, rect.x, rect.y, rect.width, rect.height);
        Some(Self {
            image: view.to_image(),
        })
    }

    #[must_use]
    pub const fn as_image(&self) -> &RgbaImage {
        &self.image
    }

    #[must_use]
    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}
