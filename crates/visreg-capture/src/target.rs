//! Render targets that pixels can be captured from.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use image::Rgba;
use parking_lot::{Mutex, RwLock};
use visreg_core::{Rect, TargetId};

use crate::buffer::PixelBuffer;

/// Layout state of a render target at capture time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetState {
    /// The target is part of a live page.
    Attached {
        width: u32,
        height: u32,
        visible: bool,
    },
    /// The target was removed from its page.
    Detached,
}

/// Failure reading pixels back from a target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadError {
    /// Pixel reads are blocked because cross-origin content tainted the target.
    Tainted { origin: String },
    /// The target went away between layout and readback.
    Detached,
    /// Any other rendering failure.
    Failed(String),
}

/// A source of pixels: a canvas, a WebGL surface, an element, a full page.
///
/// Implementations live on the browser side of the harness boundary.
pub trait RenderTarget: Send + Sync {
    fn id(&self) -> &TargetId;

    fn state(&self) -> TargetState;

    /// Read the pixels of `rect`, given in target coordinates.
    ///
    /// The rectangle has already been clipped to the target bounds.
    fn read_pixels(&self, rect: Rect) -> Result<PixelBuffer, ReadError>;
}

struct CanvasInner {
    id: TargetId,
    pixels: RwLock<PixelBuffer>,
    visible: AtomicBool,
    detached: AtomicBool,
    tainted_by: Mutex<Option<String>>,
}

/// In-memory software render target.
///
/// Cloning yields another handle to the same surface, so a scene can be
/// redrawn on one thread while the harness captures on another.
#[derive(Clone)]
pub struct Canvas {
    inner: Arc<CanvasInner>,
}

impl std::fmt::Debug for Canvas {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Canvas")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Canvas {
    /// Create a transparent canvas.
    pub fn new(id: impl Into<TargetId>, width: u32, height: u32) -> Self {
        Self::from_buffer(id, PixelBuffer::new(width, height))
    }

    /// Create a canvas cleared to `color`.
    pub fn filled(id: impl Into<TargetId>, width: u32, height: u32, color: Rgba<u8>) -> Self {
        Self::from_buffer(id, PixelBuffer::filled(width, height, color))
    }

    pub fn from_buffer(id: impl Into<TargetId>, pixels: PixelBuffer) -> Self {
        Self {
            inner: Arc::new(CanvasInner {
                id: id.into(),
                pixels: RwLock::new(pixels),
                visible: AtomicBool::new(true),
                detached: AtomicBool::new(false),
                tainted_by: Mutex::new(None),
            }),
        }
    }

    pub fn set_pixel(&self, x: u32, y: u32, color: Rgba<u8>) {
        self.inner.pixels.write().set_pixel(x, y, color);
    }

    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Rgba<u8> {
        self.inner.pixels.read().pixel(x, y)
    }

    pub fn fill_rect(&self, rect: Rect, color: Rgba<u8>) {
        self.inner.pixels.write().fill_rect(rect, color);
    }

    pub fn clear(&self, color: Rgba<u8>) {
        let mut pixels = self.inner.pixels.write();
        let (width, height) = pixels.dimensions();
        *pixels = PixelBuffer::filled(width, height, color);
    }

    /// Replace the surface, e.g. after a layout change resized it.
    pub fn resize(&self, width: u32, height: u32) {
        *self.inner.pixels.write() = PixelBuffer::new(width, height);
    }

    pub fn set_visible(&self, visible: bool) {
        self.inner.visible.store(visible, Ordering::Release);
    }

    pub fn detach(&self) {
        self.inner.detached.store(true, Ordering::Release);
    }

    /// Mark the canvas as tainted by cross-origin content.
    pub fn taint(&self, origin: impl Into<String>) {
        *self.inner.tainted_by.lock() = Some(origin.into());
    }

    /// Snapshot of the current surface.
    #[must_use]
    pub fn snapshot(&self) -> PixelBuffer {
        self.inner.pixels.read().clone()
    }
}

impl RenderTarget for Canvas {
    fn id(&self) -> &TargetId {
        &self.inner.id
    }

    fn state(&self) -> TargetState {
        if self.inner.detached.load(Ordering::Acquire) {
            return TargetState::Detached;
        }
        let (width, height) = self.inner.pixels.read().dimensions();
        TargetState::Attached {
            width,
            height,
            visible: self.inner.visible.load(Ordering::Acquire),
        }
    }

    fn read_pixels(&self, rect: Rect) -> Result<PixelBuffer, ReadError> {
        if let Some(origin) = self.inner.tainted_by.lock().clone() {
            return Err(ReadError::Tainted { origin });
        }
        if self.inner.detached.load(Ordering::Acquire) {
            return Err(ReadError::Detached);
        }
        self.inner
            .pixels
            .read()
            .crop(rect)
            .ok_or_else(|| ReadError::Failed(format!("region {rect} exceeds surface")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_surface() {
        let canvas = Canvas::new("scene", 8, 8);
        let other = canvas.clone();
        other.set_pixel(1, 1, Rgba([9, 9, 9, 255]));
        assert_eq!(canvas.pixel(1, 1), Rgba([9, 9, 9, 255]));
    }

    #[test]
    fn state_tracks_visibility_and_detach() {
        let canvas = Canvas::new("scene", 8, 4);
        assert_eq!(
            canvas.state(),
            TargetState::Attached {
                width: 8,
                height: 4,
                visible: true
            }
        );

        canvas.set_visible(false);
        assert!(matches!(
            canvas.state(),
            TargetState::Attached { visible: false, .. }
        ));

        canvas.detach();
        assert_eq!(canvas.state(), TargetState::Detached);
    }

    #[test]
    fn tainted_canvas_blocks_reads() {
        let canvas = Canvas::new("scene", 8, 8);
        canvas.taint("https://cdn.example");
        assert_eq!(
            canvas.read_pixels(Rect::from_size(8, 8)),
            Err(ReadError::Tainted {
                origin: "https://cdn.example".into()
            })
        );
    }
}
