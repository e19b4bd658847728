//! Pixel comparison against a baseline.

use image::{ImageBuffer, Rgba, RgbaImage};
use serde::Serialize;
use visreg_core::Rect;

use crate::buffer::PixelBuffer;
use crate::CompareOptions;

const DIFF_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
const MASK_COLOR: Rgba<u8> = Rgba([255, 0, 255, 255]);

/// Outcome of comparing a capture against a baseline.
///
/// Derived on every comparison, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffResult {
    /// Unmasked pixels whose channels differ beyond the channel threshold.
    pub differing_pixels: u64,
    /// Unmasked pixels that took part in the comparison.
    pub total_pixels: u64,
    /// Pixels excluded by masks.
    pub masked_pixels: u64,
    /// `differing_pixels / total_pixels`, 0 when nothing was compared.
    pub ratio: f64,
    /// Ratio tolerance the result was judged against.
    pub max_diff_ratio: f64,
    /// Pixel count tolerance the result was judged against.
    pub max_diff_pixels: Option<u64>,
    /// Baseline and capture dimensions, when they differ.
    pub size_mismatch: Option<((u32, u32), (u32, u32))>,
    pub passed: bool,
}

impl DiffResult {
    /// Result for a capture that became its own baseline.
    #[must_use]
    pub fn trivial(actual: &PixelBuffer, options: &CompareOptions) -> Self {
        let mask = MaskBitmap::new(actual.width(), actual.height(), &options.masks);
        let masked = mask.count();
        Self {
            differing_pixels: 0,
            total_pixels: actual.pixel_count() - masked,
            masked_pixels: masked,
            ratio: 0.0,
            max_diff_ratio: options.max_diff_ratio,
            max_diff_pixels: options.max_diff_pixels,
            size_mismatch: None,
            passed: true,
        }
    }
}

/// Row-major flags marking masked pixels.
struct MaskBitmap {
    width: u32,
    bits: Vec<bool>,
}

impl MaskBitmap {
    fn new(width: u32, height: u32, masks: &[Rect]) -> Self {
        let mut bits = vec![false; width as usize * height as usize];
        let bounds = Rect::from_size(width, height);

        for mask in masks {
            let Some(clipped) = bounds.intersection(mask) else {
                continue;
            };
            for y in clipped.y..clipped.y + clipped.height {
                let row = y as usize * width as usize;
                bits[row + clipped.x as usize..row + (clipped.x + clipped.width) as usize]
                    .fill(true);
            }
        }

        Self { width, bits }
    }

    #[inline]
    fn is_masked(&self, x: u32, y: u32) -> bool {
        self.bits[y as usize * self.width as usize + x as usize]
    }

    fn count(&self) -> u64 {
        self.bits.iter().filter(|&&b| b).count() as u64
    }
}

#[inline]
fn pixels_differ(a: Rgba<u8>, b: Rgba<u8>, threshold: u8) -> bool {
    a.0.iter()
        .zip(b.0.iter())
        .any(|(&ca, &cb)| ca.abs_diff(cb) > threshold)
}

/// Compare two buffers.
///
/// Masked pixels count toward neither the differing pixels nor the total.
/// Buffers of different size never pass and report a ratio of 1.0.
#[must_use]
pub fn diff_buffers(
    expected: &PixelBuffer,
    actual: &PixelBuffer,
    options: &CompareOptions,
) -> DiffResult {
    if expected.dimensions() != actual.dimensions() {
        let total = expected.pixel_count().max(actual.pixel_count());
        return DiffResult {
            differing_pixels: total,
            total_pixels: total,
            masked_pixels: 0,
            ratio: 1.0,
            max_diff_ratio: options.max_diff_ratio,
            max_diff_pixels: options.max_diff_pixels,
            size_mismatch: Some((expected.dimensions(), actual.dimensions())),
            passed: false,
        };
    }

    let (width, height) = actual.dimensions();
    let mask = MaskBitmap::new(width, height, &options.masks);
    let masked_pixels = mask.count();
    let total_pixels = actual.pixel_count() - masked_pixels;

    let differing_pixels = expected
        .as_image()
        .enumerate_pixels()
        .zip(actual.as_image().pixels())
        .filter(|((x, y, pe), pa)| {
            !mask.is_masked(*x, *y) && pixels_differ(**pe, **pa, options.channel_threshold)
        })
        .count() as u64;

    let ratio = if total_pixels == 0 {
        0.0
    } else {
        differing_pixels as f64 / total_pixels as f64
    };

    let within_pixels = options
        .max_diff_pixels
        .map_or(true, |max| differing_pixels <= max);

    DiffResult {
        differing_pixels,
        total_pixels,
        masked_pixels,
        ratio,
        max_diff_ratio: options.max_diff_ratio,
        max_diff_pixels: options.max_diff_pixels,
        size_mismatch: None,
        passed: ratio <= options.max_diff_ratio && within_pixels,
    }
}

/// Create a visual diff image highlighting differences.
///
/// Differing pixels are red, masked pixels magenta, everything else is the
/// expected image dimmed. Areas covered by only one of two differently
/// sized buffers count as differing.
#[must_use]
pub fn render_diff_image(
    expected: &PixelBuffer,
    actual: &PixelBuffer,
    options: &CompareOptions,
) -> RgbaImage {
    let width = expected.width().max(actual.width());
    let height = expected.height().max(actual.height());
    let mask = MaskBitmap::new(width, height, &options.masks);
    let expected_bounds = Rect::from_size(expected.width(), expected.height());
    let actual_bounds = Rect::from_size(actual.width(), actual.height());

    let mut diff = ImageBuffer::new(width, height);
    for (x, y, pixel) in diff.enumerate_pixels_mut() {
        if mask.is_masked(x, y) {
            *pixel = MASK_COLOR;
            continue;
        }
        if !expected_bounds.contains(x, y) || !actual_bounds.contains(x, y) {
            *pixel = DIFF_COLOR;
            continue;
        }

        let pe = expected.pixel(x, y);
        let pa = actual.pixel(x, y);
        if pixels_differ(pe, pa, options.channel_threshold) {
            *pixel = DIFF_COLOR;
        } else {
            // Show original image dimmed
            *pixel = Rgba([pe[0] / 2, pe[1] / 2, pe[2] / 2, 255]);
        }
    }

    diff
}
