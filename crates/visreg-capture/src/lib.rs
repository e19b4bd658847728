//! Capture engine for the visreg harness.
//!
//! Captures pixels from render targets, diffs them against stored baselines
//! and writes visual diff artifacts when they do not match.
//!
//! # Usage
//!
//! ```ignore
//! use visreg_capture::{BaselineMode, CaptureEngine, CaptureRegion, Canvas, CompareOptions};
//!
//! let engine = CaptureEngine::new("tests/baselines", "target/visreg", BaselineMode::Create);
//! let canvas = Canvas::new("chart", 100, 100);
//! let pixels = engine.capture(&canvas, &CaptureRegion::full(canvas.id().clone()))?;
//! engine.compare(&pixels, &"chart-idle".parse()?, &CompareOptions::default())?;
//! ```

pub mod baseline;
pub mod buffer;
pub mod diff;
pub mod engine;
pub mod target;

pub use baseline::BaselineStore;
pub use buffer::PixelBuffer;
pub use diff::{diff_buffers, render_diff_image, DiffResult};
pub use engine::{CaptureEngine, CaptureRegion, DiffArtifacts};
pub use target::{Canvas, ReadError, RenderTarget, TargetState};

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use visreg_core::{defaults, Rect, ScenarioId, TargetId};

/// Why a capture region could not be rendered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotRenderable {
    /// The target is no longer attached to its page.
    Detached,
    /// The target is attached but not visible.
    Hidden,
    /// The target or the requested region has zero width or height.
    ZeroArea,
    /// The requested region does not overlap the target.
    OutOfBounds,
    /// The region names a different target than the one given.
    TargetMismatch,
}

impl std::fmt::Display for NotRenderable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Detached => write!(f, "target is detached"),
            Self::Hidden => write!(f, "target is not visible"),
            Self::ZeroArea => write!(f, "target has zero area"),
            Self::OutOfBounds => write!(f, "region lies outside the target"),
            Self::TargetMismatch => write!(f, "region belongs to another target"),
        }
    }
}

/// A failed comparison against a baseline.
#[derive(Debug, Clone)]
pub struct Mismatch {
    pub scenario: ScenarioId,
    pub diff: DiffResult,
    /// Files written for inspection, if writing them succeeded.
    pub artifacts: Option<DiffArtifacts>,
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Screenshot mismatch for scenario {}: ", self.scenario)?;
        if let Some((expected, actual)) = self.diff.size_mismatch {
            write!(
                f,
                "expected {}x{} but captured {}x{}",
                expected.0, expected.1, actual.0, actual.1
            )?;
        } else {
            write!(
                f,
                "{} of {} pixels differ (ratio {:.6}, allowed {:.6}",
                self.diff.differing_pixels,
                self.diff.total_pixels,
                self.diff.ratio,
                self.diff.max_diff_ratio
            )?;
            if let Some(max) = self.diff.max_diff_pixels {
                write!(f, ", max {max} pixels")?;
            }
            write!(f, ")")?;
        }
        if let Some(artifacts) = &self.artifacts {
            write!(f, " (see {})", artifacts.diff.display())?;
        }
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Target {target} is not renderable: {reason}")]
    TargetNotRenderable {
        target: TargetId,
        reason: NotRenderable,
    },
    #[error("No baseline for scenario {scenario} (expected {})", path.display())]
    BaselineMissing { scenario: ScenarioId, path: PathBuf },
    #[error("{0}")]
    ContentMismatch(Box<Mismatch>),
    #[error("Security error reading pixels from {target}: {reason}")]
    Security { target: TargetId, reason: String },
    #[error("Render target {target} failed: {reason}")]
    Render { target: TargetId, reason: String },
    #[error("Invalid compare options: {0}")]
    InvalidOptions(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl CaptureError {
    /// Whether the failure is about pixel content rather than the target.
    #[must_use]
    pub const fn is_content_mismatch(&self) -> bool {
        matches!(self, Self::ContentMismatch(_))
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;

/// How compare treats the stored baseline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BaselineMode {
    /// Compare against an existing baseline; a missing one is an error.
    #[default]
    Compare,
    /// Write a baseline when none exists; existing ones are compared.
    Create,
    /// Replace the baseline with every capture.
    Update,
}

/// Per-call comparison settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareOptions {
    /// Maximum allowed ratio of differing pixels (0.0-1.0).
    pub max_diff_ratio: f64,
    /// Optional cap on the absolute number of differing pixels.
    pub max_diff_pixels: Option<u64>,
    /// Per-channel delta a pixel may have before it counts as differing.
    pub channel_threshold: u8,
    /// Regions, in capture coordinates, excluded from the comparison.
    pub masks: Vec<Rect>,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            max_diff_ratio: defaults::MAX_DIFF_RATIO,
            max_diff_pixels: None,
            channel_threshold: 0,
            masks: Vec::new(),
        }
    }
}

impl CompareOptions {
    /// Options with the given ratio tolerance and nothing else.
    #[must_use]
    pub fn with_tolerance(max_diff_ratio: f64) -> Self {
        Self {
            max_diff_ratio,
            ..Self::default()
        }
    }

    /// Exclude a region from comparison.
    #[must_use]
    pub fn mask(mut self, rect: Rect) -> Self {
        self.masks.push(rect);
        self
    }

    #[must_use]
    pub const fn max_diff_pixels(mut self, pixels: u64) -> Self {
        self.max_diff_pixels = Some(pixels);
        self
    }

    #[must_use]
    pub const fn channel_threshold(mut self, threshold: u8) -> Self {
        self.channel_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.max_diff_ratio) {
            return Err(CaptureError::InvalidOptions(format!(
                "max_diff_ratio must be within 0.0-1.0, got {}",
                self.max_diff_ratio
            )));
        }
        Ok(())
    }
}
