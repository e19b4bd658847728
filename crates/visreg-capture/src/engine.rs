//! Capture and compare.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use visreg_core::{Rect, ScenarioId, TargetId};

use crate::baseline::BaselineStore;
use crate::buffer::PixelBuffer;
use crate::diff::{diff_buffers, render_diff_image, DiffResult};
use crate::target::{ReadError, RenderTarget, TargetState};
use crate::{BaselineMode, CaptureError, CompareOptions, Mismatch, NotRenderable, Result};

/// What to capture: a whole render target or a box inside it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRegion {
    pub target: TargetId,
    /// Sub-element bounding box in target coordinates; `None` is the full target.
    pub rect: Option<Rect>,
}

impl CaptureRegion {
    #[must_use]
    pub const fn full(target: TargetId) -> Self {
        Self { target, rect: None }
    }

    #[must_use]
    pub const fn element(target: TargetId, bounding_box: Rect) -> Self {
        Self {
            target,
            rect: Some(bounding_box),
        }
    }
}

/// Files written when a comparison fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiffArtifacts {
    pub actual: PathBuf,
    pub expected: PathBuf,
    pub diff: PathBuf,
}

/// Captures render targets and compares them against stored baselines.
pub struct CaptureEngine {
    store: BaselineStore,
    output_dir: PathBuf,
    mode: BaselineMode,
}

impl CaptureEngine {
    /// Create a new capture engine.
    ///
    /// # Arguments
    /// * `baseline_dir` - Directory holding baseline images
    /// * `output_dir` - Directory for diff artifacts
    /// * `mode` - How missing or stale baselines are handled
    pub fn new(
        baseline_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        mode: BaselineMode,
    ) -> Self {
        Self {
            store: BaselineStore::new(baseline_dir),
            output_dir: output_dir.into(),
            mode,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> BaselineMode {
        self.mode
    }

    #[must_use]
    pub const fn store(&self) -> &BaselineStore {
        &self.store
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Capture the pixels of `region` from `target`.
    ///
    /// A region reaching past the target edges is clipped to them.
    pub fn capture(&self, target: &dyn RenderTarget, region: &CaptureRegion) -> Result<PixelBuffer> {
        let not_renderable = |reason| CaptureError::TargetNotRenderable {
            target: target.id().clone(),
            reason,
        };

        if region.target != *target.id() {
            return Err(not_renderable(NotRenderable::TargetMismatch));
        }

        let bounds = match target.state() {
            TargetState::Detached => return Err(not_renderable(NotRenderable::Detached)),
            TargetState::Attached { visible: false, .. } => {
                return Err(not_renderable(NotRenderable::Hidden))
            }
            TargetState::Attached { width, height, .. } => Rect::from_size(width, height),
        };
        if bounds.is_empty() {
            return Err(not_renderable(NotRenderable::ZeroArea));
        }

        let rect = match region.rect {
            None => bounds,
            Some(rect) if rect.is_empty() => return Err(not_renderable(NotRenderable::ZeroArea)),
            Some(rect) => bounds
                .intersection(&rect)
                .ok_or_else(|| not_renderable(NotRenderable::OutOfBounds))?,
        };

        let pixels = target.read_pixels(rect).map_err(|e| match e {
            ReadError::Tainted { origin } => CaptureError::Security {
                target: target.id().clone(),
                reason: format!("canvas tainted by cross-origin content from {origin}"),
            },
            ReadError::Detached => not_renderable(NotRenderable::Detached),
            ReadError::Failed(reason) => CaptureError::Render {
                target: target.id().clone(),
                reason,
            },
        })?;

        if pixels.dimensions() != (rect.width, rect.height) {
            return Err(CaptureError::Render {
                target: target.id().clone(),
                reason: format!(
                    "readback returned {}x{} for region {rect}",
                    pixels.width(),
                    pixels.height()
                ),
            });
        }

        debug!("Captured {} from {}", rect, target.id());
        Ok(pixels)
    }

    /// Diff `actual` against the stored baseline without writing anything.
    ///
    /// Fails with `BaselineMissing` when there is no baseline, regardless of
    /// mode.
    pub fn evaluate(
        &self,
        actual: &PixelBuffer,
        scenario: &ScenarioId,
        options: &CompareOptions,
    ) -> Result<DiffResult> {
        options.validate()?;
        let expected = self
            .store
            .load(scenario)?
            .ok_or_else(|| self.baseline_missing(scenario))?;
        Ok(diff_buffers(&expected, actual, options))
    }

    /// Compare `actual` against the baseline for `scenario`.
    ///
    /// Depending on the mode, a missing baseline is an error (`Compare`) or
    /// gets created from `actual` (`Create`); `Update` always replaces it.
    /// A mismatch beyond tolerance writes diff artifacts and fails with
    /// `ContentMismatch`.
    pub fn compare(
        &self,
        actual: &PixelBuffer,
        scenario: &ScenarioId,
        options: &CompareOptions,
    ) -> Result<DiffResult> {
        options.validate()?;

        self.store.with_lock(scenario, |store| {
            if self.mode == BaselineMode::Update {
                let path = store.store(scenario, actual)?;
                info!("Updated baseline: {}", path.display());
                return Ok(DiffResult::trivial(actual, options));
            }

            let expected = match store.load(scenario)? {
                Some(expected) => expected,
                None if self.mode == BaselineMode::Create => {
                    if let Some(path) = store.create(scenario, actual)? {
                        info!("Created new baseline: {}", path.display());
                        return Ok(DiffResult::trivial(actual, options));
                    }
                    // Another process created it between load and create.
                    debug!("Baseline for {} appeared concurrently", scenario);
                    store
                        .load(scenario)?
                        .ok_or_else(|| self.baseline_missing(scenario))?
                }
                None => return Err(self.baseline_missing(scenario)),
            };

            let diff = diff_buffers(&expected, actual, options);
            if diff.passed {
                debug!(
                    "Scenario {} matched baseline (ratio {:.6})",
                    scenario, diff.ratio
                );
                return Ok(diff);
            }

            let artifacts = match self.write_artifacts(scenario, &expected, actual, options) {
                Ok(artifacts) => Some(artifacts),
                Err(e) => {
                    warn!("Failed to write diff artifacts for {}: {}", scenario, e);
                    None
                }
            };
            let mismatch = Mismatch {
                scenario: scenario.clone(),
                diff,
                artifacts,
            };
            warn!("{}", mismatch);
            Err(CaptureError::ContentMismatch(Box::new(mismatch)))
        })
    }

    fn baseline_missing(&self, scenario: &ScenarioId) -> CaptureError {
        CaptureError::BaselineMissing {
            scenario: scenario.clone(),
            path: self.store.path(scenario),
        }
    }

    fn write_artifacts(
        &self,
        scenario: &ScenarioId,
        expected: &PixelBuffer,
        actual: &PixelBuffer,
        options: &CompareOptions,
    ) -> Result<DiffArtifacts> {
        std::fs::create_dir_all(&self.output_dir)?;

        let artifacts = DiffArtifacts {
            actual: self.output_dir.join(scenario.artifact_name("actual")),
            expected: self.output_dir.join(scenario.artifact_name("expected")),
            diff: self.output_dir.join(scenario.artifact_name("diff")),
        };

        actual.save(&artifacts.actual)?;
        expected.save(&artifacts.expected)?;
        render_diff_image(expected, actual, options).save(&artifacts.diff)?;

        Ok(artifacts)
    }
}
