//! Core types shared across the visreg harness.
//!
//! This crate provides the foundational pieces every layer uses:
//! - Pixel-space geometry (`Rect`)
//! - Identifiers for render targets, browsing contexts, workers and scenarios
//! - Cooperative cancellation (`CancelToken`) with per-test deadlines
//! - The core error type

pub mod cancel;
pub mod error;
pub mod geometry;
pub mod ids;

pub use cancel::{CancelReason, CancelToken, Watchdog};
pub use error::{Error, Result};
pub use geometry::Rect;
pub use ids::{ContextId, ScenarioId, TargetId, WorkerId};

/// Harness-wide defaults.
pub mod defaults {
    use std::time::Duration;

    /// Timeout for a whole test, including setup and teardown.
    pub const TEST_TIMEOUT: Duration = Duration::from_secs(30);
    /// Timeout for a single retrying assertion.
    pub const ASSERTION_TIMEOUT: Duration = Duration::from_secs(5);
    /// Interval between probe samples.
    pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
    /// Lower bound on the interval between probe samples.
    pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);
    /// Maximum ratio of differing pixels a screenshot may have.
    pub const MAX_DIFF_RATIO: f64 = 0.001;
}
