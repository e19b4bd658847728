//! Test harness for visual regression and environment-state testing.
//!
//! Composes the capture engine, the environment controller and the retry
//! loop into per-test scopes with a deadline and teardown.

pub mod config;
pub mod harness;

pub use config::{HarnessConfig, UPDATE_SNAPSHOTS_ENV};
pub use harness::{Harness, TestContext};

use std::time::Duration;

use thiserror::Error;
use visreg_capture::CaptureError;
use visreg_env::EnvError;
use visreg_retry::AssertionFailure;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("[{test}] {source}")]
    Capture { test: String, source: CaptureError },
    #[error("[{test}] {source}")]
    Env { test: String, source: EnvError },
    #[error("[{test}] {source}")]
    Assertion {
        test: String,
        source: AssertionFailure,
    },
    /// The per-test deadline fired. `cause` is the error the body returned
    /// once it was woken, usually carrying the last observed value.
    #[error("[{test}] exceeded test timeout of {timeout:?}{}", timeout_cause(.cause.as_deref()))]
    TestTimeout {
        test: String,
        timeout: Duration,
        #[source]
        cause: Option<Box<HarnessError>>,
    },
    #[error("[{test}] cancelled: {reason}")]
    Cancelled { test: String, reason: String },
    #[error("Invalid scenario: {0}")]
    Scenario(#[from] visreg_core::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    /// Underlying capture error, if this is one.
    #[must_use]
    pub const fn as_capture(&self) -> Option<&CaptureError> {
        match self {
            Self::Capture { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn timeout_cause(cause: Option<&HarnessError>) -> String {
    cause.map_or_else(String::new, |cause| format!("; {cause}"))
}

pub type Result<T> = std::result::Result<T, HarnessError>;
