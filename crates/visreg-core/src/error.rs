//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Scenario name could not be turned into a baseline key.
    #[error("Invalid scenario name: {0:?}")]
    InvalidScenario(String),

    /// Geometry that cannot describe any pixel.
    #[error("Invalid rectangle: {0}")]
    InvalidRect(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
