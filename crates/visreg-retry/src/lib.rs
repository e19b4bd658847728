//! Assertion retry loop for the visreg harness.
//!
//! A probe is sampled until a predicate accepts its value, the timeout
//! elapses, the probe fails, or the owning test is cancelled. DOM text,
//! pixel content and visibility checks all go through the same loop.

pub mod assertion;
pub mod expect;
pub mod probe;
pub mod retry;

pub use assertion::{Assertion, AssertionState, InvalidTransition};
pub use expect::{AssertionFailure, Expect};
pub use probe::Probe;
pub use retry::{retry_until, RetryError, RetryOptions, Satisfied};
