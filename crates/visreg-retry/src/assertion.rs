//! Assertion state machine.
//!
//! `Pending -> Satisfied | TimedOut | Errored | Cancelled`. Terminal states
//! never change again.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssertionState {
    /// Still sampling.
    Pending,
    /// A sample satisfied the predicate.
    Satisfied,
    /// The probe kept producing values, none satisfied the predicate in time.
    TimedOut,
    /// The probe itself failed.
    Errored,
    /// The owning test was cancelled.
    Cancelled,
}

impl AssertionState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for AssertionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Satisfied => write!(f, "satisfied"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Errored => write!(f, "errored"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Invalid assertion transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: AssertionState,
    pub to: AssertionState,
}

/// Tracks one assertion through its lifetime.
#[derive(Debug, Clone)]
pub struct Assertion {
    state: AssertionState,
    attempts: u32,
}

impl Default for Assertion {
    fn default() -> Self {
        Self::new()
    }
}

impl Assertion {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AssertionState::Pending,
            attempts: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> AssertionState {
        self.state
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Count a probe sample. Only valid while pending.
    pub fn record_attempt(&mut self) -> Result<u32, InvalidTransition> {
        if self.state.is_terminal() {
            return Err(InvalidTransition {
                from: self.state,
                to: AssertionState::Pending,
            });
        }
        self.attempts += 1;
        Ok(self.attempts)
    }

    /// Move to a terminal state.
    pub fn finish(&mut self, to: AssertionState) -> Result<(), InvalidTransition> {
        if self.state.is_terminal() || !to.is_terminal() {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}
