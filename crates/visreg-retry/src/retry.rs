//! The retry loop.

use std::fmt::{self, Debug, Display};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;
use visreg_core::{defaults, CancelReason, CancelToken};

use crate::assertion::{Assertion, AssertionState};
use crate::probe::Probe;

/// Timing of a retry loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOptions {
    /// Give up once this much time has passed since the first sample.
    pub timeout: Duration,
    /// Pause between samples. Clamped to at least `MIN_POLL_INTERVAL`.
    pub poll_interval: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            timeout: defaults::ASSERTION_TIMEOUT,
            poll_interval: defaults::POLL_INTERVAL,
        }
    }
}

impl RetryOptions {
    #[must_use]
    pub const fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Poll interval actually used by the loop.
    #[must_use]
    pub fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.max(defaults::MIN_POLL_INTERVAL)
    }
}

/// A sample that satisfied the predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Satisfied<T> {
    pub value: T,
    /// Samples taken, including the satisfying one.
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Why a retry loop ended without a satisfying sample.
#[derive(Debug)]
pub enum RetryError<T, E> {
    /// The probe produced values but none satisfied the predicate in time.
    TimedOut {
        last: Option<T>,
        attempts: u32,
        elapsed: Duration,
    },
    /// The probe itself failed.
    Errored {
        source: E,
        attempts: u32,
        elapsed: Duration,
    },
    /// The owning test cancelled the loop.
    Cancelled {
        last: Option<T>,
        attempts: u32,
        reason: Option<CancelReason>,
    },
}

impl<T, E> RetryError<T, E> {
    /// Terminal state of the assertion this loop drove.
    #[must_use]
    pub const fn state(&self) -> AssertionState {
        match self {
            Self::TimedOut { .. } => AssertionState::TimedOut,
            Self::Errored { .. } => AssertionState::Errored,
            Self::Cancelled { .. } => AssertionState::Cancelled,
        }
    }

    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::TimedOut { attempts, .. }
            | Self::Errored { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// Last value the probe produced, if any.
    #[must_use]
    pub const fn last(&self) -> Option<&T> {
        match self {
            Self::TimedOut { last, .. } | Self::Cancelled { last, .. } => last.as_ref(),
            Self::Errored { .. } => None,
        }
    }
}

impl<T: Debug, E: Display> Display for RetryError<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimedOut {
                last,
                attempts,
                elapsed,
            } => {
                write!(f, "Timed out after {elapsed:?} ({attempts} attempts)")?;
                match last {
                    Some(last) => write!(f, ", last value: {last:?}"),
                    None => Ok(()),
                }
            }
            Self::Errored {
                source, attempts, ..
            } => write!(f, "Probe failed on attempt {attempts}: {source}"),
            Self::Cancelled {
                attempts, reason, ..
            } => match reason {
                Some(reason) => write!(f, "Cancelled by {reason} after {attempts} attempts"),
                None => write!(f, "Cancelled after {attempts} attempts"),
            },
        }
    }
}

impl<T: Debug, E: std::error::Error + 'static> std::error::Error for RetryError<T, E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Errored { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Sample `probe` until `predicate` accepts a value.
///
/// The first sample is taken immediately, later ones once per poll interval,
/// so a predicate first satisfied by the Nth sample returns after exactly N
/// samples. Cancelling `cancel` stops the loop within one poll interval.
pub fn retry_until<P, F>(
    mut probe: P,
    mut predicate: F,
    options: &RetryOptions,
    cancel: &CancelToken,
) -> Result<Satisfied<P::Output>, RetryError<P::Output, P::Error>>
where
    P: Probe,
    F: FnMut(&P::Output) -> bool,
{
    let interval = options.effective_poll_interval();
    let start = Instant::now();
    // `None` means the timeout is too large to represent: no deadline.
    let deadline = start.checked_add(options.timeout);
    let mut assertion = Assertion::new();
    let mut last = None;

    // Only the loop drives this assertion, so transitions cannot fail.
    let finish = |assertion: &mut Assertion, state: AssertionState| {
        let _ = assertion.finish(state);
        debug!(
            "Assertion {} after {} attempts in {:?}",
            state,
            assertion.attempts(),
            start.elapsed()
        );
    };

    loop {
        if cancel.is_cancelled() {
            finish(&mut assertion, AssertionState::Cancelled);
            return Err(RetryError::Cancelled {
                last,
                attempts: assertion.attempts(),
                reason: cancel.reason(),
            });
        }

        let attempt = assertion.record_attempt().unwrap_or_default();
        match probe.sample() {
            Ok(value) if predicate(&value) => {
                finish(&mut assertion, AssertionState::Satisfied);
                return Ok(Satisfied {
                    value,
                    attempts: attempt,
                    elapsed: start.elapsed(),
                });
            }
            Ok(value) => last = Some(value),
            Err(source) => {
                finish(&mut assertion, AssertionState::Errored);
                return Err(RetryError::Errored {
                    source,
                    attempts: attempt,
                    elapsed: start.elapsed(),
                });
            }
        }

        let now = Instant::now();
        if deadline.is_some_and(|deadline| now >= deadline) {
            finish(&mut assertion, AssertionState::TimedOut);
            return Err(RetryError::TimedOut {
                last,
                attempts: attempt,
                elapsed: start.elapsed(),
            });
        }

        let pause = deadline.map_or(interval, |deadline| interval.min(deadline - now));
        if !cancel.sleep(pause) {
            finish(&mut assertion, AssertionState::Cancelled);
            return Err(RetryError::Cancelled {
                last,
                attempts: attempt,
                reason: cancel.reason(),
            });
        }
    }
}
