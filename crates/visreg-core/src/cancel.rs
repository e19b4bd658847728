//! Cooperative cancellation.
//!
//! A `CancelToken` is shared between a test scope and everything running on
//! its behalf: retry loops, event waits, watchdogs. Cancelling drops the
//! token's internal sender, so every thread blocked in [`CancelToken::sleep`]
//! or selecting on [`CancelToken::signal`] wakes up immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

/// Why a token was cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    /// The owning test was aborted from outside.
    Aborted,
    /// The per-test deadline elapsed.
    TestTimeout,
    /// The owning test finished and is tearing down.
    Teardown,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aborted => write!(f, "aborted"),
            Self::TestTimeout => write!(f, "test timeout"),
            Self::Teardown => write!(f, "teardown"),
        }
    }
}

struct Inner {
    cancelled: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    /// Never sent on; dropping it disconnects `signal`.
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

/// Shared cancellation flag with a blocking wake-up channel.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        let (trigger, signal) = channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                reason: Mutex::new(None),
                trigger: Mutex::new(Some(trigger)),
                signal,
            }),
        }
    }

    /// Cancel with [`CancelReason::Aborted`].
    pub fn cancel(&self) {
        self.cancel_with(CancelReason::Aborted);
    }

    /// Cancel the token. The first reason recorded wins.
    pub fn cancel_with(&self, reason: CancelReason) {
        {
            let mut slot = self.inner.reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.inner.cancelled.store(true, Ordering::Release);
        drop(self.inner.trigger.lock().take());
    }

    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        *self.inner.reason.lock()
    }

    /// Receiver that disconnects when the token is cancelled.
    ///
    /// Intended for `crossbeam::select!`; nothing is ever sent on it.
    #[must_use]
    pub fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }

    /// Sleep for `duration` or until cancelled.
    ///
    /// Returns `true` if the full duration elapsed, `false` on cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        matches!(
            self.inner.signal.recv_timeout(duration),
            Err(RecvTimeoutError::Timeout)
        )
    }

    /// Arm a deadline: the token is cancelled with
    /// [`CancelReason::TestTimeout`] once `timeout` elapses.
    ///
    /// The watchdog thread exits as soon as the token is cancelled for any
    /// reason, so it never outlives the scope it guards.
    pub fn cancel_after(&self, timeout: Duration) -> std::io::Result<Watchdog> {
        let token = self.clone();
        let thread = thread::Builder::new()
            .name("visreg-watchdog".into())
            .spawn(move || {
                if token.sleep(timeout) {
                    tracing::warn!("Test deadline of {:?} elapsed, cancelling", timeout);
                    token.cancel_with(CancelReason::TestTimeout);
                }
            })?;

        Ok(Watchdog {
            token: self.clone(),
            thread: Some(thread),
        })
    }
}

/// Handle to a deadline thread started by [`CancelToken::cancel_after`].
pub struct Watchdog {
    token: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Whether the deadline fired.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.token.reason() == Some(CancelReason::TestTimeout)
    }

    /// Cancel the token with `reason` (unless already cancelled) and join the
    /// watchdog thread.
    pub fn disarm(mut self, reason: CancelReason) {
        self.token.cancel_with(reason);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.token.cancel_with(CancelReason::Teardown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
