//! Retrying expectations with readable failures.

use std::fmt::{Debug, Display};
use std::time::Duration;

use visreg_core::CancelToken;

use crate::assertion::AssertionState;
use crate::probe::Probe;
use crate::retry::{retry_until, RetryError, RetryOptions};

/// A failed expectation, with everything needed to diagnose it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionFailure {
    /// What was probed.
    pub subject: String,
    /// What it was expected to do, e.g. `to equal "Ready"`.
    pub expected: String,
    /// Last value seen, rendered with `Debug`.
    pub actual: Option<String>,
    pub state: AssertionState,
    pub attempts: u32,
    /// Probe error or cancellation reason.
    pub cause: Option<String>,
}

impl Display for AssertionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "expect({}) {}: {} after {} attempts",
            self.subject, self.expected, self.state, self.attempts
        )?;
        if let Some(actual) = &self.actual {
            write!(f, ", last value: {actual}")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, ", cause: {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AssertionFailure {}

/// Builder for a retrying expectation over one probe.
///
/// ```ignore
/// Expect::new("status text", || page.text("#status"))
///     .timeout(Duration::from_secs(2))
///     .to_equal("Offline".to_string())?;
/// ```
pub struct Expect<P> {
    subject: String,
    probe: P,
    options: RetryOptions,
    cancel: CancelToken,
}

impl<P> Expect<P>
where
    P: Probe,
    P::Output: Debug,
    P::Error: Display,
{
    pub fn new(subject: impl Into<String>, probe: P) -> Self {
        Self {
            subject: subject.into(),
            probe,
            options: RetryOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.options.poll_interval = interval;
        self
    }

    #[must_use]
    pub const fn options(mut self, options: RetryOptions) -> Self {
        self.options = options;
        self
    }

    /// Stop retrying when `cancel` fires.
    #[must_use]
    pub fn cancel_on(mut self, cancel: &CancelToken) -> Self {
        self.cancel = cancel.clone();
        self
    }

    /// Expect the probed value to satisfy `predicate`.
    ///
    /// `expected` describes the predicate in failure messages.
    pub fn to_satisfy(
        self,
        expected: impl Into<String>,
        predicate: impl FnMut(&P::Output) -> bool,
    ) -> Result<P::Output, AssertionFailure> {
        let Self {
            subject,
            probe,
            options,
            cancel,
        } = self;

        retry_until(probe, predicate, &options, &cancel)
            .map(|satisfied| satisfied.value)
            .map_err(|err| failure(subject, expected.into(), &err))
    }

    pub fn to_equal(self, expected: P::Output) -> Result<P::Output, AssertionFailure>
    where
        P::Output: PartialEq,
    {
        let description = format!("to equal {expected:?}");
        self.to_satisfy(description, move |value| *value == expected)
    }
}

impl<P> Expect<P>
where
    P: Probe<Output = bool>,
    P::Error: Display,
{
    pub fn to_be_true(self) -> Result<bool, AssertionFailure> {
        self.to_satisfy("to be true", |v| *v)
    }

    pub fn to_be_false(self) -> Result<bool, AssertionFailure> {
        self.to_satisfy("to be false", |v| !*v)
    }
}

fn failure<T: Debug, E: Display>(
    subject: String,
    expected: String,
    err: &RetryError<T, E>,
) -> AssertionFailure {
    let cause = match err {
        RetryError::Errored { source, .. } => Some(source.to_string()),
        RetryError::Cancelled {
            reason: Some(reason),
            ..
        } => Some(reason.to_string()),
        _ => None,
    };

    AssertionFailure {
        subject,
        expected,
        actual: err.last().map(|v| format!("{v:?}")),
        state: err.state(),
        attempts: err.attempts(),
        cause,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast<P>(expect: Expect<P>) -> Expect<P>
    where
        P: Probe,
        P::Output: Debug,
        P::Error: Display,
    {
        expect
            .timeout(Duration::from_millis(50))
            .poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn to_equal_passes_when_value_arrives() {
        let n = Cell::new(0);
        let value = fast(Expect::new("counter", || {
            n.set(n.get() + 1);
            Ok::<_, String>(n.get())
        }))
        .to_equal(3)
        .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn timeout_failure_message() {
        let failure = fast(Expect::new("status text", || Ok::<_, String>("Online")))
            .to_equal("Offline")
            .unwrap_err();

        assert_eq!(failure.state, AssertionState::TimedOut);
        assert_eq!(failure.actual.as_deref(), Some("\"Online\""));
        let message = failure.to_string();
        assert!(message.starts_with("expect(status text) to equal \"Offline\": timed out after"));
        assert!(message.ends_with(", last value: \"Online\""));
    }

    #[test]
    fn errored_failure_carries_cause() {
        let failure = fast(Expect::new("#banner visible", || {
            Err::<bool, _>("element detached")
        }))
        .to_be_true()
        .unwrap_err();

        insta::assert_snapshot!(
            failure.to_string(),
            @"expect(#banner visible) to be true: errored after 1 attempts, cause: element detached"
        );
    }

    #[test]
    fn to_be_false() {
        assert!(!fast(Expect::new("spinner visible", || Ok::<_, String>(false)))
            .to_be_false()
            .unwrap());
    }

    #[test]
    fn cancelled_expectation() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let failure = fast(Expect::new("ready", || Ok::<_, String>(false)))
            .cancel_on(&cancel)
            .to_be_true()
            .unwrap_err();
        assert_eq!(failure.state, AssertionState::Cancelled);
        assert_eq!(failure.cause.as_deref(), Some("aborted"));
    }
}
