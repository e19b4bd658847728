//! Per-test scopes.
//!
//! Each [`Harness::run`] call gets a fresh browsing context and a cancel
//! token armed with the test deadline. On return, or when the deadline
//! fires, the token is cancelled, which stops every retry loop and event
//! wait started on the test's behalf, and the context is closed.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use visreg_capture::{
    BaselineMode, CaptureEngine, CaptureError, CaptureRegion, CompareOptions, DiffResult,
    PixelBuffer, RenderTarget, TargetState,
};
use visreg_core::{CancelReason, CancelToken, ContextId, ScenarioId};
use visreg_env::{
    BrowserEvent, EnvError, EnvironmentController, EventKind, FetchOutcome, Network, Request,
    RequestOrigin, Response, StubNetwork, Subscription, WaitError, WebManifest,
};
use visreg_retry::{retry_until, Expect, Probe, RetryError, Satisfied};

use crate::{HarnessConfig, HarnessError, Result};

/// Owns the engines shared by all tests of a run.
pub struct Harness {
    config: HarnessConfig,
    capture: CaptureEngine,
    env: Arc<EnvironmentController>,
}

impl Harness {
    /// Create a new harness.
    ///
    /// # Arguments
    /// * `config` - Harness configuration
    /// * `network` - The live network requests go to while online
    pub fn new(config: HarnessConfig, network: Arc<dyn Network>) -> Self {
        let capture = CaptureEngine::new(&config.baseline_dir, &config.output_dir, config.mode);
        Self {
            config,
            capture,
            env: Arc::new(EnvironmentController::new(network)),
        }
    }

    /// Create a harness whose network answers 404 to everything.
    pub fn with_stub_network(config: HarnessConfig) -> Self {
        Self::new(config, Arc::new(StubNetwork::new()))
    }

    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    #[must_use]
    pub const fn capture_engine(&self) -> &CaptureEngine {
        &self.capture
    }

    /// Shared handle to the environment controller, e.g. for simulated
    /// page threads.
    #[must_use]
    pub fn env(&self) -> Arc<EnvironmentController> {
        Arc::clone(&self.env)
    }

    /// Run one test.
    ///
    /// # Arguments
    /// * `name` - Test name, used in failure messages
    /// * `body` - The test steps
    pub fn run<F>(&self, name: &str, body: F) -> Result<()>
    where
        F: FnOnce(&mut TestContext<'_>) -> Result<()>,
    {
        info!("Running test {}", name);

        let context = self.env.open_context();
        let cancel = CancelToken::new();
        let watchdog = cancel.cancel_after(self.config.test_timeout)?;

        let mut ctx = TestContext {
            harness: self,
            name: name.to_string(),
            context,
            cancel: cancel.clone(),
        };
        let outcome = body(&mut ctx);

        let expired = watchdog.expired();
        watchdog.disarm(CancelReason::Teardown);
        if let Err(e) = self.env.close_context(context) {
            warn!("Failed to close {} after {}: {}", context, name, e);
        }

        if expired {
            warn!("Test {} exceeded {:?}", name, self.config.test_timeout);
            return Err(HarnessError::TestTimeout {
                test: name.to_string(),
                timeout: self.config.test_timeout,
                cause: outcome.err().map(Box::new),
            });
        }

        match &outcome {
            Ok(()) => info!("Test {} passed", name),
            Err(e) => warn!("Test {} failed: {}", name, e),
        }
        outcome
    }
}

/// Handle passed to a running test body.
pub struct TestContext<'h> {
    harness: &'h Harness,
    name: String,
    context: ContextId,
    cancel: CancelToken,
}

impl TestContext<'_> {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Browsing context owned by this test.
    #[must_use]
    pub const fn context_id(&self) -> ContextId {
        self.context
    }

    /// Token cancelled on teardown or deadline; clone it to abort the test
    /// from another thread.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    #[must_use]
    pub fn env(&self) -> &EnvironmentController {
        &self.harness.env
    }

    fn capture_error(&self, source: CaptureError) -> HarnessError {
        HarnessError::Capture {
            test: self.name.clone(),
            source,
        }
    }

    fn env_error(&self, source: EnvError) -> HarnessError {
        HarnessError::Env {
            test: self.name.clone(),
            source,
        }
    }

    fn cancelled(&self, reason: Option<CancelReason>) -> HarnessError {
        HarnessError::Cancelled {
            test: self.name.clone(),
            reason: reason.unwrap_or(CancelReason::Aborted).to_string(),
        }
    }

    // --- Environment ---

    pub fn set_offline(&self, offline: bool) -> Result<()> {
        self.env()
            .set_offline(self.context, offline)
            .map_err(|e| self.env_error(e))
    }

    pub fn fetch(&self, url: &str, origin: RequestOrigin) -> Result<FetchOutcome> {
        self.env()
            .fetch(self.context, &Request::get(url), origin)
            .map_err(|e| self.env_error(e))
    }

    pub fn cache_put(&self, url: &str, response: Response) -> Result<()> {
        self.env()
            .cache_put(self.context, url, response)
            .map_err(|e| self.env_error(e))
    }

    pub fn fetch_manifest(&self, url: &str) -> Result<WebManifest> {
        self.env()
            .fetch_manifest(self.context, url)
            .map_err(|e| self.env_error(e))
    }

    /// Simulate the page emitting an event.
    pub fn emit(&self, kind: EventKind, identifier: &str) -> Result<BrowserEvent> {
        self.env()
            .emit(self.context, kind, identifier)
            .map_err(|e| self.env_error(e))
    }

    pub fn subscribe(&self, kind: EventKind) -> Result<Subscription> {
        self.env()
            .subscribe(self.context, kind)
            .map_err(|e| self.env_error(e))
    }

    /// Wait on a subscription until an event arrives or the test ends.
    pub fn next_event(&self, subscription: &Subscription) -> Result<BrowserEvent> {
        subscription
            .next(Duration::MAX, &self.cancel)
            .map_err(|e| match e {
                WaitError::Cancelled { .. } => self.cancelled(self.cancel.reason()),
                other => self.env_error(EnvError::Wait(other)),
            })
    }

    pub fn occurrences(&self, kind: &EventKind) -> Result<Vec<BrowserEvent>> {
        self.env()
            .occurrences(self.context, kind)
            .map_err(|e| self.env_error(e))
    }

    /// Wait for an event, past or future, until the test ends.
    pub fn wait_for_event(
        &self,
        kind: EventKind,
        predicate: impl Fn(&BrowserEvent) -> bool,
    ) -> Result<BrowserEvent> {
        self.env()
            .wait_for_event(
                self.context,
                kind,
                predicate,
                Duration::MAX,
                &self.cancel,
            )
            .map_err(|e| match e {
                EnvError::Wait(WaitError::Cancelled { .. }) => self.cancelled(self.cancel.reason()),
                other => self.env_error(other),
            })
    }

    // --- Assertions ---

    /// Expectation over `probe`, using the configured timing and this
    /// test's cancel token.
    pub fn expect<P>(&self, subject: impl Into<String>, probe: P) -> Expect<P>
    where
        P: Probe,
        P::Output: std::fmt::Debug,
        P::Error: std::fmt::Display,
    {
        Expect::new(subject, probe)
            .options(self.harness.config.retry_options())
            .cancel_on(&self.cancel)
    }

    /// Run the retry loop with the configured timing.
    pub fn retry_until<P, F>(
        &self,
        probe: P,
        predicate: F,
    ) -> std::result::Result<Satisfied<P::Output>, RetryError<P::Output, P::Error>>
    where
        P: Probe,
        F: FnMut(&P::Output) -> bool,
    {
        retry_until(
            probe,
            predicate,
            &self.harness.config.retry_options(),
            &self.cancel,
        )
    }

    /// Wait until `target` is attached and visible.
    pub fn expect_visible(&self, target: &dyn RenderTarget) -> Result<()> {
        self.expect_visibility(target, true)
    }

    /// Wait until `target` is hidden or detached.
    pub fn expect_hidden(&self, target: &dyn RenderTarget) -> Result<()> {
        self.expect_visibility(target, false)
    }

    fn expect_visibility(&self, target: &dyn RenderTarget, visible: bool) -> Result<()> {
        let probe = || {
            Ok::<_, CaptureError>(matches!(
                target.state(),
                TargetState::Attached { visible: true, width, height } if width > 0 && height > 0
            ))
        };
        let expect = self.expect(format!("{} visible", target.id()), probe);
        let outcome = if visible {
            expect.to_be_true()
        } else {
            expect.to_be_false()
        };
        outcome.map(|_| ()).map_err(|source| HarnessError::Assertion {
            test: self.name.clone(),
            source,
        })
    }

    // --- Capture ---

    pub fn capture(&self, target: &dyn RenderTarget, region: &CaptureRegion) -> Result<PixelBuffer> {
        self.harness
            .capture
            .capture(target, region)
            .map_err(|e| self.capture_error(e))
    }

    /// Compare options carrying the configured default threshold.
    #[must_use]
    pub fn compare_options(&self) -> CompareOptions {
        self.harness.config.compare_options()
    }

    /// Assert that `region` of `target` matches the baseline of `scenario`.
    ///
    /// Captures are retried until one matches or the assertion timeout
    /// elapses; the last capture is then compared once more so the failure
    /// carries diff artifacts. When a baseline is about to be written, the
    /// harness first waits for two identical consecutive captures.
    pub fn expect_screenshot(
        &self,
        target: &dyn RenderTarget,
        region: &CaptureRegion,
        scenario: &str,
        options: &CompareOptions,
    ) -> Result<DiffResult> {
        let scenario = ScenarioId::new(scenario)?;
        let engine = &self.harness.capture;

        let writes_baseline = match engine.mode() {
            BaselineMode::Update => true,
            BaselineMode::Create => !engine.store().exists(&scenario),
            BaselineMode::Compare => false,
        };

        if writes_baseline {
            let stable = self.stable_capture(target, region)?;
            return engine
                .compare(&stable, &scenario, options)
                .map_err(|e| self.capture_error(e));
        }

        let probe = || -> std::result::Result<_, CaptureError> {
            let pixels = engine.capture(target, region)?;
            let diff = engine.evaluate(&pixels, &scenario, options)?;
            Ok((pixels, diff))
        };

        match self.retry_until(probe, |(_, diff)| diff.passed) {
            Ok(satisfied) => Ok(satisfied.value.1),
            Err(RetryError::TimedOut {
                last: Some((pixels, _)),
                ..
            }) => engine
                .compare(&pixels, &scenario, options)
                .map_err(|e| self.capture_error(e)),
            Err(RetryError::TimedOut { last: None, .. }) => Err(self.capture_error(
                CaptureError::Render {
                    target: target.id().clone(),
                    reason: format!("no capture completed for scenario {scenario}"),
                },
            )),
            Err(RetryError::Errored { source, .. }) => Err(self.capture_error(source)),
            Err(RetryError::Cancelled { reason, .. }) => Err(self.cancelled(reason)),
        }
    }

    /// Capture until two consecutive captures are identical.
    fn stable_capture(&self, target: &dyn RenderTarget, region: &CaptureRegion) -> Result<PixelBuffer> {
        let engine = &self.harness.capture;
        let mut previous: Option<PixelBuffer> = None;
        let is_stable = |current: &PixelBuffer| {
            let stable = previous.as_ref() == Some(current);
            previous = Some(current.clone());
            stable
        };

        match self.retry_until(|| engine.capture(target, region), is_stable) {
            Ok(satisfied) => Ok(satisfied.value),
            Err(RetryError::TimedOut { last, attempts, .. }) => {
                warn!(
                    "{} never rendered two identical frames in {} attempts",
                    target.id(),
                    attempts
                );
                Err(self.capture_error(CaptureError::Render {
                    target: target.id().clone(),
                    reason: format!(
                        "capture did not stabilize within {:?}{}",
                        self.harness.config.assertion_timeout,
                        if last.is_some() { "" } else { " (no frames)" }
                    ),
                }))
            }
            Err(RetryError::Errored { source, .. }) => Err(self.capture_error(source)),
            Err(RetryError::Cancelled { reason, .. }) => Err(self.cancelled(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::thread;
    use std::time::{Duration, Instant};

    use approx::assert_relative_eq;
    use image::Rgba;
    use tempfile::TempDir;
    use visreg_capture::Canvas;
    use visreg_core::Rect;
    use visreg_env::ServedFrom;

    use super::*;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    fn config(dir: &TempDir, mode: BaselineMode) -> HarnessConfig {
        HarnessConfig::new()
            .with_baseline_dir(dir.path().join("baselines"))
            .with_output_dir(dir.path().join("out"))
            .with_mode(mode)
            .with_assertion_timeout(Duration::from_millis(300))
            .with_poll_interval(Duration::from_millis(20))
            .with_test_timeout(Duration::from_secs(5))
    }

    fn full(canvas: &Canvas) -> CaptureRegion {
        CaptureRegion::full(canvas.id().clone())
    }

    #[test]
    fn stable_region_matches_with_zero_tolerance() {
        let dir = TempDir::new().unwrap();
        let harness = Harness::with_stub_network(config(&dir, BaselineMode::Create));
        let canvas = Canvas::filled("chart", 100, 100, WHITE);
        let strict = CompareOptions::with_tolerance(0.0);

        harness
            .run("create", |ctx| {
                ctx.expect_screenshot(&canvas, &full(&canvas), "chart", &strict)?;
                Ok(())
            })
            .unwrap();
        assert!(dir.path().join("baselines/chart.png").exists());

        harness
            .run("compare", |ctx| {
                let diff = ctx.expect_screenshot(&canvas, &full(&canvas), "chart", &strict)?;
                assert_eq!(diff.differing_pixels, 0);
                assert!(diff.passed);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn single_changed_pixel_reports_ratio_and_artifacts() {
        let dir = TempDir::new().unwrap();
        let harness = Harness::with_stub_network(config(&dir, BaselineMode::Create));
        let canvas = Canvas::filled("chart", 100, 100, WHITE);
        let strict = CompareOptions::with_tolerance(0.0);

        harness
            .run("create", |ctx| {
                ctx.expect_screenshot(&canvas, &full(&canvas), "chart", &strict)?;
                Ok(())
            })
            .unwrap();

        canvas.set_pixel(42, 17, BLACK);
        let err = harness
            .run("changed", |ctx| {
                ctx.expect_screenshot(&canvas, &full(&canvas), "chart", &strict)?;
                Ok(())
            })
            .unwrap_err();

        let Some(CaptureError::ContentMismatch(mismatch)) = err.as_capture() else {
            panic!("expected a content mismatch, got {err}");
        };
        assert_eq!(mismatch.diff.differing_pixels, 1);
        assert_relative_eq!(mismatch.diff.ratio, 1.0 / 10_000.0);
        let artifacts = mismatch.artifacts.as_ref().unwrap();
        assert!(artifacts.diff.exists());
        assert!(artifacts.actual.exists());
    }

    #[test]
    fn masked_change_still_matches() {
        let dir = TempDir::new().unwrap();
        let harness = Harness::with_stub_network(config(&dir, BaselineMode::Create));
        let canvas = Canvas::filled("chart", 100, 100, WHITE);
        let options = CompareOptions::with_tolerance(0.0).mask(Rect::new(0, 0, 10, 10));

        harness
            .run("create", |ctx| {
                ctx.expect_screenshot(&canvas, &full(&canvas), "clock", &options)?;
                Ok(())
            })
            .unwrap();

        canvas.fill_rect(Rect::new(2, 2, 5, 5), BLACK);
        harness
            .run("masked", |ctx| {
                let diff = ctx.expect_screenshot(&canvas, &full(&canvas), "clock", &options)?;
                assert_eq!(diff.differing_pixels, 0);
                assert_eq!(diff.masked_pixels, 100);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn missing_baseline_fails_in_compare_mode() {
        let dir = TempDir::new().unwrap();
        let harness = Harness::with_stub_network(config(&dir, BaselineMode::Compare));
        let canvas = Canvas::filled("chart", 10, 10, WHITE);

        let err = harness
            .run("missing", |ctx| {
                let options = ctx.compare_options();
                ctx.expect_screenshot(&canvas, &full(&canvas), "nowhere", &options)?;
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(
            err.as_capture(),
            Some(CaptureError::BaselineMissing { .. })
        ));
        assert!(!dir.path().join("baselines/nowhere.png").exists());
    }

    #[test]
    fn update_mode_replaces_baseline() {
        let dir = TempDir::new().unwrap();
        let canvas = Canvas::filled("chart", 10, 10, WHITE);
        let options = CompareOptions::with_tolerance(0.0);

        let create = Harness::with_stub_network(config(&dir, BaselineMode::Create));
        create
            .run("create", |ctx| {
                ctx.expect_screenshot(&canvas, &full(&canvas), "chart", &options)?;
                Ok(())
            })
            .unwrap();

        canvas.clear(BLACK);
        let update = Harness::with_stub_network(config(&dir, BaselineMode::Update));
        update
            .run("update", |ctx| {
                ctx.expect_screenshot(&canvas, &full(&canvas), "chart", &options)?;
                Ok(())
            })
            .unwrap();

        let compare = Harness::with_stub_network(config(&dir, BaselineMode::Compare));
        compare
            .run("compare", |ctx| {
                ctx.expect_screenshot(&canvas, &full(&canvas), "chart", &options)?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn subscription_taken_before_trigger_sees_event() {
        let dir = TempDir::new().unwrap();
        let harness = Harness::with_stub_network(config(&dir, BaselineMode::Compare));
        let env = harness.env();

        harness
            .run("worker", |ctx| {
                let registered = ctx.subscribe(EventKind::WorkerRegistered)?;
                let context = ctx.context_id();
                let page = {
                    let env = Arc::clone(&env);
                    thread::spawn(move || {
                        thread::sleep(Duration::from_millis(50));
                        env.emit(context, EventKind::WorkerRegistered, "/sw.js")
                    })
                };
                let event = ctx.next_event(&registered)?;
                assert_eq!(event.identifier, "/sw.js");
                page.join().unwrap().unwrap();
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn wait_for_event_finds_earlier_event() {
        let dir = TempDir::new().unwrap();
        let harness = Harness::with_stub_network(config(&dir, BaselineMode::Compare));

        harness
            .run("download", |ctx| {
                ctx.emit(EventKind::DownloadStarted, "report.csv")?;
                let event = ctx.wait_for_event(EventKind::DownloadStarted, |e| {
                    e.identifier.ends_with(".csv")
                })?;
                assert_eq!(event.identifier, "report.csv");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn offline_requests_use_cache_or_fail() {
        let dir = TempDir::new().unwrap();
        let network = Arc::new(
            StubNetwork::new()
                .route("https://app.test/", Response::ok("text/html", "<p>online</p>"))
                .route("https://app.test/api", Response::ok("application/json", "{}")),
        );
        let harness = Harness::new(config(&dir, BaselineMode::Compare), network.clone());

        harness
            .run("offline", |ctx| {
                ctx.cache_put("https://app.test/", Response::ok("text/html", "<p>cached</p>"))?;
                ctx.set_offline(true)?;

                let page = ctx.fetch("https://app.test/", RequestOrigin::MainThread)?;
                assert_eq!(page.served_from, ServedFrom::Cache);
                assert_eq!(page.response.text(), "<p>cached</p>");

                let err = ctx
                    .fetch("https://app.test/api", RequestOrigin::MainThread)
                    .unwrap_err();
                assert!(matches!(
                    err,
                    HarnessError::Env {
                        source: EnvError::Offline { .. },
                        ..
                    }
                ));

                ctx.set_offline(false)?;
                let api = ctx.fetch("https://app.test/api", RequestOrigin::MainThread)?;
                assert_eq!(api.served_from, ServedFrom::Network);
                Ok(())
            })
            .unwrap();

        assert_eq!(network.requests().len(), 1);
    }

    #[test]
    fn manifest_is_fetched_and_validated() {
        let dir = TempDir::new().unwrap();
        let manifest = r#"{
            "name": "Weather",
            "start_url": "/",
            "display": "standalone",
            "icons": [{ "src": "/icon.png", "sizes": "192x192", "type": "image/png" }]
        }"#;
        let network = Arc::new(StubNetwork::new().route(
            "https://app.test/manifest.json",
            Response::ok("application/manifest+json", manifest),
        ));
        let harness = Harness::new(config(&dir, BaselineMode::Compare), network);

        harness
            .run("manifest", |ctx| {
                let manifest = ctx.fetch_manifest("https://app.test/manifest.json")?;
                assert_eq!(manifest.name.as_deref(), Some("Weather"));
                assert_eq!(manifest.icons.len(), 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn hidden_and_detached_targets_count_as_hidden() {
        let dir = TempDir::new().unwrap();
        let harness = Harness::with_stub_network(config(&dir, BaselineMode::Compare));
        let banner = Canvas::filled("banner", 20, 5, WHITE);

        harness
            .run("visibility", |ctx| {
                ctx.expect_visible(&banner)?;
                banner.set_visible(false);
                ctx.expect_hidden(&banner)?;
                banner.set_visible(true);
                banner.detach();
                ctx.expect_hidden(&banner)?;
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_timeout_cancels_pending_assertion() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, BaselineMode::Compare)
            .with_assertion_timeout(Duration::from_secs(30))
            .with_test_timeout(Duration::from_millis(200));
        let harness = Harness::with_stub_network(config);

        let start = Instant::now();
        let err = harness
            .run("stuck", |ctx| {
                let outcome = ctx
                    .expect("spinner gone", || Ok::<_, Infallible>(false))
                    .to_be_true();
                assert!(outcome.is_err());
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, HarnessError::TestTimeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn context_is_closed_after_run() {
        let dir = TempDir::new().unwrap();
        let harness = Harness::with_stub_network(config(&dir, BaselineMode::Compare));
        let mut seen = None;

        harness
            .run("scope", |ctx| {
                seen = Some(ctx.context_id());
                Ok(())
            })
            .unwrap();

        let env = harness.env();
        assert!(env.is_offline(seen.unwrap()).is_err());
    }

    #[test]
    fn test_timeout_keeps_last_observed_value() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, BaselineMode::Compare)
            .with_assertion_timeout(Duration::from_secs(30))
            .with_test_timeout(Duration::from_millis(200));
        let harness = Harness::with_stub_network(config);

        let err = harness
            .run("status", |ctx| {
                ctx.expect("status text", || Ok::<_, Infallible>("Loading"))
                    .to_equal("Ready")
                    .map_err(|source| HarnessError::Assertion {
                        test: ctx.name().to_string(),
                        source,
                    })?;
                Ok(())
            })
            .unwrap_err();

        let HarnessError::TestTimeout { cause: Some(cause), .. } = &err else {
            panic!("expected a test timeout with a cause, got {err}");
        };
        assert!(matches!(**cause, HarnessError::Assertion { .. }));
        assert!(err.to_string().contains("\"Loading\""));
    }

    #[test]
    fn test_timeout_wakes_pending_event_waits() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, BaselineMode::Compare).with_test_timeout(Duration::from_millis(200));
        let harness = Harness::with_stub_network(config);

        let start = Instant::now();
        let err = harness
            .run("subscription", |ctx| {
                let registered = ctx.subscribe(EventKind::WorkerRegistered)?;
                ctx.next_event(&registered)?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(
            err,
            HarnessError::TestTimeout { cause: Some(ref cause), .. }
                if matches!(**cause, HarnessError::Cancelled { .. })
        ));

        let err = harness
            .run("wait", |ctx| {
                ctx.wait_for_event(EventKind::DownloadStarted, |_| true)?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(
            err,
            HarnessError::TestTimeout { cause: Some(ref cause), .. }
                if matches!(**cause, HarnessError::Cancelled { .. })
        ));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn aborted_screenshot_reports_cancellation() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir, BaselineMode::Create).with_assertion_timeout(Duration::from_secs(30));
        let harness = Harness::with_stub_network(config);
        let canvas = Canvas::filled("chart", 10, 10, WHITE);
        let strict = CompareOptions::with_tolerance(0.0);

        harness
            .run("create", |ctx| {
                ctx.expect_screenshot(&canvas, &full(&canvas), "chart", &strict)?;
                Ok(())
            })
            .unwrap();

        canvas.clear(BLACK);
        let err = harness
            .run("aborted", |ctx| {
                let cancel = ctx.cancel_token().clone();
                let aborter = thread::spawn(move || {
                    thread::sleep(Duration::from_millis(50));
                    cancel.cancel();
                });
                let outcome = ctx.expect_screenshot(&canvas, &full(&canvas), "chart", &strict);
                aborter.join().unwrap();
                outcome.map(|_| ())
            })
            .unwrap_err();

        assert!(matches!(
            err,
            HarnessError::Cancelled { ref reason, .. } if reason == "aborted"
        ));
    }
}

