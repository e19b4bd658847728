//! Harness configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use visreg_capture::{BaselineMode, CompareOptions};
use visreg_core::defaults;
use visreg_retry::RetryOptions;

/// Environment variable that switches baseline handling:
/// `1`/`all` updates every baseline, `missing` creates absent ones.
pub const UPDATE_SNAPSHOTS_ENV: &str = "VISREG_UPDATE_SNAPSHOTS";

/// Harness configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Directory for baseline images.
    pub baseline_dir: PathBuf,
    /// Directory for diff artifacts.
    pub output_dir: PathBuf,
    pub mode: BaselineMode,
    /// Default maximum differing-pixel ratio (0.0-1.0).
    pub threshold: f64,
    /// Timeout of a single retrying assertion.
    pub assertion_timeout: Duration,
    /// Pause between probe samples.
    pub poll_interval: Duration,
    /// Timeout of a whole test.
    pub test_timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            baseline_dir: PathBuf::from("tests/baselines"),
            output_dir: PathBuf::from("target/visreg"),
            mode: BaselineMode::Compare,
            threshold: defaults::MAX_DIFF_RATIO,
            assertion_timeout: defaults::ASSERTION_TIMEOUT,
            poll_interval: defaults::POLL_INTERVAL,
            test_timeout: defaults::TEST_TIMEOUT,
        }
    }
}

impl HarnessConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_baseline_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.baseline_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: BaselineMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub const fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub const fn with_assertion_timeout(mut self, timeout: Duration) -> Self {
        self.assertion_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    /// Retry timing for assertions.
    #[must_use]
    pub const fn retry_options(&self) -> RetryOptions {
        RetryOptions::new(self.assertion_timeout, self.poll_interval)
    }

    /// Compare options carrying the default threshold.
    #[must_use]
    pub fn compare_options(&self) -> CompareOptions {
        CompareOptions::with_tolerance(self.threshold)
    }

    /// Build from process arguments and environment.
    #[must_use]
    pub fn from_args() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::parse_args(&args).apply_env(|key| std::env::var(key).ok())
    }

    /// Parse from a slice of arguments.
    ///
    /// Recognizes the following flags:
    /// - `-u` or `--update-snapshots`: Replace every baseline
    /// - `--create-missing`: Create baselines that do not exist yet
    /// - `--threshold <RATIO>`: Default maximum differing-pixel ratio
    /// - `--baseline-dir <DIR>`: Baseline directory
    /// - `--output-dir <DIR>`: Diff artifact directory
    /// - `--timeout-ms <MS>`: Per-test timeout
    ///
    /// Unknown flags and unparsable values are ignored.
    #[must_use]
    pub fn parse_args(args: &[String]) -> Self {
        let mut config = Self::default();

        let mut i = 1;
        while i < args.len() {
            let value = args.get(i + 1);
            match args[i].as_str() {
                "-u" | "--update-snapshots" => {
                    config.mode = BaselineMode::Update;
                }
                "--create-missing" => {
                    config.mode = BaselineMode::Create;
                }
                "--threshold" => {
                    if let Some(threshold) = value.and_then(|v| v.parse::<f64>().ok()) {
                        if (0.0..=1.0).contains(&threshold) {
                            config.threshold = threshold;
                        }
                    }
                    i += 1;
                }
                "--baseline-dir" => {
                    if let Some(dir) = value {
                        config.baseline_dir = PathBuf::from(dir);
                    }
                    i += 1;
                }
                "--output-dir" => {
                    if let Some(dir) = value {
                        config.output_dir = PathBuf::from(dir);
                    }
                    i += 1;
                }
                "--timeout-ms" => {
                    if let Some(ms) = value.and_then(|v| v.parse::<u64>().ok()) {
                        config.test_timeout = Duration::from_millis(ms);
                    }
                    i += 1;
                }
                _ => {}
            }
            i += 1;
        }

        config
    }

    /// Apply [`UPDATE_SNAPSHOTS_ENV`] through `lookup`.
    #[must_use]
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        match lookup(UPDATE_SNAPSHOTS_ENV).as_deref().map(str::trim) {
            Some("1" | "all" | "true") => self.mode = BaselineMode::Update,
            Some("missing") => self.mode = BaselineMode::Create,
            _ => {}
        }
        self
    }
}
