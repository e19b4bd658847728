//! Compare a captured PNG against a stored baseline.
//!
//! ```text
//! visreg-diff <ACTUAL.png> <SCENARIO> [--threshold R] [--mask X,Y,W,H]...
//!             [--max-pixels N] [--channel-threshold N]
//!             [-u | --create-missing] [--baseline-dir DIR] [--output-dir DIR]
//! ```
//!
//! Exits non-zero on a mismatch or a missing baseline. The baseline mode can
//! also be set through `VISREG_UPDATE_SNAPSHOTS`.

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;
use visreg_capture::{CaptureEngine, CompareOptions, PixelBuffer};
use visreg_core::{Rect, ScenarioId};
use visreg_test::HarnessConfig;

/// Flags whose value is the following argument.
const VALUE_FLAGS: &[&str] = &[
    "--threshold",
    "--mask",
    "--max-pixels",
    "--channel-threshold",
    "--baseline-dir",
    "--output-dir",
    "--timeout-ms",
];

struct DiffArgs {
    actual: String,
    scenario: ScenarioId,
    options: CompareOptions,
}

fn parse_rect(value: &str) -> Result<Rect> {
    let parts = value
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid mask {value:?}"))?;
    match parts.as_slice() {
        &[x, y, width, height] => Ok(Rect::new(x, y, width, height)),
        _ => bail!("mask {value:?} must be X,Y,W,H"),
    }
}

fn parse_diff_args(args: &[String], config: &HarnessConfig) -> Result<DiffArgs> {
    let mut positional = Vec::new();
    let mut options = config.compare_options();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        if !VALUE_FLAGS.contains(&flag) {
            if !flag.starts_with('-') {
                positional.push(flag.to_string());
            }
            i += 1;
            continue;
        }

        let value = args
            .get(i + 1)
            .with_context(|| format!("{flag} needs a value"))?;
        match flag {
            "--mask" => options = options.mask(parse_rect(value)?),
            "--max-pixels" => {
                options = options.max_diff_pixels(value.parse().context("invalid --max-pixels")?);
            }
            "--channel-threshold" => {
                options =
                    options.channel_threshold(value.parse().context("invalid --channel-threshold")?);
            }
            _ => {}
        }
        i += 2;
    }

    let [actual, scenario] = <[String; 2]>::try_from(positional)
        .map_err(|_| anyhow::anyhow!("usage: visreg-diff <ACTUAL.png> <SCENARIO> [options]"))?;

    Ok(DiffArgs {
        actual,
        scenario: scenario.parse()?,
        options,
    })
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = HarnessConfig::from_args();
    let diff_args = parse_diff_args(&args, &config)?;

    let actual = PixelBuffer::load(&diff_args.actual)
        .with_context(|| format!("failed to load {}", diff_args.actual))?;
    let engine = CaptureEngine::new(&config.baseline_dir, &config.output_dir, config.mode);

    info!(
        "Comparing {} against {} ({:?})",
        diff_args.actual,
        engine.store().path(&diff_args.scenario).display(),
        config.mode
    );
    let diff = engine.compare(&actual, &diff_args.scenario, &diff_args.options)?;
    info!(
        "{}: {} of {} pixels differ (ratio {:.6})",
        diff_args.scenario, diff.differing_pixels, diff.total_pixels, diff.ratio
    );
    Ok(())
}
