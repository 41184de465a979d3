//! U320 scenario replay tool.
//!
//! Loads a TOML scenario, builds a simulated adapter from its `[adapter]`
//! table and runs each `[[step]]` against the interrupt and recovery core.
//! Driver log records go to stderr, step results to stdout. The exit status
//! is non-zero if any `expect` step failed.

mod cli;
mod scenario;

use anyhow::{Context, Result, bail};
use clap::Parser;
use u320_core::log::{self, Record};

use scenario::{Replay, Scenario};

fn stderr_log(record: &Record<'_>) {
    eprintln!("{record}");
}

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    log::set_max_level(cli.log_level.into());
    // SAFETY: `stderr_log` only writes to stderr and never calls the driver.
    unsafe { log::set_log_fn(stderr_log) };

    let scenario = Scenario::load(&cli.scenario)?;
    let mut replay = Replay::new(&scenario.adapter, cli.verbose)?;
    for (index, step) in scenario.steps.iter().enumerate() {
        replay
            .step(step)
            .with_context(|| format!("step {} ({})", index + 1, step.name()))?;
        if cli.fail_fast && !replay.failures.is_empty() {
            break;
        }
    }

    replay.summary();
    for failure in &replay.failures {
        eprintln!("expectation failed: {failure}");
    }
    if !replay.failures.is_empty() {
        bail!("{} expectation(s) failed", replay.failures.len());
    }
    Ok(())
}
