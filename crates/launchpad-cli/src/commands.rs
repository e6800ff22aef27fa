// SPDX-License-Identifier: MIT OR Apache-2.0
//! Command implementations for the `launchpad` binary.

use crate::format;
use anyhow::{Context, Result};
use launchpad_config::{LaunchConfig, LaunchMode};
use launchpad_host::{ExitReport, Supervisor};
use std::path::Path;
use tracing::{info, warn};

/// Load and validate an options file.
pub fn load_config(path: &Path, cover: bool) -> Result<LaunchConfig> {
    let raw = launchpad_config::load_options(path)
        .with_context(|| format!("load options from '{}'", path.display()))?;
    let mode = if cover {
        LaunchMode::Coverage
    } else {
        LaunchMode::from_env()
    };
    Ok(launchpad_config::validate_with(&raw, mode)?)
}

/// `launchpad check`: validate and describe the resolved launch.
pub fn check(path: &Path, cover: bool, json: bool) -> Result<()> {
    let config = load_config(path, cover)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&config).context("serialize config")?
        );
    } else {
        print!("{}", format::config_summary(&config));
    }
    Ok(())
}

/// `launchpad up`: start the service and hold it until Ctrl-C.
pub async fn up(path: &Path, cover: bool, json: bool) -> Result<()> {
    let config = load_config(path, cover)?;
    if let Some(target) = launchpad_config::external_target() {
        println!("test target: {target}");
        return Ok(());
    }

    let handle = Supervisor::start(config).await?;
    println!("service ready: {}", handle.command_line());

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(target: "launchpad.cli", error = %e, "failed to listen for ctrl-c; stopping");
            }
            info!(target: "launchpad.cli", "stopping service");
            let report = handle.stop().await;
            print_report(&report, json)
        }
        report = handle.wait() => {
            print_report(&report, json)?;
            anyhow::bail!("service exited on its own");
        }
    }
}

fn print_report(report: &ExitReport, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).context("serialize exit report")?
        );
    } else {
        print!("{}", format::report_summary(report));
    }
    Ok(())
}
