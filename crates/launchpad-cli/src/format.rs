// SPDX-License-Identifier: MIT OR Apache-2.0
//! Human-readable output for the `launchpad` binary.

use launchpad_config::LaunchConfig;
use launchpad_host::{EscalationAction, ExitReport};
use std::fmt::Write;

/// Key/value summary of a validated launch.
pub fn config_summary(config: &LaunchConfig) -> String {
    let mut out = String::new();
    let term_ipc = config
        .term_message()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".into());
    let rows = [
        ("title", config.title().to_string()),
        ("command", config.command_line()),
        ("cwd", config.cwd().display().to_string()),
        ("log_path", config.log_path().display().to_string()),
        ("ready_notice", config.ready_notice().to_string()),
        ("timeout", format!("{}ms", config.start_timeout().as_millis())),
        ("slow", format!("{}ms", config.slow().as_millis())),
        ("term_code", config.term_signal().to_string()),
        ("term_timeout", format!("{}ms", config.term_timeout().as_millis())),
        ("term_ipc", term_ipc),
        ("coverage", config.coverage().to_string()),
    ];
    for (key, value) in rows {
        let _ = writeln!(out, "{key:<13} {value}");
    }
    out
}

/// Multi-line summary of an exit report.
pub fn report_summary(report: &ExitReport) -> String {
    let mut out = String::new();
    let status = match (report.code, report.signal) {
        (Some(code), _) => format!("exit code {code}"),
        (None, Some(signal)) => format!("signal {signal}"),
        (None, None) => "unknown".to_string(),
    };
    let _ = writeln!(out, "service exited: {status}");
    let _ = writeln!(out, "was ready:      {}", report.was_ready);
    let _ = writeln!(out, "lifetime:       {}ms", report.lifetime.as_millis());
    for step in &report.steps {
        let action = match &step.action {
            EscalationAction::Message => "control message".to_string(),
            EscalationAction::Signal { signal } => signal.to_string(),
        };
        let _ = writeln!(out, "  +{}ms {action}", step.after.as_millis());
    }
    out
}
