// SPDX-License-Identifier: MIT OR Apache-2.0
//! launchpad-host
//!
//! Process supervision for services under end-to-end test: launch, readiness
//! detection, log capture and an escalating shutdown (control message, soft
//! signal, kill).
#![deny(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod escalation;
mod scan;

/// Test-framework adapter: timing hints, external target, pending teardown.
pub mod harness;
/// Lifecycle state machine for a supervised process.
pub mod lifecycle;
/// Append-only capture file.
pub mod log_sink;
/// Spawning and the per-process event loop.
pub mod supervisor;

pub use driver::ExitStatusInfo;
pub use escalation::{EscalationAction, EscalationStep};
pub use harness::{Harness, NoopTiming, TimingHooks};
pub use lifecycle::{LifecycleError, LifecycleManager, LifecycleTransition, ProcessState};
pub use log_sink::{LogSink, STDERR_PREFIX};
pub use supervisor::{
    EXIT_DRAIN_GRACE, ExitReport, PORT_IN_USE_MARKERS, Readiness, ServiceHandle, Supervisor,
};

use launchpad_config::ConfigError;
use thiserror::Error;

/// Errors from launching and supervising a service.
#[derive(Debug, Error)]
pub enum HostError {
    /// The launch options were rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The OS refused to spawn the process.
    #[error("failed to launch service: {0}")]
    Launch(#[source] std::io::Error),

    /// The capture file could not be opened.
    #[error("failed to open log file {path}: {source}")]
    LogSink {
        /// Configured log path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The service reported that its address is already in use.
    #[error("service address is already in use")]
    PortInUse,

    /// The service exited before it became ready.
    #[error("service exited before it was ready (code={code:?}, signal={signal:?})")]
    UnexpectedExit {
        /// Exit code, if any.
        code: Option<i32>,
        /// Terminating signal, if any.
        signal: Option<i32>,
    },

    /// A stop was requested before the service became ready.
    #[error("service was stopped before it was ready")]
    StoppedBeforeReady,

    /// The supervisor task ended without reporting.
    #[error("supervisor task ended unexpectedly")]
    SupervisorGone,
}

impl HostError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_invalid",
            Self::Launch(_) => "launch_failed",
            Self::LogSink { .. } => "log_unavailable",
            Self::PortInUse => "port_in_use",
            Self::UnexpectedExit { .. } => "unexpected_exit",
            Self::StoppedBeforeReady => "stopped_before_ready",
            Self::SupervisorGone => "supervisor_gone",
        }
    }
}
