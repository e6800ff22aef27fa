// SPDX-License-Identifier: MIT OR Apache-2.0
//! Adapter between a test framework's suite hooks and the supervisor.

use crate::HostError;
use crate::supervisor::{ExitReport, ServiceHandle, Supervisor};
use launchpad_config::LaunchConfig;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Receives per-hook timing hints from the harness.
///
/// Implement this for whatever test context can adjust its own time budget.
pub trait TimingHooks {
    /// The hook should fail after `limit`.
    fn timeout(&mut self, _limit: Duration) {}

    /// The hook should be reported as slow past `threshold`.
    fn slow(&mut self, _threshold: Duration) {}
}

/// Hooks that ignore every hint.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTiming;

impl TimingHooks for NoopTiming {}

/// Suite-level setup/teardown pair for one supervised service.
///
/// Holds the service launched by [`setup`](Harness::setup) until
/// [`teardown`](Harness::teardown) stops it.
#[derive(Debug)]
pub struct Harness {
    config: LaunchConfig,
    external_target: Option<String>,
    service: Option<ServiceHandle>,
}

impl Harness {
    /// Build a harness, reading the external-target switch from the environment.
    pub fn new(config: LaunchConfig) -> Self {
        Self {
            config,
            external_target: launchpad_config::external_target(),
            service: None,
        }
    }

    /// Validate raw options and build a harness from them.
    pub fn from_options(raw: &Value) -> Result<Self, HostError> {
        Ok(Self::new(launchpad_config::validate(raw)?))
    }

    /// Override the external target. `Some` makes setup skip the launch.
    #[must_use]
    pub fn with_external_target(mut self, target: Option<String>) -> Self {
        self.external_target = target;
        self
    }

    /// The validated launch options.
    pub fn config(&self) -> &LaunchConfig {
        &self.config
    }

    /// The external target, if tests run against one.
    pub fn external_target(&self) -> Option<&str> {
        self.external_target.as_deref()
    }

    /// The running service, between setup and teardown.
    pub fn service(&self) -> Option<&ServiceHandle> {
        self.service.as_ref()
    }

    /// Launch the service and wait for readiness.
    ///
    /// With an external target nothing is launched. Calling this while a
    /// service from an earlier setup is still held is a no-op.
    pub async fn setup(&mut self, hooks: &mut (dyn TimingHooks + Send)) -> Result<(), HostError> {
        if let Some(target) = &self.external_target {
            info!(target: "launchpad.harness", "test target: {target}");
            return Ok(());
        }
        if self.service.is_some() {
            debug!(target: "launchpad.harness", "service already set up");
            return Ok(());
        }

        hooks.timeout(self.config.start_timeout());
        hooks.slow(self.config.slow());

        let handle = Supervisor::start(self.config.clone()).await?;
        self.service = Some(handle);
        Ok(())
    }

    /// Stop the service launched by [`setup`](Harness::setup).
    ///
    /// Returns `None` when nothing was launched. A service that already
    /// exited on its own is not stopped again and the hooks are left alone.
    pub async fn teardown(&mut self, hooks: &mut (dyn TimingHooks + Send)) -> Option<ExitReport> {
        let handle = self.service.take()?;
        if let Some(report) = handle.exit_report() {
            return Some(report);
        }

        let term_timeout = self.config.term_timeout();
        hooks.slow(term_timeout.saturating_mul(3) / 2);
        hooks.timeout(term_timeout.saturating_mul(3));

        Some(handle.stop().await)
    }
}
