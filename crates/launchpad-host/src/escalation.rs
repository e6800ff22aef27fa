// SPDX-License-Identifier: MIT OR Apache-2.0
//! Escalation stages of the termination protocol: control message → soft signal → kill.

use launchpad_config::TermSignal;
use serde::Serialize;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::{Sleep, sleep};

/// The next action to take when a stage timer fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Stage {
    /// Send the configured soft signal.
    Signal,
    /// Send the unconditional kill.
    Kill,
}

/// An action the supervisor took while stopping the service.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EscalationAction {
    /// The control message was written to the service.
    Message,
    /// A signal was sent.
    Signal {
        /// Which one.
        signal: TermSignal,
    },
}

/// One escalation step and when it happened, relative to the stop request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EscalationStep {
    /// What was done.
    #[serde(flatten)]
    pub action: EscalationAction,
    /// Time since the stop request.
    #[serde(rename = "after_ms", serialize_with = "as_millis")]
    pub after: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// A stage timer stored in the process record.
///
/// Dropping it cancels the stage; nothing fires afterwards.
#[derive(Debug)]
pub(crate) struct PendingStage {
    next: Stage,
    timer: Pin<Box<Sleep>>,
}

impl PendingStage {
    pub(crate) fn arm(next: Stage, after: Duration) -> Self {
        Self {
            next,
            timer: Box::pin(sleep(after)),
        }
    }
}

/// Resolve once the pending stage is due; never resolves when nothing is armed.
pub(crate) async fn stage_due(pending: &mut Option<PendingStage>) -> Stage {
    match pending {
        Some(p) => {
            p.timer.as_mut().await;
            p.next
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn armed_stage_fires_after_delay() {
        let mut pending = Some(PendingStage::arm(Stage::Kill, Duration::from_millis(500)));
        let start = tokio::time::Instant::now();
        let stage = stage_due(&mut pending).await;
        assert_eq!(stage, Stage::Kill);
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_stage_never_fires() {
        let mut pending = Some(PendingStage::arm(Stage::Signal, Duration::from_millis(10)));
        drop(pending.take());
        let fired = tokio::time::timeout(Duration::from_secs(5), stage_due(&mut pending)).await;
        assert!(fired.is_err());
    }

    #[test]
    fn step_serializes_flat() {
        let step = EscalationStep {
            action: EscalationAction::Signal {
                signal: TermSignal::Terminate,
            },
            after: Duration::from_millis(1500),
        };
        let v = serde_json::to_value(&step).unwrap();
        assert_eq!(v["action"], "signal");
        assert_eq!(v["signal"], "SIGTERM");
        assert_eq!(v["after_ms"], 1500);
    }

    #[test]
    fn step_delay_saturates_in_millis() {
        let step = EscalationStep {
            action: EscalationAction::Message,
            after: Duration::MAX,
        };
        let v = serde_json::to_value(&step).unwrap();
        assert_eq!(v["after_ms"], u64::MAX);
    }
}
