// SPDX-License-Identifier: MIT OR Apache-2.0
//! Supervised-process lifecycle state machine: tracks and enforces valid transitions.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// Lifecycle state of a supervised service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// The process was spawned and the readiness marker has not been seen yet.
    Starting,
    /// The readiness marker appeared on stdout.
    Ready,
    /// Start failed (address in use). The process may still be running.
    Failed,
    /// A stop was requested and the escalation sequence is running.
    Terminating,
    /// The OS reported the exit and the log sink is closed.
    Exited,
}

impl ProcessState {
    /// `true` once nothing further can happen to the process.
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Exited)
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Terminating => "terminating",
            Self::Exited => "exited",
        };
        f.write_str(s)
    }
}

/// Record of a single lifecycle state transition.
#[derive(Clone, Debug, Serialize)]
pub struct LifecycleTransition {
    /// State before the transition.
    pub from: ProcessState,
    /// State after the transition.
    pub to: ProcessState,
    /// RFC 3339 timestamp of when the transition occurred.
    pub timestamp: String,
    /// Optional human-readable reason for the transition.
    pub reason: Option<String>,
}

/// Errors produced by [`LifecycleManager`] when a transition is invalid.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// The requested transition is not allowed by the state machine.
    #[error("invalid lifecycle transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: ProcessState,
        /// Requested target state.
        to: ProcessState,
    },
    /// The manager is already in the requested state.
    #[error("already in state {0}")]
    AlreadyInState(ProcessState),
}

/// Tracks the state of one supervised process and enforces valid transitions.
#[derive(Debug)]
pub struct LifecycleManager {
    state: ProcessState,
    history: Vec<LifecycleTransition>,
    started_at: Instant,
    was_ready: bool,
}

impl LifecycleManager {
    /// Create a manager in [`ProcessState::Starting`]; a process exists from the moment it is spawned.
    pub fn new() -> Self {
        Self {
            state: ProcessState::Starting,
            history: Vec::new(),
            started_at: Instant::now(),
            was_ready: false,
        }
    }

    /// Current state.
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Attempt to transition to a new state.
    pub fn transition(
        &mut self,
        to: ProcessState,
        reason: Option<String>,
    ) -> Result<(), LifecycleError> {
        if self.state == to {
            return Err(LifecycleError::AlreadyInState(to));
        }
        if !self.can_transition(to) {
            return Err(LifecycleError::InvalidTransition {
                from: self.state,
                to,
            });
        }

        let from = self.state;
        self.state = to;

        if to == ProcessState::Ready {
            self.was_ready = true;
        }

        self.history.push(LifecycleTransition {
            from,
            to,
            timestamp: chrono::Utc::now().to_rfc3339(),
            reason,
        });

        Ok(())
    }

    /// Returns `true` if transitioning from the current state to `to` is valid.
    pub fn can_transition(&self, to: ProcessState) -> bool {
        // The OS exit event is authoritative from any live state.
        if to == ProcessState::Exited {
            return self.state != ProcessState::Exited;
        }

        matches!(
            (self.state, to),
            (ProcessState::Starting, ProcessState::Ready)
                | (ProcessState::Starting, ProcessState::Failed)
                | (ProcessState::Starting, ProcessState::Terminating)
                | (ProcessState::Ready, ProcessState::Terminating)
                | (ProcessState::Failed, ProcessState::Terminating)
        )
    }

    /// Full history of state transitions.
    pub fn history(&self) -> &[LifecycleTransition] {
        &self.history
    }

    /// `true` if the process ever reached [`ProcessState::Ready`].
    pub fn was_ready(&self) -> bool {
        self.was_ready
    }

    /// Time since the process was spawned.
    pub fn age(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_starting() {
        let lm = LifecycleManager::new();
        assert_eq!(lm.state(), ProcessState::Starting);
        assert!(lm.history().is_empty());
        assert!(!lm.was_ready());
    }

    #[test]
    fn happy_path() {
        let mut lm = LifecycleManager::new();
        lm.transition(ProcessState::Ready, None).unwrap();
        lm.transition(ProcessState::Terminating, Some("stop".into()))
            .unwrap();
        lm.transition(ProcessState::Exited, None).unwrap();
        assert!(lm.state().is_final());
        assert!(lm.was_ready());
        assert_eq!(lm.history().len(), 3);
        assert_eq!(lm.history()[1].reason.as_deref(), Some("stop"));
    }

    #[test]
    fn failed_can_still_be_terminated() {
        let mut lm = LifecycleManager::new();
        lm.transition(ProcessState::Failed, None).unwrap();
        lm.transition(ProcessState::Terminating, None).unwrap();
        lm.transition(ProcessState::Exited, None).unwrap();
        assert!(!lm.was_ready());
    }

    #[test]
    fn exit_is_allowed_from_every_live_state() {
        for path in [
            vec![],
            vec![ProcessState::Ready],
            vec![ProcessState::Failed],
            vec![ProcessState::Terminating],
        ] {
            let mut lm = LifecycleManager::new();
            for s in path {
                lm.transition(s, None).unwrap();
            }
            assert!(lm.can_transition(ProcessState::Exited));
        }
    }

    #[test]
    fn nothing_leaves_exited() {
        let mut lm = LifecycleManager::new();
        lm.transition(ProcessState::Exited, None).unwrap();
        for s in [
            ProcessState::Starting,
            ProcessState::Ready,
            ProcessState::Failed,
            ProcessState::Terminating,
        ] {
            assert!(!lm.can_transition(s), "exited -> {s} must be rejected");
        }
        assert_eq!(
            lm.transition(ProcessState::Exited, None),
            Err(LifecycleError::AlreadyInState(ProcessState::Exited))
        );
    }

    #[test]
    fn ready_cannot_go_back_to_failed() {
        let mut lm = LifecycleManager::new();
        lm.transition(ProcessState::Ready, None).unwrap();
        let err = lm.transition(ProcessState::Failed, None).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::InvalidTransition {
                from: ProcessState::Ready,
                to: ProcessState::Failed,
            }
        );
        assert_eq!(
            err.to_string(),
            "invalid lifecycle transition from ready to failed"
        );
    }

    #[test]
    fn terminating_is_not_reentrant() {
        let mut lm = LifecycleManager::new();
        lm.transition(ProcessState::Terminating, None).unwrap();
        assert!(lm.transition(ProcessState::Terminating, None).is_err());
        assert!(!lm.can_transition(ProcessState::Ready));
    }
}
