// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tasks that sit between the OS process and the supervisor event loop.
//!
//! The driver task owns the [`Child`]: it is the only component that reaps
//! the process and the only one that signals it, so a signal can never reach
//! a recycled pid. Reader tasks forward stdout/stderr chunks as events.

use crate::escalation::EscalationAction;
use launchpad_config::TermSignal;
use serde::Serialize;
use serde_json::Value;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Size of a single read from a child pipe.
const READ_CHUNK: usize = 8 * 1024;

/// Upper bound on writing the control message; a child that never reads stdin must not stall the driver.
const MESSAGE_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Which output stream a chunk came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputStream {
    Stdout,
    Stderr,
}

/// How the process ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExitStatusInfo {
    /// Exit code, when the process exited on its own.
    pub code: Option<i32>,
    /// Terminating signal number (Unix only).
    pub signal: Option<i32>,
}

impl From<ExitStatus> for ExitStatusInfo {
    fn from(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

/// Typed events consumed by the supervisor event loop.
#[derive(Debug)]
pub(crate) enum Event {
    Output {
        stream: OutputStream,
        chunk: Vec<u8>,
    },
    Closed {
        stream: OutputStream,
    },
    /// The driver actually carried out an escalation action.
    Delivered {
        action: EscalationAction,
    },
    Exited {
        status: ExitStatusInfo,
    },
}

/// Requests from the event loop to the driver.
#[derive(Debug)]
pub(crate) enum DriverCommand {
    /// Write the payload as one JSON line on the child's stdin.
    Message(Value),
    /// Deliver a signal.
    Signal(TermSignal),
}

/// Forward chunks from one child pipe until EOF.
pub(crate) fn spawn_reader<R>(mut reader: R, stream: OutputStream, events: mpsc::Sender<Event>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = buf[..n].to_vec();
                    if events.send(Event::Output { stream, chunk }).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!(target: "launchpad.host", ?stream, error = %e, "pipe read failed");
                    break;
                }
            }
        }
        let _ = events.send(Event::Closed { stream }).await;
    });
}

/// Own the child until it exits, executing commands in the meantime.
pub(crate) fn spawn_driver(
    mut child: Child,
    mut stdin: Option<ChildStdin>,
    mut commands: mpsc::UnboundedReceiver<DriverCommand>,
    events: mpsc::Sender<Event>,
) {
    tokio::spawn(async move {
        let status = loop {
            tokio::select! {
                biased;
                status = child.wait() => break status,
                cmd = commands.recv() => {
                    let delivered = match cmd {
                        Some(DriverCommand::Message(payload)) => deliver_message(stdin.as_mut(), &payload)
                            .await
                            .then_some(EscalationAction::Message),
                        Some(DriverCommand::Signal(signal)) => deliver_signal(&mut child, signal)
                            .map(|signal| EscalationAction::Signal { signal }),
                        None => break child.wait().await,
                    };
                    if let Some(action) = delivered {
                        if events.send(Event::Delivered { action }).await.is_err() {
                            debug!(target: "launchpad.host", "event loop gone; delivery not reported");
                        }
                    }
                }
            }
        };
        drop(stdin);

        let status = match status {
            Ok(status) => ExitStatusInfo::from(status),
            Err(e) => {
                warn!(target: "launchpad.host", error = %e, "failed to wait for service");
                ExitStatusInfo::default()
            }
        };
        let _ = events.send(Event::Exited { status }).await;
    });
}

/// Write the control message; `true` once it is flushed to the pipe.
async fn deliver_message(stdin: Option<&mut ChildStdin>, payload: &Value) -> bool {
    let Some(stdin) = stdin else {
        warn!(target: "launchpad.host", "control channel unavailable; message not sent");
        return false;
    };
    let mut line = match serde_json::to_string(payload) {
        Ok(line) => line,
        Err(e) => {
            warn!(target: "launchpad.host", error = %e, "control message is not serializable");
            return false;
        }
    };
    line.push('\n');

    let write = async {
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await
    };
    match tokio::time::timeout(MESSAGE_WRITE_TIMEOUT, write).await {
        Ok(Ok(())) => {
            debug!(target: "launchpad.host", "control message sent");
            true
        }
        Ok(Err(e)) => {
            warn!(target: "launchpad.host", error = %e, "control message write failed");
            false
        }
        Err(_) => {
            warn!(target: "launchpad.host", "control message write timed out");
            false
        }
    }
}

/// Send `signal`; returns the signal that actually went out, if any.
fn deliver_signal(child: &mut Child, signal: TermSignal) -> Option<TermSignal> {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            return match kill(Pid::from_raw(pid as i32), to_nix(signal)) {
                Ok(()) => {
                    debug!(target: "launchpad.host", pid, %signal, "signal sent");
                    Some(signal)
                }
                Err(e) => {
                    warn!(target: "launchpad.host", pid, %signal, error = %e, "signal failed");
                    None
                }
            };
        }
    }

    // Without POSIX signals a hard kill is the only delivery available.
    match child.start_kill() {
        Ok(()) => {
            debug!(target: "launchpad.host", %signal, "kill sent");
            Some(TermSignal::Kill)
        }
        Err(e) => {
            warn!(target: "launchpad.host", %signal, error = %e, "kill failed");
            None
        }
    }
}

#[cfg(unix)]
fn to_nix(signal: TermSignal) -> nix::sys::signal::Signal {
    use nix::sys::signal::Signal;
    match signal {
        TermSignal::Interrupt => Signal::SIGINT,
        TermSignal::Terminate => Signal::SIGTERM,
        TermSignal::Quit => Signal::SIGQUIT,
        TermSignal::Kill => Signal::SIGKILL,
        TermSignal::Hangup => Signal::SIGHUP,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn signal_mapping_is_one_to_one() {
        use std::collections::HashSet;
        let mapped: HashSet<_> = TermSignal::ALL.into_iter().map(to_nix).collect();
        assert_eq!(mapped.len(), TermSignal::ALL.len());
        assert_eq!(to_nix(TermSignal::Interrupt), nix::sys::signal::Signal::SIGINT);
    }

    #[cfg(unix)]
    fn spawn_sh(script: &str) -> Child {
        tokio::process::Command::new("sh")
            .args(["-c", script])
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .unwrap()
    }

    #[cfg(unix)]
    async fn drain(mut events: mpsc::Receiver<Event>) -> Vec<Event> {
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            seen.push(event);
        }
        seen
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn delivered_signal_is_reported_before_exit() {
        let mut child = spawn_sh("sleep 5");
        let stdin = child.stdin.take();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(8);
        spawn_driver(child, stdin, cmd_rx, event_tx);

        cmd_tx.send(DriverCommand::Signal(TermSignal::Kill)).unwrap();
        let seen = drain(event_rx).await;

        assert!(matches!(
            seen.as_slice(),
            [
                Event::Delivered {
                    action: EscalationAction::Signal {
                        signal: TermSignal::Kill
                    }
                },
                Event::Exited { status },
            ] if status.signal == Some(9)
        ), "{seen:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_queued_after_exit_is_not_reported() {
        let mut child = spawn_sh("exit 0");
        let stdin = child.stdin.take();
        // Let the child become a zombie before the driver ever polls it.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        cmd_tx.send(DriverCommand::Signal(TermSignal::Kill)).unwrap();
        let (event_tx, event_rx) = mpsc::channel(8);
        spawn_driver(child, stdin, cmd_rx, event_tx);

        let seen = drain(event_rx).await;
        assert!(matches!(
            seen.as_slice(),
            [Event::Exited { status }] if status.code == Some(0)
        ), "{seen:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn message_without_stdin_is_not_reported() {
        let mut child = spawn_sh("sleep 5");
        drop(child.stdin.take());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(8);
        spawn_driver(child, None, cmd_rx, event_tx);

        cmd_tx
            .send(DriverCommand::Message(serde_json::json!({ "cmd": "shutdown" })))
            .unwrap();
        cmd_tx.send(DriverCommand::Signal(TermSignal::Kill)).unwrap();
        let seen = drain(event_rx).await;

        assert!(
            !seen.iter().any(|e| matches!(
                e,
                Event::Delivered {
                    action: EscalationAction::Message
                }
            )),
            "{seen:?}"
        );
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_from_signal() {
        use std::os::unix::process::ExitStatusExt;
        let info = ExitStatusInfo::from(ExitStatus::from_raw(9));
        assert_eq!(info.code, None);
        assert_eq!(info.signal, Some(9));

        let info = ExitStatusInfo::from(ExitStatus::from_raw(3 << 8));
        assert_eq!(info.code, Some(3));
        assert_eq!(info.signal, None);
    }
}
