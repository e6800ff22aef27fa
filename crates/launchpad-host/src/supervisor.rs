// SPDX-License-Identifier: MIT OR Apache-2.0
//! Launches one service and drives its lifecycle from a single event loop.
//!
//! The loop owns the process record: lifecycle state, log sink, pending
//! escalation timer, readiness reply and stop waiters. It reacts to pipe
//! chunks, the exit event, stop requests and its own stage timers; nothing
//! else mutates the record.

use crate::HostError;
use crate::driver::{self, DriverCommand, Event, ExitStatusInfo, OutputStream};
use crate::escalation::{EscalationAction, EscalationStep, PendingStage, Stage, stage_due};
use crate::lifecycle::{LifecycleManager, LifecycleTransition, ProcessState};
use crate::log_sink::LogSink;
use crate::scan::MarkerScanner;
use launchpad_config::{LaunchConfig, TermSignal};
use serde::Serialize;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Sleep, sleep};
use tracing::{debug, error, info, warn};

/// Stderr substrings that mean the service could not bind its port.
///
/// The first is what Node prints; the second is the libc wording most other
/// runtimes surface.
pub const PORT_IN_USE_MARKERS: &[&str] = &["Error: listen EADDRINUSE", "Address already in use"];

/// How long buffered output is still accepted after the exit event.
pub const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(250);

const EVENT_BUFFER: usize = 256;
const REQUEST_BUFFER: usize = 16;

// ---------------------------------------------------------------------------
// Public surface
// ---------------------------------------------------------------------------

/// Outcome of a supervised run, available once the process has exited.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ExitReport {
    /// Exit code, when the service exited on its own.
    pub code: Option<i32>,
    /// Terminating signal number, when the service was killed by one.
    pub signal: Option<i32>,
    /// Whether the readiness marker was ever seen.
    pub was_ready: bool,
    /// Escalation actions taken during stop, in order.
    pub steps: Vec<EscalationStep>,
    /// Time from spawn to exit.
    #[serde(rename = "lifetime_ms", serialize_with = "as_millis")]
    pub lifetime: Duration,
    /// Every lifecycle transition the process went through.
    pub transitions: Vec<LifecycleTransition>,
}

impl ExitReport {
    /// Signals sent during stop, in order.
    pub fn signals_sent(&self) -> Vec<TermSignal> {
        self.steps
            .iter()
            .filter_map(|s| match s.action {
                EscalationAction::Signal { signal } => Some(signal),
                EscalationAction::Message => None,
            })
            .collect()
    }

    /// `true` if the control message was delivered.
    pub fn message_sent(&self) -> bool {
        self.steps
            .iter()
            .any(|s| s.action == EscalationAction::Message)
    }

    /// `true` if stop had to fall back to `SIGKILL`.
    pub fn was_killed(&self) -> bool {
        self.signals_sent().contains(&TermSignal::Kill)
    }
}

fn as_millis<S: serde::Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Completes once with the start outcome: ready, or the reason it never will be.
#[derive(Debug)]
pub struct Readiness {
    rx: oneshot::Receiver<Result<(), HostError>>,
}

impl Readiness {
    /// Wait for the readiness marker or a start failure.
    pub async fn wait(self) -> Result<(), HostError> {
        self.rx.await.unwrap_or(Err(HostError::SupervisorGone))
    }
}

/// Caller-side handle to a supervised service.
///
/// Cloning is cheap. When every clone is dropped without calling
/// [`stop`](ServiceHandle::stop), the supervisor stops the service on its own.
#[derive(Clone, Debug)]
pub struct ServiceHandle {
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<ProcessState>,
    history: watch::Receiver<Vec<LifecycleTransition>>,
    report: watch::Receiver<Option<ExitReport>>,
    pid: Option<u32>,
    command_line: Arc<str>,
}

impl ServiceHandle {
    /// OS process id, if the platform reported one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The invoked command line.
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    /// Lifecycle transitions so far, oldest first.
    pub fn history(&self) -> Vec<LifecycleTransition> {
        self.history.borrow().clone()
    }

    /// The exit report, once the process is over.
    pub fn exit_report(&self) -> Option<ExitReport> {
        self.report.borrow().clone()
    }

    /// Run the termination protocol and wait until the process has exited
    /// and its log is closed.
    ///
    /// Never fails; after the first completion further calls return the
    /// same report immediately.
    pub async fn stop(&self) -> ExitReport {
        let cached = self.exit_report();
        if let Some(report) = cached {
            return report;
        }
        let (reply, rx) = oneshot::channel();
        if self.requests.send(Request::Stop { reply }).await.is_ok() {
            if let Ok(report) = rx.await {
                return report;
            }
        }
        self.wait().await
    }

    /// Wait for the process to exit without asking it to.
    pub async fn wait(&self) -> ExitReport {
        let mut report = self.report.clone();
        match report.wait_for(Option::is_some).await {
            Ok(r) => r.clone().unwrap_or_default(),
            Err(_) => ExitReport::default(),
        }
    }
}

/// Entry point for launching supervised services.
#[derive(Debug, Clone, Copy, Default)]
pub struct Supervisor;

impl Supervisor {
    /// Launch the service and return immediately.
    ///
    /// Fails only when the log file cannot be opened or the OS refuses to
    /// spawn the process; everything after that is reported through the
    /// returned [`Readiness`].
    pub async fn spawn(config: LaunchConfig) -> Result<(ServiceHandle, Readiness), HostError> {
        let mut sink = LogSink::create(config.log_path())
            .await
            .map_err(|source| HostError::LogSink {
                path: config.log_path().display().to_string(),
                source,
            })?;
        let command_line: Arc<str> = config.command_line().into();

        let mut cmd = Command::new(config.program());
        cmd.args(config.args())
            .current_dir(config.cwd())
            .envs(config.env())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                sink.stderr(format!("{e}\n").as_bytes()).await;
                sink.close().await;
                error!(target: "launchpad.host", command = %command_line, error = %e, "failed to launch service");
                return Err(HostError::Launch(e));
            }
        };
        let pid = child.id();

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let mut open_streams = 0;
        if let Some(stdout) = child.stdout.take() {
            driver::spawn_reader(stdout, OutputStream::Stdout, event_tx.clone());
            open_streams += 1;
        }
        if let Some(stderr) = child.stderr.take() {
            driver::spawn_reader(stderr, OutputStream::Stderr, event_tx.clone());
            open_streams += 1;
        }
        let stdin = child.stdin.take();
        let (driver_tx, driver_rx) = mpsc::unbounded_channel();
        driver::spawn_driver(child, stdin, driver_rx, event_tx);

        let (request_tx, request_rx) = mpsc::channel(REQUEST_BUFFER);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(ProcessState::Starting);
        let (history_tx, history_rx) = watch::channel(Vec::new());
        let (report_tx, report_rx) = watch::channel(None);

        debug!(target: "launchpad.host", pid = ?pid, command = %command_line, "service launched");

        let process = SupervisedProcess {
            ready_scanner: MarkerScanner::new(config.ready_notice()),
            port_scanners: PORT_IN_USE_MARKERS.iter().map(MarkerScanner::new).collect(),
            config,
            pid,
            command_line: command_line.clone(),
            lifecycle: LifecycleManager::new(),
            sink,
            driver: driver_tx,
            readiness: Some(ready_tx),
            stop_waiters: Vec::new(),
            escalation: None,
            stop_requested_at: None,
            steps: Vec::new(),
            exit: None,
            open_streams,
            drain: None,
            finished: false,
            state_tx,
            history_tx,
            report_tx,
        };
        tokio::spawn(process.run(event_rx, request_rx));

        let handle = ServiceHandle {
            requests: request_tx,
            state: state_rx,
            history: history_rx,
            report: report_rx,
            pid,
            command_line,
        };
        Ok((handle, Readiness { rx: ready_rx }))
    }

    /// Launch the service and wait until it is ready.
    ///
    /// If it never becomes ready the process is stopped before the error is
    /// returned, so no service outlives a failed start.
    pub async fn start(config: LaunchConfig) -> Result<ServiceHandle, HostError> {
        let (handle, readiness) = Self::spawn(config).await?;
        match readiness.wait().await {
            Ok(()) => Ok(handle),
            Err(e) => {
                handle.stop().await;
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Event loop
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Request {
    Stop { reply: oneshot::Sender<ExitReport> },
}

struct SupervisedProcess {
    config: LaunchConfig,
    pid: Option<u32>,
    command_line: Arc<str>,
    lifecycle: LifecycleManager,
    sink: LogSink,
    driver: mpsc::UnboundedSender<DriverCommand>,
    ready_scanner: MarkerScanner,
    port_scanners: Vec<MarkerScanner>,
    readiness: Option<oneshot::Sender<Result<(), HostError>>>,
    stop_waiters: Vec<oneshot::Sender<ExitReport>>,
    escalation: Option<PendingStage>,
    stop_requested_at: Option<Instant>,
    steps: Vec<EscalationStep>,
    exit: Option<ExitStatusInfo>,
    open_streams: u8,
    drain: Option<Pin<Box<Sleep>>>,
    finished: bool,
    state_tx: watch::Sender<ProcessState>,
    history_tx: watch::Sender<Vec<LifecycleTransition>>,
    report_tx: watch::Sender<Option<ExitReport>>,
}

impl SupervisedProcess {
    async fn run(mut self, mut events: mpsc::Receiver<Event>, mut requests: mpsc::Receiver<Request>) {
        let mut handles_alive = true;
        while !self.finished {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.on_event(event).await,
                    None => self.finish().await,
                },
                request = requests.recv(), if handles_alive => match request {
                    Some(Request::Stop { reply }) => self.on_stop(Some(reply)),
                    None => {
                        handles_alive = false;
                        debug!(target: "launchpad.host", pid = ?self.pid, "all handles dropped; stopping service");
                        self.on_stop(None);
                    }
                },
                stage = stage_due(&mut self.escalation) => self.on_stage_due(stage),
                _ = drain_elapsed(&mut self.drain) => self.finish().await,
            }
        }
    }

    async fn on_event(&mut self, event: Event) {
        match event {
            Event::Output {
                stream: OutputStream::Stdout,
                chunk,
            } => {
                self.sink.stdout(&chunk).await;
                if self.lifecycle.state() == ProcessState::Starting
                    && self.ready_scanner.feed(&chunk)
                {
                    self.transition(ProcessState::Ready, "readiness marker seen");
                    info!(target: "launchpad.host", pid = ?self.pid, "service started: {}", self.command_line);
                    self.report_readiness(Ok(()));
                }
            }
            Event::Output {
                stream: OutputStream::Stderr,
                chunk,
            } => {
                self.sink.stderr(&chunk).await;
                let mut port_in_use = false;
                for scanner in &mut self.port_scanners {
                    port_in_use |= scanner.feed(&chunk);
                }
                if port_in_use && self.lifecycle.state() == ProcessState::Starting {
                    self.transition(ProcessState::Failed, "address in use");
                    warn!(target: "launchpad.host", pid = ?self.pid, "service could not start: address in use");
                    self.report_readiness(Err(HostError::PortInUse));
                }
            }
            Event::Closed { stream } => {
                self.open_streams = self.open_streams.saturating_sub(1);
                debug!(target: "launchpad.host", ?stream, "output stream closed");
                if self.exit.is_some() && self.open_streams == 0 {
                    self.finish().await;
                }
            }
            // Steps are recorded on delivery only; a command the driver
            // never carried out leaves no trace in the report.
            Event::Delivered { action } => self.record(action),
            Event::Exited { status } => {
                // Cancel first: no stage may act once the exit has been seen.
                self.escalation = None;
                self.exit = Some(status);
                debug!(target: "launchpad.host", pid = ?self.pid, code = ?status.code, signal = ?status.signal, "service exited");
                if self.open_streams == 0 {
                    self.finish().await;
                } else {
                    self.drain = Some(Box::pin(sleep(EXIT_DRAIN_GRACE)));
                }
            }
        }
    }

    fn on_stop(&mut self, reply: Option<oneshot::Sender<ExitReport>>) {
        if let Some(reply) = reply {
            self.stop_waiters.push(reply);
        }
        if self.exit.is_some() || self.lifecycle.state() == ProcessState::Terminating {
            return;
        }
        self.transition(ProcessState::Terminating, "stop requested");
        self.stop_requested_at = Some(Instant::now());

        match self.config.term_message().cloned() {
            Some(payload) => {
                self.command(DriverCommand::Message(payload));
                self.escalation = Some(PendingStage::arm(
                    Stage::Signal,
                    self.config.term_timeout(),
                ));
            }
            None => self.soft_signal(),
        }
    }

    fn on_stage_due(&mut self, stage: Stage) {
        self.escalation = None;
        if self.exit.is_some() {
            return;
        }
        match stage {
            Stage::Signal => self.soft_signal(),
            Stage::Kill => {
                warn!(
                    target: "launchpad.host",
                    pid = ?self.pid,
                    signal = %self.config.term_signal(),
                    "service ignored termination; killing"
                );
                self.signal(TermSignal::Kill);
            }
        }
    }

    fn soft_signal(&mut self) {
        let signal = self.config.term_signal();
        self.signal(signal);
        if signal != TermSignal::Kill {
            self.escalation = Some(PendingStage::arm(Stage::Kill, self.config.term_timeout()));
        }
    }

    fn signal(&self, signal: TermSignal) {
        self.command(DriverCommand::Signal(signal));
    }

    fn command(&self, cmd: DriverCommand) {
        if self.driver.send(cmd).is_err() {
            debug!(target: "launchpad.host", pid = ?self.pid, "driver gone; command dropped");
        }
    }

    fn record(&mut self, action: EscalationAction) {
        let after = self
            .stop_requested_at
            .map(|t| t.elapsed())
            .unwrap_or_default();
        self.steps.push(EscalationStep { action, after });
    }

    fn report_readiness(&mut self, outcome: Result<(), HostError>) {
        if let Some(tx) = self.readiness.take() {
            let _ = tx.send(outcome);
        }
    }

    fn transition(&mut self, to: ProcessState, reason: &str) {
        match self.lifecycle.transition(to, Some(reason.to_string())) {
            Ok(()) => {
                self.state_tx.send_replace(to);
                self.history_tx
                    .send_replace(self.lifecycle.history().to_vec());
                debug!(target: "launchpad.host", pid = ?self.pid, state = %to, reason, "state changed");
            }
            Err(e) => warn!(target: "launchpad.host", pid = ?self.pid, error = %e, "transition rejected"),
        }
    }

    /// Close the log, settle readiness, enter `Exited`, then release every stop waiter.
    async fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.escalation = None;
        self.drain = None;
        self.sink.close().await;

        let status = self.exit.unwrap_or_default();
        if self.readiness.is_some() {
            let err = if self.lifecycle.state() == ProcessState::Terminating {
                HostError::StoppedBeforeReady
            } else {
                HostError::UnexpectedExit {
                    code: status.code,
                    signal: status.signal,
                }
            };
            self.report_readiness(Err(err));
        }
        self.transition(ProcessState::Exited, "process exited");
        info!(
            target: "launchpad.host",
            pid = ?self.pid,
            code = ?status.code,
            signal = ?status.signal,
            "service termination ended"
        );

        let report = ExitReport {
            code: status.code,
            signal: status.signal,
            was_ready: self.lifecycle.was_ready(),
            steps: std::mem::take(&mut self.steps),
            lifetime: self.lifecycle.age(),
            transitions: self.lifecycle.history().to_vec(),
        };
        self.report_tx.send_replace(Some(report.clone()));
        for waiter in self.stop_waiters.drain(..) {
            let _ = waiter.send(report.clone());
        }
        self.finished = true;
    }
}

async fn drain_elapsed(drain: &mut Option<Pin<Box<Sleep>>>) {
    match drain {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(action: EscalationAction) -> EscalationStep {
        EscalationStep {
            action,
            after: Duration::ZERO,
        }
    }

    #[test]
    fn report_summarises_steps() {
        let report = ExitReport {
            steps: vec![
                step(EscalationAction::Message),
                step(EscalationAction::Signal {
                    signal: TermSignal::Interrupt,
                }),
                step(EscalationAction::Signal {
                    signal: TermSignal::Kill,
                }),
            ],
            ..Default::default()
        };
        assert!(report.message_sent());
        assert!(report.was_killed());
        assert_eq!(
            report.signals_sent(),
            vec![TermSignal::Interrupt, TermSignal::Kill]
        );
    }

    #[test]
    fn empty_report_took_no_action() {
        let report = ExitReport::default();
        assert!(!report.message_sent());
        assert!(!report.was_killed());
        assert!(report.signals_sent().is_empty());
    }

    #[test]
    fn report_serializes_lifetime_in_millis() {
        let report = ExitReport {
            code: Some(0),
            lifetime: Duration::from_millis(1234),
            ..Default::default()
        };
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["lifetime_ms"], 1234);
        assert_eq!(v["code"], 0);
    }

    #[test]
    fn report_lifetime_saturates_in_millis() {
        let report = ExitReport {
            lifetime: Duration::MAX,
            ..Default::default()
        };
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["lifetime_ms"], u64::MAX);
    }
}
