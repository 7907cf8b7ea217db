//! Process manager
//!
//! Owns the backing process through an opaque [`PtyBackend`] and tracks its
//! lifecycle. Backends report asynchronously through a [`ProcessEventSink`];
//! the session drains those events and hands them to
//! [`ProcessManager::handle_event`], which updates state and filters out
//! events from processes that have since been replaced.
//!
//! # Lifecycle
//!
//! ```text
//! Uninitialized ── create ──> Launching ── ready ──> Running <──> Disconnected
//!                                 │                     │
//!                                 └ exit ─> KilledDuringLaunch
//!                                                       ├ exit (user kill) ─> KilledByUser
//!                                                       └ exit ─> KilledByProcess
//! ```
//!
//! Terminal states only leave through `relaunch`, which resets to
//! `Uninitialized` and starts over.

use std::path::PathBuf;
use std::sync::mpsc::Sender;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::capabilities::CommandDetectionSnapshot;
use super::dimensions::Dimensions;
use super::launch::{PersistentProcess, ResolvedLaunch};
use super::session::SessionMessage;

/// Backend errors
#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to spawn process: {0}")]
    Spawn(String),

    #[error("PTY I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Process is not running")]
    NotRunning,

    #[error("Unsupported by this backend: {0}")]
    Unsupported(&'static str),

    #[error("Invalid handle")]
    InvalidHandle,
}

/// Process lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Uninitialized,
    Launching,
    Running,
    KilledDuringLaunch,
    KilledByUser,
    KilledByProcess,
    Disconnected,
}

impl ProcessState {
    pub fn is_exited(self) -> bool {
        matches!(
            self,
            ProcessState::KilledDuringLaunch | ProcessState::KilledByUser | ProcessState::KilledByProcess
        )
    }
}

/// Information reported once the process is up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyInfo {
    pub pid: u32,
    pub cwd: Option<PathBuf>,
}

/// Why a session or process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The process exited on its own
    Process,
    /// The user killed it
    User,
    /// It never got running
    LaunchFailed,
    /// The session was disposed by the host
    Shutdown,
    /// The session let go of a process that keeps running
    Detached,
}

/// Exit notification payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    /// Human-readable explanation, shown to the user
    pub message: Option<String>,
    pub reason: ExitReason,
}

impl ExitInfo {
    pub fn new(reason: ExitReason) -> Self {
        Self {
            code: None,
            message: None,
            reason,
        }
    }

    pub fn launch_failed(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: Some(message.into()),
            reason: ExitReason::LaunchFailed,
        }
    }
}

/// Events a backend reports
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    Ready(ReadyInfo),
    Data(Vec<u8>),
    /// Exit code if the OS reported one
    Exit(Option<i32>),
    /// Launch failed after `spawn` returned
    LaunchFailed(String),
    TitleChanged(String),
    CwdChanged(PathBuf),
    Disconnected,
    Reconnected,
    /// Shell-integration history replayed after reattach
    RestoreCommands(CommandDetectionSnapshot),
}

/// Channel a backend reports through, stamped with the process generation
#[derive(Debug, Clone)]
pub struct ProcessEventSink {
    generation: u64,
    tx: Sender<SessionMessage>,
}

impl ProcessEventSink {
    pub(crate) fn new(generation: u64, tx: Sender<SessionMessage>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the session has gone away.
    pub fn send(&self, event: ProcessEvent) -> bool {
        self.tx
            .send(SessionMessage::Process {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// The OS / remote process boundary
pub trait PtyBackend {
    /// Start a process. Readiness, output and exit arrive through `events`.
    fn spawn(
        &mut self,
        launch: &ResolvedLaunch,
        dims: Dimensions,
        events: ProcessEventSink,
    ) -> Result<(), PtyError>;

    /// Re-attach to a process kept alive by a previous session.
    fn attach(&mut self, _process: &PersistentProcess, _events: ProcessEventSink) -> Result<(), PtyError> {
        Err(PtyError::Unsupported("attach"))
    }

    fn write(&mut self, data: &[u8]) -> Result<(), PtyError>;

    fn resize(&mut self, dims: Dimensions) -> Result<(), PtyError>;

    fn signal(&mut self, _signal: &str) -> Result<(), PtyError> {
        Err(PtyError::Unsupported("signal"))
    }

    /// Stop or resume reading output (flow control)
    fn set_paused(&mut self, _paused: bool) {}

    /// Let go of the process. With `persist` it keeps running and the
    /// returned id can be used to re-attach.
    fn detach(&mut self, _persist: bool) -> Option<u64> {
        None
    }

    /// Terminate the process.
    fn shutdown(&mut self, immediate: bool);

    /// Current working directory, if the backend can tell
    fn cwd(&self) -> Option<PathBuf> {
        None
    }
}

/// Output flow-control thresholds in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowControl {
    pub high_watermark: usize,
    pub low_watermark: usize,
}

impl Default for FlowControl {
    fn default() -> Self {
        Self {
            high_watermark: 100_000,
            low_watermark: 5_000,
        }
    }
}

pub struct ProcessManager {
    backend: Box<dyn PtyBackend>,
    tx: Sender<SessionMessage>,
    state: ProcessState,
    generation: u64,
    executable: Option<String>,
    /// Size the process was created with or last resized to
    dims: Option<Dimensions>,
    kill_requested: bool,
    ready: Option<ReadyInfo>,
    exit_code: Option<i32>,
    flow: FlowControl,
    unacked: usize,
    paused: bool,
}

impl ProcessManager {
    pub fn new(backend: Box<dyn PtyBackend>, tx: Sender<SessionMessage>, flow: FlowControl) -> Self {
        Self {
            backend,
            tx,
            state: ProcessState::Uninitialized,
            generation: 0,
            executable: None,
            dims: None,
            kill_requested: false,
            ready: None,
            exit_code: None,
            flow,
            unacked: 0,
            paused: false,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }

    pub fn ready_info(&self) -> Option<&ReadyInfo> {
        self.ready.as_ref()
    }

    pub fn dimensions(&self) -> Option<Dimensions> {
        self.dims
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn unacknowledged(&self) -> usize {
        self.unacked
    }

    pub fn cwd(&self) -> Option<PathBuf> {
        self.backend.cwd()
    }

    /// Start the process. A synchronous spawn failure is returned as the
    /// exit that the session reports; it is never an error.
    pub fn create_process(&mut self, launch: &ResolvedLaunch, dims: Dimensions) -> Result<(), ExitInfo> {
        self.generation += 1;
        self.executable = Some(launch.executable.clone());
        self.dims = Some(dims);
        self.set_state(ProcessState::Launching);

        let sink = ProcessEventSink::new(self.generation, self.tx.clone());
        let result = match &launch.attach {
            Some(persistent) => self.backend.attach(persistent, sink),
            None => self.backend.spawn(launch, dims, sink),
        };

        result.map_err(|e| {
            warn!("Failed to launch {}: {}", launch.executable, e);
            self.set_state(ProcessState::KilledDuringLaunch);
            ExitInfo::launch_failed(format!(
                "The terminal process failed to launch: {}",
                e
            ))
        })
    }

    /// Record a launch that was refused before reaching the backend.
    pub fn reject_launch(&mut self, message: &str) -> ExitInfo {
        info!("Launch rejected: {}", message);
        self.set_state(ProcessState::KilledDuringLaunch);
        ExitInfo::launch_failed(message)
    }

    /// Replace the process: tear down the old one and start fresh.
    pub fn relaunch(&mut self, launch: &ResolvedLaunch, dims: Dimensions) -> Result<(), ExitInfo> {
        if !self.state.is_exited() && self.state != ProcessState::Uninitialized {
            self.backend.shutdown(true);
        }
        self.reset();
        self.create_process(launch, dims)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        if self.state != ProcessState::Running {
            return Err(PtyError::NotRunning);
        }
        self.backend.write(data)
    }

    /// Resize now when running, otherwise remember it for later.
    pub fn set_dimensions(&mut self, dims: Dimensions) {
        self.dims = Some(dims);
        if self.state == ProcessState::Running {
            if let Err(e) = self.backend.resize(dims) {
                warn!("Failed to resize process to {}: {}", dims, e);
            }
        }
    }

    pub fn send_signal(&mut self, signal: &str) -> Result<(), PtyError> {
        if self.state != ProcessState::Running {
            return Err(PtyError::NotRunning);
        }
        self.backend.signal(signal)
    }

    /// User-requested kill; the resulting exit is classified `KilledByUser`.
    pub fn kill(&mut self) {
        if self.state.is_exited() || self.state == ProcessState::Uninitialized {
            return;
        }
        self.kill_requested = true;
        self.backend.shutdown(true);
    }

    pub fn detach_from_process(&mut self, persist: bool) -> Option<u64> {
        if self.state.is_exited() {
            return None;
        }
        let id = self.backend.detach(persist);
        // Events from the detached process are no longer ours
        self.generation += 1;
        id
    }

    pub fn dispose(&mut self, detached: bool) {
        if !detached && !self.state.is_exited() && self.state != ProcessState::Uninitialized {
            self.backend.shutdown(false);
        }
        self.generation += 1;
    }

    /// Count output that the terminal has now parsed.
    pub fn acknowledge(&mut self, bytes: usize) {
        self.unacked = self.unacked.saturating_sub(bytes);
        if self.paused && self.unacked < self.flow.low_watermark {
            debug!("Resuming output ({} unacknowledged)", self.unacked);
            self.paused = false;
            self.backend.set_paused(false);
        }
    }

    /// Apply a backend event. Returns it when it still concerns the current
    /// process, `None` when it was stale or redundant.
    pub fn handle_event(&mut self, generation: u64, event: ProcessEvent) -> Option<ProcessEvent> {
        if generation != self.generation {
            debug!("Dropping event from stale process generation {}", generation);
            return None;
        }

        match &event {
            ProcessEvent::Ready(info) => {
                if self.state != ProcessState::Launching {
                    return None;
                }
                self.ready = Some(info.clone());
                self.set_state(ProcessState::Running);
            }
            ProcessEvent::Data(data) => {
                if self.state.is_exited() {
                    return None;
                }
                self.unacked += data.len();
                if !self.paused && self.unacked > self.flow.high_watermark {
                    debug!("Pausing output ({} unacknowledged)", self.unacked);
                    self.paused = true;
                    self.backend.set_paused(true);
                }
            }
            ProcessEvent::Exit(code) => {
                if self.state.is_exited() {
                    return None;
                }
                self.exit_code = *code;
                let next = match self.state {
                    ProcessState::Uninitialized | ProcessState::Launching => ProcessState::KilledDuringLaunch,
                    _ if self.kill_requested => ProcessState::KilledByUser,
                    _ => ProcessState::KilledByProcess,
                };
                self.set_state(next);
            }
            ProcessEvent::LaunchFailed(_) => {
                if self.state != ProcessState::Launching {
                    return None;
                }
                self.set_state(ProcessState::KilledDuringLaunch);
            }
            ProcessEvent::Disconnected => {
                if self.state != ProcessState::Running {
                    return None;
                }
                self.set_state(ProcessState::Disconnected);
            }
            ProcessEvent::Reconnected => {
                if self.state != ProcessState::Disconnected {
                    return None;
                }
                self.set_state(ProcessState::Running);
            }
            ProcessEvent::TitleChanged(_) | ProcessEvent::CwdChanged(_) | ProcessEvent::RestoreCommands(_) => {}
        }
        Some(event)
    }

    /// Once running, bring the process in line with the latest requested size.
    pub fn sync_dimensions(&mut self, spawned_with: Dimensions) {
        if let Some(dims) = self.dims {
            if dims != spawned_with && self.state == ProcessState::Running {
                if let Err(e) = self.backend.resize(dims) {
                    warn!("Failed to resize process to {}: {}", dims, e);
                }
            }
        }
    }

    /// Exit message for the current terminal state
    pub fn exit_info(&self, event_message: Option<String>) -> ExitInfo {
        let executable = self.executable.as_deref().unwrap_or("shell");
        let (reason, message) = match self.state {
            ProcessState::KilledDuringLaunch => {
                let message = event_message.unwrap_or_else(|| match self.exit_code {
                    Some(code) => format!(
                        "The terminal process \"{}\" failed to launch (exit code: {}).",
                        executable, code
                    ),
                    None => format!("The terminal process \"{}\" failed to launch.", executable),
                });
                (ExitReason::LaunchFailed, Some(message))
            }
            ProcessState::KilledByUser => (ExitReason::User, None),
            _ => {
                let message = match self.exit_code {
                    Some(code) if code != 0 => Some(format!(
                        "The terminal process \"{}\" terminated with exit code: {}.",
                        executable, code
                    )),
                    _ => event_message,
                };
                (ExitReason::Process, message)
            }
        };
        ExitInfo {
            code: self.exit_code,
            message,
            reason,
        }
    }

    fn reset(&mut self) {
        self.state = ProcessState::Uninitialized;
        self.kill_requested = false;
        self.ready = None;
        self.exit_code = None;
        self.unacked = 0;
        if self.paused {
            self.paused = false;
            self.backend.set_paused(false);
        }
    }

    fn set_state(&mut self, state: ProcessState) {
        if self.state != state {
            debug!("Process state: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }
}
