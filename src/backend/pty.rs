//! Unix pseudo terminal backend over `portable-pty`
//!
//! The shell runs as a session leader on the slave side of a pty. Output is
//! pumped by a reader thread; a waiter thread reports the exit. Shutdown
//! signals the whole process group and never waits on the reader, which a
//! grandchild may keep blocked for as long as it holds the slave open.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, info, warn};

use crate::core::dimensions::Dimensions;
use crate::core::launch::ResolvedLaunch;
use crate::core::process::{ProcessEvent, ProcessEventSink, PtyBackend, PtyError, ReadyInfo};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long the exit waits for the reader to drain the tail of the output
const DRAIN_GRACE: Duration = Duration::from_millis(200);
/// How long a graceful shutdown waits after SIGHUP before SIGKILL
const HANGUP_GRACE: Duration = Duration::from_millis(100);

type SharedChild = Arc<Mutex<Box<dyn Child + Send + Sync>>>;

fn lock(child: &SharedChild) -> MutexGuard<'_, Box<dyn Child + Send + Sync>> {
    child.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn pty_size(dims: Dimensions) -> PtySize {
    PtySize {
        rows: dims.rows,
        cols: dims.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

#[derive(Default)]
pub struct PortablePtyBackend {
    master: Option<Box<dyn MasterPty + Send>>,
    writer: Option<Box<dyn Write + Send>>,
    child: Option<SharedChild>,
    /// Process group of the shell (it is spawned as a session leader)
    pgid: Option<Pid>,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    dims: Option<Dimensions>,
    cwd: Option<PathBuf>,
}

impl PortablePtyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last grid applied to the pty
    pub fn dimensions(&self) -> Option<Dimensions> {
        self.dims
    }

    fn build_command(launch: &ResolvedLaunch) -> CommandBuilder {
        let mut cmd = CommandBuilder::new(&launch.executable);
        cmd.args(&launch.args);
        // portable-pty falls back to HOME, which may not exist
        if let Some(dir) = &launch.cwd {
            cmd.cwd(dir);
        } else if let Ok(current) = std::env::current_dir() {
            cmd.cwd(current);
        }
        if !launch.env.contains_key("TERM") {
            cmd.env("TERM", "xterm-256color");
        }
        for (key, value) in &launch.env {
            cmd.env(key, value);
        }
        cmd
    }

    fn spawn_reader(&self, mut reader: Box<dyn Read + Send>, events: ProcessEventSink) -> Result<JoinHandle<()>, PtyError> {
        let running = self.running.clone();
        let paused = self.paused.clone();
        let handle = thread::Builder::new().name("pty-reader".to_string()).spawn(move || {
            let mut buffer = vec![0u8; 8192];
            loop {
                if paused.load(Ordering::SeqCst) && running.load(Ordering::SeqCst) {
                    thread::sleep(POLL_INTERVAL);
                    continue;
                }
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        if !events.send(ProcessEvent::Data(buffer[..n].to_vec())) {
                            break;
                        }
                    }
                    // EIO once the last slave handle closes
                    Err(e) => {
                        debug!("Pty read ended: {}", e);
                        break;
                    }
                }
            }
            debug!("Pty reader exiting");
        })?;
        Ok(handle)
    }

    fn spawn_waiter(&self, child: SharedChild, reader: JoinHandle<()>, events: ProcessEventSink) -> Result<(), PtyError> {
        let running = self.running.clone();
        thread::Builder::new().name("pty-wait".to_string()).spawn(move || {
            let code = loop {
                match lock(&child).try_wait() {
                    Ok(Some(status)) => break Some(status.exit_code() as i32),
                    Ok(None) => {}
                    Err(e) => {
                        debug!("Waiting for child failed: {}", e);
                        break None;
                    }
                }
                thread::sleep(POLL_INTERVAL);
            };
            // Let the tail of the output through first, but never wait on a
            // grandchild that still holds the slave
            let drained_by = Instant::now() + DRAIN_GRACE;
            while !reader.is_finished() && Instant::now() < drained_by {
                thread::sleep(POLL_INTERVAL);
            }
            running.store(false, Ordering::SeqCst);
            events.send(ProcessEvent::Exit(code));
        })?;
        Ok(())
    }

    fn signal_group(&self, signal: Signal) -> Result<(), PtyError> {
        let pgid = self.pgid.ok_or(PtyError::NotRunning)?;
        killpg(pgid, signal).map_err(|e| PtyError::Io(e.into()))
    }

    fn child_exited(&self) -> bool {
        match &self.child {
            Some(child) => !matches!(lock(child).try_wait(), Ok(None)),
            None => true,
        }
    }

    fn kill_group(&mut self) {
        if self.signal_group(Signal::SIGKILL).is_err() {
            // No group to signal; fall back to the direct child
            if let Some(child) = &self.child {
                let _ = lock(child).kill();
            }
        }
    }

    fn release(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.writer = None;
        self.master = None;
        self.child = None;
        self.pgid = None;
    }
}

impl PtyBackend for PortablePtyBackend {
    fn spawn(&mut self, launch: &ResolvedLaunch, dims: Dimensions, events: ProcessEventSink) -> Result<(), PtyError> {
        if self.child.is_some() {
            self.shutdown(true);
        }

        let pair = native_pty_system()
            .openpty(pty_size(dims))
            .map_err(|e| PtyError::Spawn(format!("openpty: {}", e)))?;
        let child = pair
            .slave
            .spawn_command(Self::build_command(launch))
            .map_err(|e| PtyError::Spawn(format!("{}: {}", launch.executable, e)))?;
        // Only the child keeps the slave open, so EOF follows its exit
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Spawn(format!("clone reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Spawn(format!("take writer: {}", e)))?;

        let pid = child.process_id().unwrap_or(0);
        info!("Spawned {} (pid {}) on a pty {}", launch.executable, pid, dims);
        self.pgid = (pid > 0).then(|| Pid::from_raw(pid as i32));
        self.master = Some(pair.master);
        self.writer = Some(writer);
        self.dims = Some(dims);
        self.cwd = launch.cwd.clone();
        self.running = Arc::new(AtomicBool::new(true));
        self.paused = Arc::new(AtomicBool::new(false));

        events.send(ProcessEvent::Ready(ReadyInfo {
            pid,
            cwd: launch.cwd.clone(),
        }));

        let reader = self.spawn_reader(reader, events.clone())?;
        let child: SharedChild = Arc::new(Mutex::new(child));
        self.child = Some(child.clone());
        self.spawn_waiter(child, reader, events)?;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        let writer = self.writer.as_mut().ok_or(PtyError::NotRunning)?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    fn resize(&mut self, dims: Dimensions) -> Result<(), PtyError> {
        let master = self.master.as_ref().ok_or(PtyError::NotRunning)?;
        master
            .resize(pty_size(dims))
            .map_err(|e| PtyError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?;
        debug!("Pty resized to {}", dims);
        self.dims = Some(dims);
        Ok(())
    }

    fn signal(&mut self, signal: &str) -> Result<(), PtyError> {
        match signal {
            "SIGINT" => self.write(b"\x03"),
            "SIGTERM" => self.signal_group(Signal::SIGTERM),
            "SIGHUP" => self.signal_group(Signal::SIGHUP),
            "SIGKILL" => self.signal_group(Signal::SIGKILL),
            _ => Err(PtyError::Unsupported("signal")),
        }
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    fn shutdown(&mut self, immediate: bool) {
        if self.child.is_none() {
            return;
        }
        if !immediate && self.signal_group(Signal::SIGHUP).is_ok() {
            let deadline = Instant::now() + HANGUP_GRACE;
            while !self.child_exited() && Instant::now() < deadline {
                thread::sleep(POLL_INTERVAL);
            }
        }
        if !self.child_exited() {
            warn!("Pty child still running at shutdown; killing its process group");
        }
        // Background jobs share the group and may outlive the shell
        self.kill_group();
        self.release();
    }

    fn cwd(&self) -> Option<PathBuf> {
        self.cwd.clone()
    }
}

impl Drop for PortablePtyBackend {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}
