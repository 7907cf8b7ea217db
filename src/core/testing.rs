//! In-memory collaborators for unit tests
//!
//! Every fake is a cheap handle over shared state: the test keeps one clone
//! to drive and inspect it while the session owns the boxed other.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use super::addons::{create_builtin, AddonError, AddonKind, AddonLoad, AddonLoader, AddonOptions};
use super::cancel::Reply;
use super::dimensions::{Dimensions, FontMetrics};
use super::launch::{
    DefaultLaunchResolver, LaunchConfig, LaunchResolver, PersistentProcess, ResolveOutcome, ResolvedLaunch,
};
use super::process::{ProcessEvent, ProcessEventSink, PtyBackend, PtyError, ReadyInfo};
use super::terminal::{TerminalError, TerminalSink, VirtualTerminal, WriteAck};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---- backend ----

#[derive(Default)]
struct BackendState {
    spawned: Vec<(String, Dimensions)>,
    attached: Vec<u64>,
    sinks: Vec<ProcessEventSink>,
    fail_next: Option<String>,
    written: Vec<u8>,
    resizes: Vec<Dimensions>,
    signals: Vec<String>,
    paused: Option<bool>,
    shutdowns: usize,
    detached: Vec<bool>,
}

/// Scriptable pty backend
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<BackendState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_spawn(&self, message: &str) {
        lock(&self.state).fail_next = Some(message.to_string());
    }

    pub fn spawned(&self) -> Vec<(String, Dimensions)> {
        lock(&self.state).spawned.clone()
    }

    pub fn attached(&self) -> Vec<u64> {
        lock(&self.state).attached.clone()
    }

    pub fn written(&self) -> Vec<u8> {
        lock(&self.state).written.clone()
    }

    pub fn resizes(&self) -> Vec<Dimensions> {
        lock(&self.state).resizes.clone()
    }

    pub fn signals(&self) -> Vec<String> {
        lock(&self.state).signals.clone()
    }

    pub fn paused(&self) -> Option<bool> {
        lock(&self.state).paused
    }

    pub fn shutdowns(&self) -> usize {
        lock(&self.state).shutdowns
    }

    /// Send an event as the most recent process
    pub fn emit(&self, event: ProcessEvent) -> bool {
        match lock(&self.state).sinks.last() {
            Some(sink) => sink.send(event),
            None => false,
        }
    }

    pub fn ready(&self, pid: u32) -> bool {
        self.emit(ProcessEvent::Ready(ReadyInfo { pid, cwd: None }))
    }

    /// Send `Ready` as the process of an earlier generation
    pub fn ready_generation(&self, generation: u64, pid: u32) -> bool {
        let state = lock(&self.state);
        match state.sinks.iter().find(|s| s.generation() == generation) {
            Some(sink) => sink.send(ProcessEvent::Ready(ReadyInfo { pid, cwd: None })),
            None => false,
        }
    }

    pub fn data(&self, data: &[u8]) -> bool {
        self.emit(ProcessEvent::Data(data.to_vec()))
    }

    pub fn title(&self, title: &str) -> bool {
        self.emit(ProcessEvent::TitleChanged(title.to_string()))
    }

    pub fn exit(&self, code: Option<i32>) -> bool {
        self.emit(ProcessEvent::Exit(code))
    }
}

impl PtyBackend for FakeBackend {
    fn spawn(&mut self, launch: &ResolvedLaunch, dims: Dimensions, events: ProcessEventSink) -> Result<(), PtyError> {
        let mut state = lock(&self.state);
        if let Some(message) = state.fail_next.take() {
            return Err(PtyError::Spawn(message));
        }
        state.spawned.push((launch.executable.clone(), dims));
        state.sinks.push(events);
        Ok(())
    }

    fn attach(&mut self, process: &PersistentProcess, events: ProcessEventSink) -> Result<(), PtyError> {
        let mut state = lock(&self.state);
        state.attached.push(process.id);
        state.sinks.push(events);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), PtyError> {
        lock(&self.state).written.extend_from_slice(data);
        Ok(())
    }

    fn resize(&mut self, dims: Dimensions) -> Result<(), PtyError> {
        lock(&self.state).resizes.push(dims);
        Ok(())
    }

    fn signal(&mut self, signal: &str) -> Result<(), PtyError> {
        lock(&self.state).signals.push(signal.to_string());
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) {
        lock(&self.state).paused = Some(paused);
    }

    fn detach(&mut self, persist: bool) -> Option<u64> {
        let mut state = lock(&self.state);
        state.detached.push(persist);
        persist.then_some(7)
    }

    fn shutdown(&mut self, _immediate: bool) {
        lock(&self.state).shutdowns += 1;
    }

    fn cwd(&self) -> Option<PathBuf> {
        None
    }
}

// ---- virtual terminal ----

#[derive(Default)]
struct TerminalState {
    written: Vec<u8>,
    resizes: Vec<Dimensions>,
    lines: Vec<String>,
    cursor_line: usize,
    focused: bool,
    selection: Option<String>,
    defer_acks: bool,
    pending_acks: Vec<WriteAck>,
    sink: Option<TerminalSink>,
    disposed: bool,
}

/// Records what the session writes and acknowledges synchronously unless
/// told to defer
#[derive(Clone, Default)]
pub struct FakeTerminal {
    state: Arc<Mutex<TerminalState>>,
}

impl FakeTerminal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_lines(&self, lines: &[&str]) {
        let mut state = lock(&self.state);
        state.lines = lines.iter().map(|l| l.to_string()).collect();
        state.cursor_line = state.lines.len().saturating_sub(1);
    }

    pub fn set_selection(&self, selection: Option<&str>) {
        lock(&self.state).selection = selection.map(str::to_string);
    }

    pub fn defer_acks(&self, defer: bool) {
        lock(&self.state).defer_acks = defer;
    }

    /// Acknowledge every deferred chunk
    pub fn ack_all(&self) -> usize {
        let acks = std::mem::take(&mut lock(&self.state).pending_acks);
        let n = acks.len();
        for ack in acks {
            ack.complete();
        }
        n
    }

    /// Acknowledge only the oldest deferred chunk
    pub fn ack_oldest(&self) -> bool {
        let mut state = lock(&self.state);
        if state.pending_acks.is_empty() {
            return false;
        }
        let ack = state.pending_acks.remove(0);
        drop(state);
        ack.complete();
        true
    }

    /// Simulate the user typing
    pub fn type_input(&self, data: &[u8]) -> bool {
        match &lock(&self.state).sink {
            Some(sink) => sink.send_input(data),
            None => false,
        }
    }

    pub fn written(&self) -> Vec<u8> {
        lock(&self.state).written.clone()
    }

    pub fn resizes(&self) -> Vec<Dimensions> {
        lock(&self.state).resizes.clone()
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.state).disposed
    }
}

impl VirtualTerminal for FakeTerminal {
    fn attach(&mut self, sink: TerminalSink) {
        lock(&self.state).sink = Some(sink);
    }

    fn write(&mut self, data: &[u8], ack: WriteAck) -> Result<(), TerminalError> {
        let mut state = lock(&self.state);
        if state.disposed {
            return Err(TerminalError::Disposed);
        }
        state.written.extend_from_slice(data);
        if state.defer_acks {
            state.pending_acks.push(ack);
        } else {
            drop(state);
            ack.complete();
        }
        Ok(())
    }

    fn resize(&mut self, dims: Dimensions) {
        lock(&self.state).resizes.push(dims);
    }

    fn font(&self) -> FontMetrics {
        FontMetrics::default()
    }

    fn focus(&mut self) {
        lock(&self.state).focused = true;
    }

    fn has_focus(&self) -> bool {
        lock(&self.state).focused
    }

    fn cursor_line(&self) -> usize {
        lock(&self.state).cursor_line
    }

    fn line_count(&self) -> usize {
        lock(&self.state).lines.len()
    }

    fn line_text(&self, line: usize) -> Option<String> {
        lock(&self.state).lines.get(line).cloned()
    }

    fn selection(&self) -> Option<String> {
        lock(&self.state).selection.clone()
    }

    fn clear_selection(&mut self) {
        lock(&self.state).selection = None;
    }

    fn dispose(&mut self) {
        let mut state = lock(&self.state);
        state.disposed = true;
        state.sink = None;
    }
}

// ---- launch resolution ----

/// Holds launch requests until the test releases them
#[derive(Clone, Default)]
pub struct DeferredResolver {
    pending: Arc<Mutex<Vec<(LaunchConfig, Reply<ResolveOutcome>)>>>,
}

impl DeferredResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve everything with the default resolver. Returns whether any
    /// reply was accepted.
    pub fn release_all(&self) -> bool {
        let pending = std::mem::take(&mut *lock(&self.pending));
        let resolver = DefaultLaunchResolver::default();
        let mut delivered = false;
        for (launch, reply) in pending {
            delivered |= reply.send(resolver.resolve_now(launch));
        }
        delivered
    }
}

impl LaunchResolver for DeferredResolver {
    fn resolve(&self, launch: LaunchConfig, reply: Reply<ResolveOutcome>) {
        lock(&self.pending).push((launch, reply));
    }
}

// ---- addon loading ----

/// Holds addon loads until the test releases them
#[derive(Clone, Default)]
pub struct ManualAddonLoader {
    requested: Arc<Mutex<Vec<AddonKind>>>,
    pending: Arc<Mutex<BTreeMap<AddonKind, (AddonOptions, Reply<AddonLoad>)>>>,
}

impl ManualAddonLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requested(&self) -> Vec<AddonKind> {
        lock(&self.requested).clone()
    }

    /// Finish a load with the built-in addon. Returns whether the session
    /// accepted the reply.
    pub fn release(&self, kind: AddonKind) -> bool {
        let Some((options, reply)) = lock(&self.pending).remove(&kind) else {
            return false;
        };
        let result = match kind {
            // No display server in tests
            AddonKind::Clipboard => Err(AddonError::Unavailable(kind)),
            _ => create_builtin(kind, &options),
        };
        reply.send(AddonLoad { kind, result })
    }

    pub fn fail(&self, kind: AddonKind, reason: &str) -> bool {
        let Some((_, reply)) = lock(&self.pending).remove(&kind) else {
            return false;
        };
        reply.send(AddonLoad {
            kind,
            result: Err(AddonError::Load {
                kind,
                reason: reason.to_string(),
            }),
        })
    }
}

impl AddonLoader for ManualAddonLoader {
    fn load(&self, kind: AddonKind, options: &AddonOptions, reply: Reply<AddonLoad>) {
        lock(&self.requested).push(kind);
        lock(&self.pending).insert(kind, (options.clone(), reply));
    }
}
