//! Session controller
//!
//! A [`Session`] owns one interactive shell session: the process manager and
//! backing process, the virtual-terminal core reference, the shell-integration
//! decoder, the capability registry and the loaded addons.
//!
//! # Model
//!
//! Everything runs on the thread that owns the session. Asynchronous work
//! (launch resolution, backend output, addon loads, write acknowledgements)
//! reports back as [`SessionMessage`]s on one channel; [`Session::poll`]
//! drains it. Disposal cancels the session's [`CancellationToken`], which is
//! checked once, centrally, before any message is applied.
//!
//! ```text
//! Created ─> Opening ─> Ready ─> Exiting ─> Disposed
//!               └──────────┴────────┴──────────^  (dispose)
//! ```
//!
//! Output path: backend → [`Session::poll`] → VT core (raw bytes, unchanged)
//! → shell-integration decoder → capabilities → addons.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::addons::{
    AcceleratedRenderer, Addon, AddonContext, AddonHost, AddonKind, AddonLoad, AddonLoader, AddonOptions,
    ClipboardAddon, GpuAcceleration, SearchAddon, SearchMatch, SearchOptions,
};
use super::cancel::{CancellationToken, Reply};
use super::capabilities::{
    BufferMarkDetection, Capability, CapabilityKind, CapabilityRegistry, CommandDetection, CwdDetection,
    NaiveCwdDetection,
};
use super::dimensions::{compute_dimensions, resolve_dimensions, ContainerSize, DimensionOverride, Dimensions};
use super::events::Emitter;
use super::launch::{LaunchConfig, LaunchResolver, PersistentProcess, ResolveOutcome, ResolvedLaunch, ShellKind};
use super::process::{
    ExitInfo, ExitReason, FlowControl, ProcessEvent, ProcessManager, ProcessState, PtyBackend, PtyError, ReadyInfo,
};
use super::resize::{ResizeDebouncer, DEFAULT_DEBOUNCE};
use super::shared::SharedState;
use super::shell_integration::{ShellIntegrationDecoder, ShellIntegrationEvent};
use super::terminal::{TerminalSink, VirtualTerminal, WriteAck};

/// Everything that reaches a session asynchronously
#[derive(Debug)]
pub(crate) enum SessionMessage {
    Process { generation: u64, event: ProcessEvent },
    LaunchResolved { generation: u64, outcome: ResolveOutcome },
    AddonLoaded(AddonLoad),
    WriteAcked(u64),
    Input(Vec<u8>),
}

/// Session-level lifecycle, orthogonal to [`ProcessState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Opening,
    Ready,
    Exiting,
    Disposed,
}

/// Notifications for the host
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Ready(ReadyInfo),
    TitleChanged(String),
    IconChanged(String),
    ColorChanged(Option<String>),
    DimensionsChanged(Dimensions),
    FocusChanged(bool),
    CapabilityAdded(CapabilityKind),
    CapabilityRemoved(CapabilityKind),
    ShellIntegration(ShellIntegrationEvent),
    Disconnected,
    Reconnected,
    /// Fired exactly once per session
    Exited(ExitInfo),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Keep input typed before the process is ready instead of dropping it
    pub queue_input_until_ready: bool,
    /// Stay around after the process exits (allows relaunch)
    pub keep_open_on_exit: bool,
    /// Attempts to wait for in-flight output on dispose
    pub flush_retries: u32,
    pub flush_interval: Duration,
    pub resize_debounce: Duration,
    pub flow_control: FlowControl,
    pub addons: AddonOptions,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            queue_input_until_ready: false,
            keep_open_on_exit: false,
            flush_retries: 10,
            flush_interval: Duration::from_millis(10),
            resize_debounce: DEFAULT_DEBOUNCE,
            flow_control: FlowControl::default(),
            addons: AddonOptions::default(),
        }
    }
}

/// Process-side collaborators
pub struct ProcessContext {
    pub backend: Box<dyn PtyBackend>,
    pub resolver: Box<dyn LaunchResolver>,
}

/// Rendering-side collaborators
pub struct RenderContext {
    pub terminal: Box<dyn VirtualTerminal>,
    pub addon_loader: Box<dyn AddonLoader>,
}

/// All collaborators and options a session is built from
pub struct SessionContext {
    pub process: ProcessContext,
    pub render: RenderContext,
    pub shared: SharedState,
    pub options: SessionOptions,
}

/// Size known at open time
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InitialSize {
    /// Pixel size of the host container
    Container(ContainerSize),
    /// Grid the host already knows
    Grid(Dimensions),
    /// Not measurable yet
    Unknown,
}

/// A resize from the host
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResizeRequest {
    Container(ContainerSize),
    Grid(Dimensions),
}

pub struct Session {
    id: u64,
    state: SessionState,
    launch: LaunchConfig,
    resolved: Option<ResolvedLaunch>,
    /// Bumped per launch request; a kill or relaunch orphans older resolutions
    launch_generation: u64,
    pending_launch: Option<u64>,
    tx: Sender<SessionMessage>,
    rx: Receiver<SessionMessage>,
    token: CancellationToken,
    process: ProcessManager,
    resolver: Box<dyn LaunchResolver>,
    terminal: Box<dyn VirtualTerminal>,
    addon_loader: Box<dyn AddonLoader>,
    addons: AddonHost,
    capabilities: CapabilityRegistry,
    capability_changes: Rc<RefCell<Vec<SessionEvent>>>,
    decoder: ShellIntegrationDecoder,
    resizer: ResizeDebouncer,
    shared: SharedState,
    options: SessionOptions,
    events: Emitter<SessionEvent>,
    last_request: Option<ResizeRequest>,
    fixed: Option<DimensionOverride>,
    dims: Dimensions,
    /// Size the current process was created with
    spawn_dims: Dimensions,
    visible: bool,
    focused: bool,
    input_queue: Vec<u8>,
    /// Output chunks handed to the VT core and not yet acknowledged
    pending_writes: BTreeMap<u64, usize>,
    next_write_id: u64,
    user_title: Option<String>,
    process_title: Option<String>,
    label: String,
    icon: Option<String>,
    color: Option<String>,
    exit: Option<ExitInfo>,
}

impl Session {
    /// Open a session. Returns immediately; the process is created once the
    /// launch has been resolved, which may happen later in [`Session::poll`].
    pub fn open(
        id: u64,
        launch: LaunchConfig,
        size: InitialSize,
        ctx: SessionContext,
    ) -> (Self, Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel();
        let SessionContext {
            process,
            render,
            shared,
            options,
        } = ctx;

        let mut session = Self {
            id,
            state: SessionState::Created,
            launch,
            resolved: None,
            launch_generation: 0,
            pending_launch: None,
            process: ProcessManager::new(process.backend, tx.clone(), options.flow_control),
            tx,
            rx,
            token: CancellationToken::new(),
            resolver: process.resolver,
            terminal: render.terminal,
            addon_loader: render.addon_loader,
            addons: AddonHost::new(),
            capabilities: CapabilityRegistry::new(),
            capability_changes: Rc::new(RefCell::new(Vec::new())),
            decoder: ShellIntegrationDecoder::new(),
            resizer: ResizeDebouncer::new(options.resize_debounce),
            shared,
            options,
            events: Emitter::new(),
            last_request: None,
            fixed: None,
            dims: Dimensions::default(),
            spawn_dims: Dimensions::default(),
            visible: true,
            focused: false,
            input_queue: Vec::new(),
            pending_writes: BTreeMap::new(),
            next_write_id: 0,
            user_title: None,
            process_title: None,
            label: String::new(),
            icon: None,
            color: None,
            exit: None,
        };
        let events = session.events.subscribe();

        session.set_state(SessionState::Opening);
        session.dims = session.initial_dimensions(size);
        session.terminal.attach(TerminalSink::new(session.tx.clone()));
        session.terminal.resize(session.dims);
        session.install_capability_listeners();
        session
            .capabilities
            .add(Capability::NaiveCwdDetection(NaiveCwdDetection::new(session.launch.cwd.clone())));
        session.load_configured_addons();
        session.label = session.compute_label();

        session.request_launch();
        session.process_messages();
        (session, events)
    }

    fn initial_dimensions(&mut self, size: InitialSize) -> Dimensions {
        let cache = &self.shared.dimensions;
        match size {
            InitialSize::Container(container) if container.is_measurable() => {
                self.last_request = Some(ResizeRequest::Container(container));
                compute_dimensions(Some(container), &self.terminal.font(), None, cache)
            }
            InitialSize::Grid(grid) if !grid.is_empty() => {
                self.last_request = Some(ResizeRequest::Grid(grid));
                resolve_dimensions(Some(grid), None, cache)
            }
            _ => match &self.launch.attach_persistent_process {
                Some(persistent) if !persistent.dimensions.is_empty() => persistent.dimensions,
                _ => resolve_dimensions(None, None, cache),
            },
        }
    }

    fn install_capability_listeners(&mut self) {
        let added = self.capability_changes.clone();
        self.capabilities.on_did_add_capability_type(move |kind, _| {
            added.borrow_mut().push(SessionEvent::CapabilityAdded(kind));
        });
        let removed = self.capability_changes.clone();
        self.capabilities.on_did_remove_capability_type(move |kind, _| {
            removed.borrow_mut().push(SessionEvent::CapabilityRemoved(kind));
        });
    }

    fn load_configured_addons(&mut self) {
        let options = self.options.addons.clone();
        self.load_addon(AddonKind::Unicode);
        if options.decorations {
            self.load_addon(AddonKind::Decorations);
        }
        if options.clipboard_osc52 {
            self.load_addon(AddonKind::Clipboard);
        }
        if options.ligatures {
            self.load_addon(AddonKind::Ligatures);
        }
        if options.gpu_acceleration != GpuAcceleration::Off {
            self.load_addon(AddonKind::Renderer);
        }
    }

    fn request_launch(&mut self) {
        self.launch_generation += 1;
        let generation = self.launch_generation;
        self.pending_launch = Some(generation);
        let reply = Reply::new(self.tx.clone(), self.token.clone(), move |outcome| {
            SessionMessage::LaunchResolved { generation, outcome }
        });
        self.resolver.resolve(self.launch.clone(), reply);
    }

    // ---- accessors ----

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn process_state(&self) -> ProcessState {
        self.process.state()
    }

    pub fn is_disposed(&self) -> bool {
        self.state == SessionState::Disposed
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dims
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn icon(&self) -> Option<&str> {
        self.icon.as_deref()
    }

    pub fn color(&self) -> Option<&str> {
        self.color.as_deref()
    }

    pub fn shell_kind(&self) -> Option<&ShellKind> {
        self.resolved.as_ref().map(|r| &r.shell_kind)
    }

    pub fn launch_config(&self) -> &LaunchConfig {
        &self.launch
    }

    pub fn exit_info(&self) -> Option<&ExitInfo> {
        self.exit.as_ref()
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn has_focus(&self) -> bool {
        self.focused
    }

    /// Output chunks still waiting for the VT core to acknowledge them
    pub fn pending_writes(&self) -> usize {
        self.pending_writes.len()
    }

    /// Best known working directory
    pub fn cwd(&self) -> Option<PathBuf> {
        if let Some(cwd) = self.capabilities.get::<CwdDetection>().and_then(|c| c.cwd()) {
            return Some(cwd.to_path_buf());
        }
        if let Some(cwd) = self.capabilities.get::<NaiveCwdDetection>().and_then(|c| c.cwd()) {
            return Some(cwd.to_path_buf());
        }
        self.process.cwd()
    }

    /// When the session next needs a poll without new messages
    pub fn next_deadline(&self) -> Option<Instant> {
        self.resizer.deadline()
    }

    pub fn subscribe(&mut self) -> Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // ---- event loop ----

    /// Apply everything that arrived asynchronously and due resizes.
    /// Returns false once the session is disposed.
    pub fn poll(&mut self) -> bool {
        self.poll_at(Instant::now())
    }

    pub fn poll_at(&mut self, now: Instant) -> bool {
        if self.token.is_cancelled() || self.is_disposed() {
            return false;
        }
        self.process_messages();
        if self.is_disposed() {
            return false;
        }
        if let Some(dims) = self.resizer.poll(now) {
            self.apply_process_resize(dims);
        }
        true
    }

    fn process_messages(&mut self) {
        while let Ok(message) = self.rx.try_recv() {
            if self.token.is_cancelled() {
                debug!("Session {}: dropping {:?} after dispose", self.id, message);
                continue;
            }
            self.handle_message(message);
        }
    }

    fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Process { generation, event } => self.handle_process_event(generation, event),
            SessionMessage::LaunchResolved { generation, outcome } => self.on_launch_resolved(generation, outcome),
            SessionMessage::AddonLoaded(load) => self.on_addon_loaded(load),
            SessionMessage::WriteAcked(id) => self.on_write_acked(id),
            SessionMessage::Input(data) => self.write(&data),
        }
    }

    fn on_launch_resolved(&mut self, generation: u64, outcome: ResolveOutcome) {
        if self.pending_launch != Some(generation) || self.exit.is_some() {
            debug!("Session {}: discarding superseded launch resolution {}", self.id, generation);
            return;
        }
        self.pending_launch = None;
        let resolved = match outcome {
            Ok(resolved) => resolved,
            Err(message) => {
                let exit = self.process.reject_launch(&message);
                self.handle_exit(exit);
                return;
            }
        };

        info!(
            "Session {}: launching {} ({})",
            self.id,
            resolved.executable,
            resolved.shell_kind.display_name()
        );
        self.decoder.set_enabled(resolved.shell_integration);
        if let Some(persistent) = &resolved.attach {
            self.process_title = Some(persistent.title.clone()).filter(|t| !t.is_empty());
            if let Some(snapshot) = persistent.commands.clone() {
                self.capabilities
                    .get_or_add(CommandDetection::new)
                    .restore(snapshot);
            }
        }

        self.spawn_dims = self.dims;
        self.resizer.reset();
        self.resizer.set_applied(self.dims);
        let result = if self.process.state() == ProcessState::Uninitialized {
            self.process.create_process(&resolved, self.dims)
        } else {
            self.process.relaunch(&resolved, self.dims)
        };
        self.resolved = Some(resolved);
        self.set_state(SessionState::Ready);
        self.drain_capability_changes();
        self.relabel();

        if let Err(exit) = result {
            self.handle_exit(exit);
        }
    }

    fn handle_process_event(&mut self, generation: u64, event: ProcessEvent) {
        let Some(event) = self.process.handle_event(generation, event) else {
            return;
        };

        match event {
            ProcessEvent::Ready(ready) => {
                info!("Session {}: process {} is running", self.id, ready.pid);
                self.process.sync_dimensions(self.spawn_dims);
                if let Some(cwd) = ready.cwd.clone() {
                    self.update_naive_cwd(cwd);
                }
                let queued = std::mem::take(&mut self.input_queue);
                if !queued.is_empty() {
                    debug!("Session {}: flushing {} queued input bytes", self.id, queued.len());
                    self.write(&queued);
                }
                self.events.fire(SessionEvent::Ready(ready));
            }
            ProcessEvent::Data(data) => self.on_output(data),
            ProcessEvent::Exit(_) => {
                let exit = self.process.exit_info(None);
                self.handle_exit(exit);
            }
            ProcessEvent::LaunchFailed(message) => {
                let exit = self.process.exit_info(Some(message));
                self.handle_exit(exit);
            }
            ProcessEvent::TitleChanged(title) => {
                self.process_title = Some(title).filter(|t| !t.is_empty());
                self.relabel();
            }
            ProcessEvent::CwdChanged(cwd) => self.update_naive_cwd(cwd),
            ProcessEvent::Disconnected => {
                info!("Session {}: pty disconnected", self.id);
                self.events.fire(SessionEvent::Disconnected);
            }
            ProcessEvent::Reconnected => {
                info!("Session {}: pty reconnected", self.id);
                self.events.fire(SessionEvent::Reconnected);
            }
            ProcessEvent::RestoreCommands(snapshot) => {
                debug!("Session {}: restoring {} commands", self.id, snapshot.commands.len());
                self.capabilities
                    .get_or_add(CommandDetection::new)
                    .restore(snapshot);
                self.drain_capability_changes();
                self.relabel();
            }
        }
    }

    fn on_output(&mut self, data: Vec<u8>) {
        self.next_write_id += 1;
        let id = self.next_write_id;
        self.pending_writes.insert(id, data.len());
        let ack = WriteAck::new(id, self.tx.clone());
        if let Err(e) = self.terminal.write(&data, ack) {
            // Drop this chunk only
            warn!("Session {}: dropping {} bytes of output: {}", self.id, data.len(), e);
            self.pending_writes.remove(&id);
            self.process.acknowledge(data.len());
        }

        for event in self.decoder.feed(&data) {
            self.apply_shell_event(event);
        }
        self.addons.output(&data);
        self.drain_capability_changes();
    }

    fn on_write_acked(&mut self, id: u64) {
        if let Some(len) = self.pending_writes.remove(&id) {
            self.process.acknowledge(len);
        }
    }

    fn on_addon_loaded(&mut self, load: AddonLoad) {
        let ctx = AddonContext {
            font: self.terminal.font(),
            dimensions: self.dims,
            shared: &self.shared,
        };
        self.addons.complete(load, &ctx);
    }

    fn apply_shell_event(&mut self, event: ShellIntegrationEvent) {
        let line = self.terminal.cursor_line();
        match &event {
            ShellIntegrationEvent::PromptStart => {
                self.capabilities
                    .get_or_add(CommandDetection::new)
                    .handle_prompt_start(line);
            }
            ShellIntegrationEvent::CommandStart => {
                self.capabilities
                    .get_or_add(CommandDetection::new)
                    .handle_command_start(line);
            }
            ShellIntegrationEvent::CommandLine(command) => {
                self.capabilities
                    .get_or_add(CommandDetection::new)
                    .set_command_line(command.clone());
            }
            ShellIntegrationEvent::CommandExecuted => {
                self.capabilities
                    .get_or_add(CommandDetection::new)
                    .handle_command_executed(line);
                self.relabel();
            }
            ShellIntegrationEvent::CommandFinished { exit_code } => {
                let finished = self
                    .capabilities
                    .get_or_add(CommandDetection::new)
                    .handle_command_finished(*exit_code, line)
                    .cloned();
                if let Some(command) = finished {
                    self.addons.command_finished(&command);
                }
                self.relabel();
            }
            ShellIntegrationEvent::CwdChanged(cwd) => {
                let changed = self.capabilities.get_or_add(CwdDetection::new).update(cwd.clone());
                if let Some(commands) = self.capabilities.get_mut::<CommandDetection>() {
                    commands.set_cwd(cwd.clone());
                }
                // Reported cwd supersedes the naive guess
                self.capabilities.remove(CapabilityKind::NaiveCwdDetection);
                if changed {
                    self.relabel();
                }
            }
            ShellIntegrationEvent::SetMark { id, hidden } => {
                self.capabilities
                    .get_or_add(BufferMarkDetection::new)
                    .add_mark(id.clone(), line, *hidden);
            }
            ShellIntegrationEvent::Property { key, value } => {
                debug!("Session {}: shell property {}={}", self.id, key, value);
            }
        }
        self.events.fire(SessionEvent::ShellIntegration(event));
    }

    fn update_naive_cwd(&mut self, cwd: PathBuf) {
        if let Some(naive) = self.capabilities.get_mut::<NaiveCwdDetection>() {
            if naive.update(cwd) {
                self.relabel();
            }
        }
    }

    fn drain_capability_changes(&mut self) {
        let changes = std::mem::take(&mut *self.capability_changes.borrow_mut());
        if changes.is_empty() {
            return;
        }
        for change in changes {
            self.events.fire(change);
        }
        self.relabel();
    }

    // ---- label ----

    fn compute_label(&self) -> String {
        let base = self
            .user_title
            .clone()
            .or_else(|| self.process_title.clone())
            .or_else(|| self.resolved.as_ref().and_then(|r| r.name.clone()))
            .or_else(|| self.launch.name.clone())
            .or_else(|| self.shell_kind().map(|k| k.display_name().to_string()))
            .unwrap_or_else(|| "Terminal".to_string());

        let executing = self
            .capabilities
            .get::<CommandDetection>()
            .and_then(|c| c.executing_command())
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        let suffix = executing.or_else(|| {
            self.cwd()
                .and_then(|cwd| cwd.file_name().map(|n| n.to_string_lossy().into_owned()))
        });

        match suffix {
            Some(suffix) if suffix != base => format!("{} - {}", base, suffix),
            _ => base,
        }
    }

    fn relabel(&mut self) {
        if self.is_disposed() {
            return;
        }
        let label = self.compute_label();
        if label != self.label {
            debug!("Session {}: label {:?}", self.id, label);
            self.label = label.clone();
            self.events.fire(SessionEvent::TitleChanged(label));
        }
    }

    // ---- resize ----

    /// Resize to a container. Unmeasurable sizes are ignored.
    pub fn resize(&mut self, container: ContainerSize, immediate: bool) {
        self.resize_at(ResizeRequest::Container(container), immediate, Instant::now());
    }

    /// Resize to a grid the host already measured.
    pub fn resize_grid(&mut self, dims: Dimensions, immediate: bool) {
        self.resize_at(ResizeRequest::Grid(dims), immediate, Instant::now());
    }

    pub fn resize_at(&mut self, request: ResizeRequest, immediate: bool, now: Instant) {
        if self.is_disposed() {
            return;
        }
        let measurable = match request {
            ResizeRequest::Container(container) => container.is_measurable(),
            ResizeRequest::Grid(grid) => !grid.is_empty(),
        };
        if !measurable {
            debug!("Session {}: ignoring resize to {:?}", self.id, request);
            return;
        }
        self.last_request = Some(request);
        self.update_dimensions(immediate, now);
    }

    /// Pin the grid size (or unpin with `None`). Applied without debouncing.
    pub fn set_fixed_dimensions(&mut self, fixed: Option<DimensionOverride>) {
        if self.is_disposed() {
            return;
        }
        self.fixed = fixed;
        self.update_dimensions(true, Instant::now());
    }

    /// Apply a pending debounced resize now.
    pub fn flush_resize(&mut self) {
        if let Some(dims) = self.resizer.flush() {
            self.apply_process_resize(dims);
        }
    }

    /// Becoming visible applies any pending resize before the user types.
    pub fn set_visible(&mut self, visible: bool) {
        if visible && !self.visible {
            self.flush_resize();
        }
        self.visible = visible;
    }

    fn effective_dimensions(&self) -> Dimensions {
        let cache = &self.shared.dimensions;
        match self.last_request {
            Some(ResizeRequest::Container(container)) => {
                compute_dimensions(Some(container), &self.terminal.font(), self.fixed, cache)
            }
            Some(ResizeRequest::Grid(grid)) => resolve_dimensions(Some(grid), self.fixed, cache),
            None if self.fixed.is_some() => resolve_dimensions(None, self.fixed, cache),
            None => self.dims,
        }
    }

    fn update_dimensions(&mut self, immediate: bool, now: Instant) {
        let dims = self.effective_dimensions();
        if dims != self.dims {
            self.dims = dims;
            self.terminal.resize(dims);
            self.addons.resize(dims, &self.terminal.font());
            self.events.fire(SessionEvent::DimensionsChanged(dims));
        }
        if let Some(dims) = self.resizer.request(dims, immediate, now) {
            self.apply_process_resize(dims);
        }
    }

    /// Recompute with fresh font metrics and push the result everywhere.
    fn refresh_dimensions(&mut self) {
        let dims = self.effective_dimensions();
        let changed = dims != self.dims;
        self.dims = dims;
        self.terminal.resize(dims);
        self.addons.resize(dims, &self.terminal.font());
        if changed {
            self.events.fire(SessionEvent::DimensionsChanged(dims));
        }
        if let Some(dims) = self.resizer.request(dims, true, Instant::now()) {
            self.apply_process_resize(dims);
        }
    }

    fn apply_process_resize(&mut self, dims: Dimensions) {
        if self.is_disposed() || self.process.state().is_exited() {
            return;
        }
        debug!("Session {}: resizing process to {}", self.id, dims);
        self.process.set_dimensions(dims);
    }

    // ---- input and host commands ----

    /// Send user input to the process.
    ///
    /// Before the process is running input is dropped, unless the session
    /// was opened with `queue_input_until_ready`.
    pub fn write(&mut self, data: &[u8]) {
        if self.is_disposed() || data.is_empty() {
            return;
        }
        if self.process.is_running() {
            if let Err(e) = self.process.write(data) {
                warn!("Session {}: write failed: {}", self.id, e);
            }
            return;
        }
        let launching = matches!(
            self.process.state(),
            ProcessState::Uninitialized | ProcessState::Launching | ProcessState::Disconnected
        );
        if self.options.queue_input_until_ready && launching {
            self.input_queue.extend_from_slice(data);
        } else {
            debug!("Session {}: dropping {} input bytes, process not ready", self.id, data.len());
        }
    }

    pub fn send_text(&mut self, text: &str, add_newline: bool) {
        let mut data = text.as_bytes().to_vec();
        if add_newline && !text.ends_with('\r') {
            data.push(b'\r');
        }
        self.write(&data);
    }

    pub fn run_command(&mut self, command: &str) {
        self.send_text(command, true);
    }

    pub fn focus(&mut self) {
        if self.is_disposed() {
            return;
        }
        self.terminal.focus();
        self.focus_changed(self.terminal.has_focus());
    }

    /// Host reports a focus change
    pub fn focus_changed(&mut self, focused: bool) {
        if self.focused != focused {
            self.focused = focused;
            self.events.fire(SessionEvent::FocusChanged(focused));
        }
    }

    /// Set a user title; `None` goes back to the automatic label.
    pub fn set_title(&mut self, title: Option<String>) {
        self.user_title = title.filter(|t| !t.is_empty());
        self.relabel();
    }

    pub fn set_icon(&mut self, icon: impl Into<String>) {
        let icon = icon.into();
        if self.icon.as_deref() != Some(icon.as_str()) {
            self.icon = Some(icon.clone());
            self.events.fire(SessionEvent::IconChanged(icon));
        }
    }

    pub fn set_color(&mut self, color: Option<String>) {
        if self.color != color {
            self.color = color.clone();
            self.events.fire(SessionEvent::ColorChanged(color));
        }
    }

    pub fn clear(&mut self) {
        self.terminal.clear();
    }

    pub fn scroll_lines(&mut self, delta: i32) {
        self.terminal.scroll_lines(delta);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.terminal.scroll_to_bottom();
    }

    pub fn select_all(&mut self) {
        self.terminal.select_all();
    }

    pub fn selection(&self) -> Option<String> {
        self.terminal.selection()
    }

    /// Copy the selection through the clipboard addon.
    pub fn copy_selection(&mut self) -> bool {
        let Some(text) = self.terminal.selection() else {
            return false;
        };
        let Some(clipboard) = self.addons.get_mut::<ClipboardAddon>() else {
            return false;
        };
        match clipboard.copy(&text) {
            Ok(()) => {
                self.terminal.clear_selection();
                true
            }
            Err(e) => {
                warn!("Session {}: copy failed: {}", self.id, e);
                false
            }
        }
    }

    /// Paste the clipboard into the process.
    pub fn paste(&mut self) {
        let text = match self.addons.get_mut::<ClipboardAddon>().map(|c| c.paste()) {
            Some(Ok(text)) => text,
            Some(Err(e)) => {
                warn!("Session {}: paste failed: {}", self.id, e);
                return;
            }
            None => return,
        };
        self.write(text.as_bytes());
    }

    pub fn send_signal(&mut self, signal: &str) -> Result<(), PtyError> {
        self.process.send_signal(signal)
    }

    /// Kill the process at the user's request.
    pub fn kill(&mut self) {
        if self.is_disposed() || self.exit.is_some() {
            return;
        }
        info!("Session {}: killed by user", self.id);
        self.set_state(SessionState::Exiting);
        if self.process.state() == ProcessState::Uninitialized {
            // Nothing was launched yet; an in-flight resolution must not spawn
            self.pending_launch = None;
            self.handle_exit(ExitInfo::new(ExitReason::User));
        } else {
            self.process.kill();
        }
    }

    /// Replace the backing process, optionally with a new launch config.
    pub fn relaunch(&mut self, launch: Option<LaunchConfig>) {
        if self.is_disposed() {
            return;
        }
        if let Some(launch) = launch {
            self.launch = launch;
        }
        info!("Session {}: relaunching", self.id);
        self.exit = None;
        self.input_queue.clear();
        // Acks for the old process's output must not credit the new one
        self.pending_writes.clear();
        self.decoder.finish();
        self.process_title = None;
        for kind in [
            CapabilityKind::CommandDetection,
            CapabilityKind::CwdDetection,
            CapabilityKind::BufferMarkDetection,
        ] {
            self.capabilities.remove(kind);
        }
        if !self.capabilities.has(CapabilityKind::NaiveCwdDetection) {
            self.capabilities
                .add(Capability::NaiveCwdDetection(NaiveCwdDetection::new(self.launch.cwd.clone())));
        }
        self.drain_capability_changes();
        self.set_state(SessionState::Opening);
        self.request_launch();
        self.process_messages();
    }

    /// Let go of the process and dispose the session. With `persist` the
    /// process keeps running and the returned descriptor can re-attach to it.
    pub fn detach(&mut self, persist: bool) -> Option<PersistentProcess> {
        if self.is_disposed() {
            return None;
        }
        let id = self.process.detach_from_process(persist);
        let persistent = match (id, persist) {
            (Some(id), true) => Some(PersistentProcess {
                id,
                dimensions: self.dims,
                cwd: self.cwd(),
                title: self.label.clone(),
                executable: self
                    .resolved
                    .as_ref()
                    .map(|r| r.executable.clone())
                    .unwrap_or_default(),
                commands: self.capabilities.get::<CommandDetection>().map(|c| c.snapshot()),
            }),
            _ => None,
        };
        self.dispose(ExitReason::Detached);
        persistent
    }

    // ---- addons ----

    /// Start loading an addon. Returns false when it is already loaded or
    /// loading, or the configuration rules it out.
    pub fn load_addon(&mut self, kind: AddonKind) -> bool {
        if self.is_disposed() {
            return false;
        }
        if kind == AddonKind::Renderer {
            match self.options.addons.gpu_acceleration {
                GpuAcceleration::Off => return false,
                GpuAcceleration::Auto if self.shared.renderer.is_set() => {
                    info!("Session {}: accelerated renderer disabled after earlier failure", self.id);
                    return false;
                }
                _ => {}
            }
        }
        if !self.addons.begin(kind) {
            return false;
        }
        debug!("Session {}: loading {} addon", self.id, kind);
        let reply = Reply::new(self.tx.clone(), self.token.clone(), SessionMessage::AddonLoaded);
        self.addon_loader.load(kind, &self.options.addons, reply);
        true
    }

    pub fn unload_addon(&mut self, kind: AddonKind) -> bool {
        let unloaded = self.addons.unload(kind);
        if unloaded && kind == AddonKind::Renderer {
            self.refresh_dimensions();
        }
        unloaded
    }

    pub fn addons(&self) -> &AddonHost {
        &self.addons
    }

    pub fn addon<T: Addon>(&self) -> Option<&T> {
        self.addons.get::<T>()
    }

    pub fn addon_mut<T: Addon>(&mut self) -> Option<&mut T> {
        self.addons.get_mut::<T>()
    }

    /// Find `query` in the buffer. The search addon is loaded on first use,
    /// so the first call may return `None`.
    pub fn search(&mut self, query: &str, options: SearchOptions, backwards: bool) -> Option<SearchMatch> {
        if !self.addons.is_loaded(AddonKind::Search) {
            self.load_addon(AddonKind::Search);
            return None;
        }
        let terminal = &*self.terminal;
        let search = self.addons.get_mut::<SearchAddon>()?;
        if backwards {
            search.find_previous(terminal, query, options)
        } else {
            search.find_next(terminal, query, options)
        }
    }

    /// The accelerated renderer lost its graphics context for good.
    pub fn renderer_context_lost(&mut self) {
        let Some(renderer) = self.addons.get_mut::<AcceleratedRenderer>() else {
            return;
        };
        renderer.handle_context_lost();
        self.shared.renderer.set();
        self.unload_addon(AddonKind::Renderer);
    }

    // ---- exit and disposal ----

    fn handle_exit(&mut self, exit: ExitInfo) {
        if self.exit.is_some() || self.is_disposed() {
            return;
        }
        match &exit.message {
            Some(message) => info!("Session {}: exited: {}", self.id, message),
            None => info!("Session {}: exited ({:?}, code {:?})", self.id, exit.reason, exit.code),
        }
        self.set_state(SessionState::Exiting);
        self.decoder.finish();
        self.input_queue.clear();
        self.pending_launch = None;
        self.exit = Some(exit.clone());
        self.events.fire(SessionEvent::Exited(exit.clone()));

        if !self.options.keep_open_on_exit {
            self.dispose(exit.reason);
        }
    }

    /// Tear the session down. Idempotent; the exit notification fires once.
    pub fn dispose(&mut self, reason: ExitReason) {
        if self.is_disposed() {
            return;
        }
        debug!("Session {}: disposing ({:?})", self.id, reason);
        self.set_state(SessionState::Exiting);
        self.flush_writes();

        self.token.cancel();
        self.resizer.cancel();
        self.decoder.finish();
        self.input_queue.clear();

        if self.exit.is_none() {
            let exit = ExitInfo {
                code: self.process.exit_code(),
                message: None,
                reason,
            };
            self.exit = Some(exit.clone());
            self.events.fire(SessionEvent::Exited(exit));
        }

        self.process.dispose(reason == ExitReason::Detached);
        self.addons.dispose_all();
        self.capabilities.clear_listeners();
        self.capabilities.clear();
        self.capability_changes.borrow_mut().clear();
        self.terminal.dispose();
        self.set_state(SessionState::Disposed);
        self.events.clear();
    }

    /// Wait, bounded, for the VT core to acknowledge in-flight output.
    fn flush_writes(&mut self) {
        for attempt in 0..=self.options.flush_retries {
            while let Ok(message) = self.rx.try_recv() {
                match message {
                    SessionMessage::WriteAcked(id) => self.on_write_acked(id),
                    other => debug!("Session {}: discarding {:?} during dispose", self.id, other),
                }
            }
            if self.pending_writes.is_empty() {
                return;
            }
            if attempt < self.options.flush_retries {
                thread::sleep(self.options.flush_interval);
            }
        }
        warn!(
            "Session {}: {} output writes still pending at dispose",
            self.id,
            self.pending_writes.len()
        );
        self.pending_writes.clear();
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            info!("Session {}: {:?} -> {:?}", self.id, self.state, state);
            self.state = state;
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose(ExitReason::Shutdown);
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("process", &self.process.state())
            .field("dims", &self.dims)
            .field("label", &self.label)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::addons::{DecorationStatus, DecorationsAddon, UnicodeAddon};
    use crate::core::capabilities::CommandPhase;
    use crate::core::launch::{DefaultLaunchResolver, UNTRUSTED_WORKSPACE_MESSAGE};
    use crate::core::testing::{DeferredResolver, FakeBackend, FakeTerminal, ManualAddonLoader};

    struct Harness {
        session: Session,
        events: Receiver<SessionEvent>,
        backend: FakeBackend,
        terminal: FakeTerminal,
        loader: ManualAddonLoader,
    }

    impl Harness {
        fn drain(&self) -> Vec<SessionEvent> {
            self.events.try_iter().collect()
        }
    }

    fn options() -> SessionOptions {
        SessionOptions {
            flush_retries: 2,
            flush_interval: Duration::from_millis(1),
            addons: AddonOptions {
                gpu_acceleration: GpuAcceleration::Off,
                clipboard_osc52: false,
                decorations: false,
                ..AddonOptions::default()
            },
            ..SessionOptions::default()
        }
    }

    fn open_with(
        launch: LaunchConfig,
        size: InitialSize,
        options: SessionOptions,
        shared: SharedState,
        resolver: Box<dyn LaunchResolver>,
    ) -> Harness {
        let backend = FakeBackend::new();
        let terminal = FakeTerminal::new();
        let loader = ManualAddonLoader::new();
        let ctx = SessionContext {
            process: ProcessContext {
                backend: Box::new(backend.clone()),
                resolver,
            },
            render: RenderContext {
                terminal: Box::new(terminal.clone()),
                addon_loader: Box::new(loader.clone()),
            },
            shared,
            options,
        };
        let (session, events) = Session::open(1, launch, size, ctx);
        Harness {
            session,
            events,
            backend,
            terminal,
            loader,
        }
    }

    fn open_bash(options: SessionOptions) -> Harness {
        open_with(
            LaunchConfig::shell("bash"),
            InitialSize::Grid(Dimensions::new(80, 24)),
            options,
            SharedState::new(),
            Box::new(DefaultLaunchResolver::default()),
        )
    }

    fn running(options: SessionOptions) -> Harness {
        let mut h = open_bash(options);
        h.backend.ready(42);
        h.session.poll();
        h
    }

    #[test]
    fn test_open_to_running() {
        let mut h = open_bash(options());
        assert_eq!(h.session.state(), SessionState::Ready);
        assert_eq!(h.session.process_state(), ProcessState::Launching);
        assert_eq!(h.backend.spawned(), vec![("bash".to_string(), Dimensions::new(80, 24))]);
        assert_eq!(h.terminal.resizes(), vec![Dimensions::new(80, 24)]);

        h.backend.ready(42);
        assert!(h.session.poll());
        assert_eq!(h.session.process_state(), ProcessState::Running);
        assert!(h
            .drain()
            .contains(&SessionEvent::Ready(ReadyInfo { pid: 42, cwd: None })));
        assert_eq!(h.session.label(), "Bash");
    }

    #[test]
    fn test_debounced_resize_applies_last() {
        let mut h = running(options());
        let start = Instant::now();
        h.session
            .resize_at(ResizeRequest::Grid(Dimensions::new(100, 30)), false, start);
        h.session.resize_at(
            ResizeRequest::Grid(Dimensions::new(101, 30)),
            false,
            start + Duration::from_millis(10),
        );
        h.session.poll_at(start + Duration::from_millis(20));
        assert!(h.backend.resizes().is_empty());

        h.session.poll_at(start + Duration::from_millis(100));
        assert_eq!(h.backend.resizes(), vec![Dimensions::new(101, 30)]);
        // The VT core follows immediately
        assert_eq!(h.terminal.resizes().last(), Some(&Dimensions::new(101, 30)));
    }

    #[test]
    fn test_same_size_twice_resizes_once() {
        let mut h = running(options());
        h.session.resize_grid(Dimensions::new(90, 30), true);
        h.session.resize_grid(Dimensions::new(90, 30), true);
        assert_eq!(h.backend.resizes(), vec![Dimensions::new(90, 30)]);
    }

    #[test]
    fn test_invalid_container_is_noop() {
        let mut h = running(options());
        h.session.resize(ContainerSize::new(0.0, 0.0), true);
        h.session.resize(ContainerSize::new(-10.0, 50.0), true);
        assert_eq!(h.session.dimensions(), Dimensions::new(80, 24));
        assert!(h.backend.resizes().is_empty());
    }

    #[test]
    fn test_flush_on_visible() {
        let mut h = running(options());
        h.session.set_visible(false);
        h.session.resize_grid(Dimensions::new(120, 40), false);
        assert!(h.backend.resizes().is_empty());
        h.session.set_visible(true);
        assert_eq!(h.backend.resizes(), vec![Dimensions::new(120, 40)]);
    }

    #[test]
    fn test_fixed_dimensions_are_immediate() {
        let mut h = running(options());
        h.session
            .set_fixed_dimensions(Some(DimensionOverride::new(60, 20)));
        assert_eq!(h.session.dimensions(), Dimensions::new(60, 20));
        assert_eq!(h.backend.resizes(), vec![Dimensions::new(60, 20)]);
    }

    #[test]
    fn test_command_finished_updates_capability() {
        let mut h = running(options());
        h.backend.data(b"prompt$ \x1b]633;D;0\x07");
        h.session.poll();

        let commands = h.session.capabilities().get::<CommandDetection>();
        assert_eq!(commands.and_then(|c| c.last_exit_code()), Some(0));
        // Raw bytes reach the VT core unchanged
        assert_eq!(h.terminal.written(), b"prompt$ \x1b]633;D;0\x07".to_vec());
        let events = h.drain();
        assert!(events.contains(&SessionEvent::CapabilityAdded(CapabilityKind::CommandDetection)));
        assert!(events.contains(&SessionEvent::ShellIntegration(
            ShellIntegrationEvent::CommandFinished { exit_code: Some(0) }
        )));
    }

    #[test]
    fn test_command_cycle_and_label() {
        let mut h = running(options());
        h.backend
            .data(b"\x1b]633;A\x07$ \x1b]633;B\x07\x1b]633;E;make test\x07\x1b]633;C\x07");
        h.session.poll();
        assert_eq!(h.session.label(), "Bash - make test");
        let phase = h.session.capabilities().get::<CommandDetection>().map(|c| c.phase());
        assert_eq!(phase, Some(CommandPhase::Executing));

        h.backend.data(b"ok\r\n\x1b]633;D;2\x07\x1b]633;P;Cwd=/home/dev/proj\x07");
        h.session.poll();
        assert_eq!(h.session.label(), "Bash - proj");
        assert_eq!(h.session.cwd(), Some(PathBuf::from("/home/dev/proj")));
        assert!(!h.session.capabilities().has(CapabilityKind::NaiveCwdDetection));
        assert!(h
            .drain()
            .contains(&SessionEvent::TitleChanged("Bash - proj".to_string())));
    }

    #[test]
    fn test_user_title_wins() {
        let mut h = running(options());
        h.backend.title("vim");
        h.session.poll();
        assert_eq!(h.session.label(), "vim");
        h.session.set_title(Some("Editor".to_string()));
        assert_eq!(h.session.label(), "Editor");
        h.session.set_title(None);
        assert_eq!(h.session.label(), "vim");
    }

    #[test]
    fn test_exit_during_launch_reports_code() {
        let mut h = open_bash(options());
        h.backend.exit(Some(127));
        h.session.poll();
        assert_eq!(h.session.process_state(), ProcessState::KilledDuringLaunch);
        let exits: Vec<_> = h
            .drain()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Exited(info) => Some(info),
                _ => None,
            })
            .collect();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].reason, ExitReason::LaunchFailed);
        assert!(exits[0].message.as_deref().unwrap_or_default().contains("127"));
        assert!(h.session.is_disposed());
    }

    #[test]
    fn test_spawn_failure_is_exit_message() {
        let backend = FakeBackend::new();
        backend.fail_next_spawn("No such file or directory");
        let terminal = FakeTerminal::new();
        let ctx = SessionContext {
            process: ProcessContext {
                backend: Box::new(backend.clone()),
                resolver: Box::new(DefaultLaunchResolver::default()),
            },
            render: RenderContext {
                terminal: Box::new(terminal),
                addon_loader: Box::new(ManualAddonLoader::new()),
            },
            shared: SharedState::new(),
            options: options(),
        };
        let (session, events) = Session::open(
            7,
            LaunchConfig::shell("nope"),
            InitialSize::Unknown,
            ctx,
        );
        assert!(session.is_disposed());
        let exit = session.exit_info().cloned().expect("exit recorded");
        assert_eq!(exit.reason, ExitReason::LaunchFailed);
        assert_eq!(
            events
                .try_iter()
                .filter(|e| matches!(e, SessionEvent::Exited(_)))
                .count(),
            1
        );
    }

    #[test]
    fn test_untrusted_workspace() {
        let resolver = DefaultLaunchResolver {
            trusted: false,
            ..DefaultLaunchResolver::default()
        };
        let h = open_with(
            LaunchConfig::shell("bash"),
            InitialSize::Unknown,
            options(),
            SharedState::new(),
            Box::new(resolver),
        );
        assert!(h.backend.spawned().is_empty());
        assert_eq!(
            h.session.exit_info().and_then(|e| e.message.clone()).as_deref(),
            Some(UNTRUSTED_WORKSPACE_MESSAGE)
        );
    }

    #[test]
    fn test_dispose_fires_exit_once() {
        let mut h = running(options());
        h.session.dispose(ExitReason::Shutdown);
        h.session.dispose(ExitReason::Shutdown);
        h.backend.exit(Some(0));
        assert!(!h.session.poll());
        let exits = h
            .drain()
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::Exited(_)))
            .count();
        assert_eq!(exits, 1);
        assert_eq!(h.backend.shutdowns(), 1);
        assert!(h.terminal.is_disposed());
    }

    #[test]
    fn test_dispose_before_ready_and_mid_resolution() {
        let resolver = DeferredResolver::new();
        let mut h = open_with(
            LaunchConfig::shell("bash"),
            InitialSize::Unknown,
            options(),
            SharedState::new(),
            Box::new(resolver.clone()),
        );
        assert_eq!(h.session.state(), SessionState::Opening);
        h.session.dispose(ExitReason::Shutdown);
        // Resolution completes after dispose and is discarded
        assert!(!resolver.release_all());
        assert!(!h.session.poll());
        assert!(h.backend.spawned().is_empty());
        assert_eq!(
            h.drain()
                .into_iter()
                .filter(|e| matches!(e, SessionEvent::Exited(_)))
                .count(),
            1
        );
    }

    #[test]
    fn test_dispose_discards_pending_resize() {
        let mut h = running(options());
        let start = Instant::now();
        h.session
            .resize_at(ResizeRequest::Grid(Dimensions::new(100, 30)), false, start);
        h.session.dispose(ExitReason::Shutdown);
        h.session.poll_at(start + Duration::from_secs(1));
        assert!(h.backend.resizes().is_empty());
    }

    #[test]
    fn test_dispose_flushes_pending_writes() {
        let mut h = running(options());
        h.terminal.defer_acks(true);
        h.backend.data(b"tail of output");
        h.session.poll();
        assert_eq!(h.session.pending_writes(), 1);
        h.terminal.ack_all();
        h.session.dispose(ExitReason::Shutdown);
        assert_eq!(h.session.pending_writes(), 0);
    }

    #[test]
    fn test_dispose_with_stuck_writes_is_bounded() {
        let mut h = running(options());
        h.terminal.defer_acks(true);
        h.backend.data(b"never acknowledged");
        h.session.poll();
        h.session.dispose(ExitReason::Shutdown);
        assert!(h.session.is_disposed());
    }

    #[test]
    fn test_renderer_import_discarded_after_dispose() {
        let mut opts = options();
        opts.addons.gpu_acceleration = GpuAcceleration::Auto;
        let mut h = open_bash(opts);
        assert_eq!(h.loader.requested(), vec![AddonKind::Unicode, AddonKind::Renderer]);
        h.session.dispose(ExitReason::Shutdown);
        assert!(!h.loader.release(AddonKind::Renderer));
        assert!(!h.session.poll());
        assert!(h.session.addon::<AcceleratedRenderer>().is_none());
    }

    #[test]
    fn test_renderer_context_loss_falls_back() {
        let shared = SharedState::new();
        let mut opts = options();
        opts.addons.gpu_acceleration = GpuAcceleration::Auto;
        let mut h = open_with(
            LaunchConfig::shell("bash"),
            InitialSize::Grid(Dimensions::new(80, 24)),
            opts.clone(),
            shared.clone(),
            Box::new(DefaultLaunchResolver::default()),
        );
        assert!(h.loader.release(AddonKind::Renderer));
        h.session.poll();
        assert!(h.session.addon::<AcceleratedRenderer>().is_some());

        let resizes_before = h.terminal.resizes().len();
        h.session.renderer_context_lost();
        assert!(h.session.addon::<AcceleratedRenderer>().is_none());
        assert!(shared.renderer.is_set());
        assert_eq!(h.terminal.resizes().len(), resizes_before + 1);

        // A later session skips the renderer in auto mode
        let later = open_with(
            LaunchConfig::shell("bash"),
            InitialSize::Unknown,
            opts,
            shared,
            Box::new(DefaultLaunchResolver::default()),
        );
        assert_eq!(later.loader.requested(), vec![AddonKind::Unicode]);
    }

    #[test]
    fn test_addon_failure_does_not_break_session() {
        let mut opts = options();
        opts.addons.clipboard_osc52 = true;
        let mut h = running(opts);
        assert!(h.loader.fail(AddonKind::Clipboard, "no display"));
        assert!(h.session.poll());
        assert!(!h.session.addons().is_loaded(AddonKind::Clipboard));
        h.backend.data(b"still flowing");
        h.session.poll();
        assert_eq!(h.terminal.written(), b"still flowing".to_vec());
    }

    #[test]
    fn test_decorations_follow_commands() {
        let mut opts = options();
        opts.addons.decorations = true;
        let mut h = running(opts);
        h.loader.release(AddonKind::Decorations);
        h.loader.release(AddonKind::Unicode);
        h.session.poll();
        assert!(h.session.addon::<UnicodeAddon>().is_some());

        h.backend
            .data(b"\x1b]633;A\x07\x1b]633;B\x07\x1b]633;C\x07\x1b]633;D;1\x07");
        h.session.poll();
        let statuses: Vec<_> = h
            .session
            .addon::<DecorationsAddon>()
            .map(|d| d.decorations().map(|d| d.status).collect())
            .unwrap_or_default();
        assert_eq!(statuses, vec![DecorationStatus::Error]);
    }

    #[test]
    fn test_search_loads_lazily() {
        let mut h = running(options());
        h.terminal.set_lines(&["ls -la", "total 0"]);
        assert!(h.session.search("total", SearchOptions::default(), false).is_none());
        h.loader.release(AddonKind::Search);
        h.session.poll();
        let found = h.session.search("total", SearchOptions::default(), false);
        assert_eq!(found.map(|m| m.line), Some(1));
    }

    #[test]
    fn test_input_dropped_before_ready() {
        let mut h = open_bash(options());
        h.session.write(b"early");
        h.backend.ready(1);
        h.session.poll();
        h.session.write(b"late");
        assert_eq!(h.backend.written(), b"late".to_vec());
    }

    #[test]
    fn test_input_queued_until_ready() {
        let mut opts = options();
        opts.queue_input_until_ready = true;
        let mut h = open_bash(opts);
        h.session.send_text("echo hi", true);
        assert!(h.backend.written().is_empty());
        h.backend.ready(1);
        h.session.poll();
        assert_eq!(h.backend.written(), b"echo hi\r".to_vec());
    }

    #[test]
    fn test_keystrokes_from_terminal() {
        let mut h = running(options());
        h.terminal.type_input(b"ls\r");
        h.session.poll();
        assert_eq!(h.backend.written(), b"ls\r".to_vec());
    }

    #[test]
    fn test_user_kill() {
        let mut h = running(options());
        h.session.kill();
        assert_eq!(h.session.state(), SessionState::Exiting);
        h.backend.exit(Some(137));
        h.session.poll();
        assert_eq!(h.session.exit_info().map(|e| e.reason), Some(ExitReason::User));
        assert!(h.session.is_disposed());
    }

    fn exit_count(events: &[SessionEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Exited(_)))
            .count()
    }

    fn open_deferred(launch: LaunchConfig, options: SessionOptions) -> (Harness, DeferredResolver) {
        let resolver = DeferredResolver::new();
        let h = open_with(
            launch,
            InitialSize::Grid(Dimensions::new(80, 24)),
            options,
            SharedState::new(),
            Box::new(resolver.clone()),
        );
        (h, resolver)
    }

    #[test]
    fn test_kill_while_resolving_never_spawns() {
        let mut opts = options();
        opts.keep_open_on_exit = true;
        let (mut h, resolver) = open_deferred(LaunchConfig::shell("bash"), opts);

        h.session.kill();
        assert_eq!(h.session.state(), SessionState::Exiting);
        assert_eq!(h.session.exit_info().map(|e| e.reason), Some(ExitReason::User));

        // The resolution still arrives, but the session stays killed
        assert!(resolver.release_all());
        assert!(h.session.poll());
        assert!(h.backend.spawned().is_empty());
        assert_eq!(h.session.state(), SessionState::Exiting);
        assert_eq!(h.session.process_state(), ProcessState::Uninitialized);
        assert_eq!(exit_count(&h.drain()), 1);

        // Only relaunch brings it back
        h.session.relaunch(None);
        assert!(resolver.release_all());
        h.session.poll();
        assert_eq!(h.backend.spawned().len(), 1);
        assert_eq!(h.session.state(), SessionState::Ready);
        assert_eq!(h.session.process_state(), ProcessState::Launching);
    }

    #[test]
    fn test_relaunch_while_resolving_uses_latest() {
        let (mut h, resolver) = open_deferred(LaunchConfig::shell("bash"), options());
        h.session.relaunch(Some(LaunchConfig::shell("zsh")));

        // Both resolutions land; only the newer one launches
        assert!(resolver.release_all());
        h.session.poll();
        let spawned: Vec<String> = h.backend.spawned().into_iter().map(|(exe, _)| exe).collect();
        assert_eq!(spawned, vec!["zsh".to_string()]);
        assert_eq!(h.session.state(), SessionState::Ready);
        assert_eq!(h.session.launch_config().executable.as_deref(), Some("zsh"));
    }

    #[test]
    fn test_exit_then_dispose_notifies_once() {
        let mut opts = options();
        opts.keep_open_on_exit = true;
        let mut h = running(opts);
        h.backend.exit(Some(2));
        h.session.poll();
        assert_eq!(h.session.state(), SessionState::Exiting);

        h.session.dispose(ExitReason::Shutdown);
        assert!(h.session.is_disposed());
        assert_eq!(exit_count(&h.drain()), 1);
        let exit = h.session.exit_info().cloned().expect("exit recorded");
        assert_eq!(exit.reason, ExitReason::Process);
        assert_eq!(exit.code, Some(2));
    }

    #[test]
    fn test_relaunch_forgets_unacknowledged_output() {
        let mut opts = options();
        opts.keep_open_on_exit = true;
        opts.flow_control = FlowControl {
            high_watermark: 10,
            low_watermark: 4,
        };
        let mut h = running(opts);
        h.terminal.defer_acks(true);
        h.backend.data(b"old output");
        h.backend.exit(Some(0));
        h.session.poll();
        assert_eq!(h.session.pending_writes(), 1);

        h.session.relaunch(None);
        assert_eq!(h.session.pending_writes(), 0);
        h.backend.ready(43);
        h.backend.data(b"new-1234");
        h.session.poll();
        assert_eq!(h.session.pending_writes(), 1);

        // The stale ack must not offset the new process's output
        assert!(h.terminal.ack_oldest());
        h.backend.data(b"new-5678");
        h.session.poll();
        assert_eq!(h.backend.paused(), Some(true));
    }

    #[test]
    fn test_keep_open_and_relaunch() {
        let mut opts = options();
        opts.keep_open_on_exit = true;
        let mut h = running(opts);
        h.backend.data(b"\x1b]633;A\x07");
        h.backend.exit(Some(0));
        h.session.poll();
        assert_eq!(h.session.state(), SessionState::Exiting);
        assert_eq!(h.session.process_state(), ProcessState::KilledByProcess);

        h.session.relaunch(None);
        assert_eq!(h.session.state(), SessionState::Ready);
        assert_eq!(h.backend.spawned().len(), 2);
        assert!(!h.session.capabilities().has(CapabilityKind::CommandDetection));
        let events = h.drain();
        assert!(events.contains(&SessionEvent::CapabilityRemoved(CapabilityKind::CommandDetection)));

        // Events from the old process are ignored
        h.backend.ready_generation(1, 9);
        h.session.poll();
        assert_eq!(h.session.process_state(), ProcessState::Launching);
    }

    #[test]
    fn test_detach_and_reattach() {
        let mut h = running(options());
        h.backend.data(b"\x1b]633;A\x07\x1b]633;E;cargo build\x07\x1b]633;C\x07\x1b]633;D;0\x07");
        h.session.poll();
        let persistent = h.session.detach(true).expect("persisted");
        assert!(h.session.is_disposed());
        assert_eq!(h.backend.shutdowns(), 0);
        assert_eq!(persistent.dimensions, Dimensions::new(80, 24));
        assert_eq!(persistent.commands.as_ref().map(|c| c.commands.len()), Some(1));

        let launch = LaunchConfig {
            attach_persistent_process: Some(persistent.clone()),
            ..LaunchConfig::default()
        };
        let h2 = open_with(
            launch,
            InitialSize::Unknown,
            options(),
            SharedState::new(),
            Box::new(DefaultLaunchResolver::default()),
        );
        assert_eq!(h2.backend.attached(), vec![persistent.id]);
        assert_eq!(h2.session.dimensions(), Dimensions::new(80, 24));
        let restored = h2
            .session
            .capabilities()
            .get::<CommandDetection>()
            .and_then(|c| c.last_command().map(|c| c.command.clone()));
        assert_eq!(restored.as_deref(), Some("cargo build"));
    }

    #[test]
    fn test_disconnect_reconnect_events() {
        let mut h = running(options());
        h.backend.emit(ProcessEvent::Disconnected);
        h.backend.emit(ProcessEvent::Reconnected);
        h.session.poll();
        let events = h.drain();
        assert!(events.contains(&SessionEvent::Disconnected));
        assert!(events.contains(&SessionEvent::Reconnected));
        assert_eq!(h.session.process_state(), ProcessState::Running);
    }

    #[test]
    fn test_host_commands() {
        let mut h = running(options());
        h.session.set_icon("terminal-bash");
        h.session.set_icon("terminal-bash");
        h.session.set_color(Some("green".to_string()));
        h.session.focus();
        let events = h.drain();
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, SessionEvent::IconChanged(_)))
                .count(),
            1
        );
        assert!(events.contains(&SessionEvent::ColorChanged(Some("green".to_string()))));
        assert!(events.contains(&SessionEvent::FocusChanged(true)));
        h.session.run_command("git status");
        assert_eq!(h.backend.written(), b"git status\r".to_vec());
    }
}
