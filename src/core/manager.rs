//! Session Manager - owns every session of one host process

use std::collections::HashMap;
use std::sync::mpsc::Receiver;
use std::time::Instant;

use tracing::{debug, info};

use super::dimensions::Dimensions;
use super::launch::LaunchConfig;
use super::process::ExitReason;
use super::session::{InitialSize, ProcessContext, RenderContext, Session, SessionContext, SessionEvent, SessionOptions};
use super::shared::SharedState;

pub type SessionId = u64;

/// Session Manager - allocates ids, shares process-wide state, tracks the
/// active session
pub struct SessionManager {
    /// All sessions
    sessions: HashMap<SessionId, Session>,
    /// Creation order (for next/previous)
    order: Vec<SessionId>,
    /// Currently active session
    active: Option<SessionId>,
    /// Last active session (for toggle)
    last_active: Option<SessionId>,
    /// Next session ID
    next_id: SessionId,
    /// Shared with every session
    shared: SharedState,
    /// Options for new sessions
    pub options: SessionOptions,
}

impl SessionManager {
    /// Create an empty manager
    pub fn new(options: SessionOptions) -> Self {
        Self {
            sessions: HashMap::new(),
            order: Vec::new(),
            active: None,
            last_active: None,
            next_id: 1,
            shared: SharedState::new(),
            options,
        }
    }

    pub fn shared(&self) -> &SharedState {
        &self.shared
    }

    /// Open a new session and make it active
    pub fn create_session(
        &mut self,
        launch: LaunchConfig,
        size: InitialSize,
        process: ProcessContext,
        render: RenderContext,
    ) -> (SessionId, Receiver<SessionEvent>) {
        let id = self.next_id;
        self.next_id += 1;

        let ctx = SessionContext {
            process,
            render,
            shared: self.shared.clone(),
            options: self.options.clone(),
        };
        let (session, events) = Session::open(id, launch, size, ctx);
        info!("Created session {}", id);

        self.sessions.insert(id, session);
        self.order.push(id);
        self.set_active(id);
        (id, events)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Session ids in creation order
    pub fn ids(&self) -> &[SessionId] {
        &self.order
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn active_id(&self) -> Option<SessionId> {
        self.active
    }

    /// Get the active session
    pub fn active(&self) -> Option<&Session> {
        self.sessions.get(&self.active?)
    }

    /// Get the active session mutably
    pub fn active_mut(&mut self) -> Option<&mut Session> {
        self.sessions.get_mut(&self.active?)
    }

    /// Make `id` the visible session. Its pending resize is applied at once.
    pub fn set_active(&mut self, id: SessionId) -> bool {
        if !self.sessions.contains_key(&id) {
            return false;
        }
        if self.active == Some(id) {
            return true;
        }
        if let Some(previous) = self.active.and_then(|p| self.sessions.get_mut(&p)) {
            previous.set_visible(false);
        }
        self.last_active = self.active;
        self.active = Some(id);
        if let Some(session) = self.sessions.get_mut(&id) {
            session.set_visible(true);
        }
        debug!("Active session: {}", id);
        true
    }

    /// Switch to next session
    pub fn next_session(&mut self) {
        if let Some(pos) = self.active_position() {
            let next = self.order[(pos + 1) % self.order.len()];
            self.set_active(next);
        }
    }

    /// Switch to previous session
    pub fn prev_session(&mut self) {
        if let Some(pos) = self.active_position() {
            let prev = if pos == 0 { self.order.len() - 1 } else { pos - 1 };
            self.set_active(self.order[prev]);
        }
    }

    /// Switch to last active session
    pub fn last_session(&mut self) {
        if let Some(last) = self.last_active {
            self.set_active(last);
        }
    }

    fn active_position(&self) -> Option<usize> {
        let active = self.active?;
        self.order.iter().position(|&id| id == active)
    }

    /// Resize every session to the same grid. Hidden sessions debounce; the
    /// active one applies immediately.
    pub fn resize_all(&mut self, dims: Dimensions) {
        let active = self.active;
        for (id, session) in self.sessions.iter_mut() {
            session.resize_grid(dims, Some(*id) == active);
        }
    }

    /// Dispose and forget a session
    pub fn close(&mut self, id: SessionId) -> bool {
        let Some(mut session) = self.sessions.remove(&id) else {
            return false;
        };
        session.dispose(ExitReason::Shutdown);
        self.forget(id);
        true
    }

    fn forget(&mut self, id: SessionId) {
        self.order.retain(|&s| s != id);
        if self.last_active == Some(id) {
            self.last_active = None;
        }
        if self.active == Some(id) {
            self.active = None;
            if let Some(&next) = self.order.last() {
                self.set_active(next);
            }
        }
    }

    /// Poll every session and drop the disposed ones. Returns the ids removed.
    pub fn poll_all(&mut self) -> Vec<SessionId> {
        self.poll_all_at(Instant::now())
    }

    pub fn poll_all_at(&mut self, now: Instant) -> Vec<SessionId> {
        let mut removed = Vec::new();
        for (id, session) in self.sessions.iter_mut() {
            if !session.poll_at(now) {
                removed.push(*id);
            }
        }
        removed.sort_unstable();
        for id in &removed {
            self.sessions.remove(id);
            self.forget(*id);
            info!("Session {} removed", id);
        }
        removed
    }

    /// Earliest time any session needs polling without new input
    pub fn next_deadline(&self) -> Option<Instant> {
        self.sessions.values().filter_map(Session::next_deadline).min()
    }

    /// Dispose every session
    pub fn dispose_all(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            session.dispose(ExitReason::Shutdown);
        }
        self.order.clear();
        self.active = None;
        self.last_active = None;
    }
}
