//! Resize debouncer
//!
//! Drag-resizing produces a storm of size changes. The debouncer coalesces
//! them so the backing process sees one resize per quiet period, with the last
//! request always winning. A continuous storm still applies a resize once the
//! first pending request is `max_wait` old. Time is passed in explicitly; the
//! owner polls.

use std::time::{Duration, Instant};

use tracing::debug;

use super::dimensions::Dimensions;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

/// Longest a pending resize waits, as a multiple of the debounce window
const MAX_WAIT_FACTOR: u32 = 4;

#[derive(Debug, Clone, Copy)]
struct PendingResize {
    dims: Dimensions,
    deadline: Instant,
    /// When the oldest unapplied request arrived
    since: Instant,
}

/// Coalesces resize requests into process resizes
#[derive(Debug)]
pub struct ResizeDebouncer {
    window: Duration,
    max_wait: Duration,
    pending: Option<PendingResize>,
    /// Last size handed to the process
    applied: Option<Dimensions>,
    cancelled: bool,
}

impl ResizeDebouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            max_wait: window * MAX_WAIT_FACTOR,
            pending: None,
            applied: None,
            cancelled: false,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait.max(self.window);
        self
    }

    /// Record the size the process was created with so an identical request
    /// does not turn into a resize call.
    pub fn set_applied(&mut self, dims: Dimensions) {
        self.applied = Some(dims);
    }

    pub fn applied(&self) -> Option<Dimensions> {
        self.applied
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Submit a resize. Returns the size to apply right now, if any.
    pub fn request(&mut self, dims: Dimensions, immediate: bool, now: Instant) -> Option<Dimensions> {
        if self.cancelled {
            return None;
        }
        if immediate {
            self.pending = None;
            return self.commit(dims);
        }
        if self.pending.is_none() && self.applied == Some(dims) {
            return None;
        }
        let since = self.pending.map_or(now, |p| p.since);
        self.pending = Some(PendingResize {
            dims,
            deadline: (now + self.window).min(since + self.max_wait),
            since,
        });
        None
    }

    /// Release the pending resize once its quiet period has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<Dimensions> {
        match self.pending {
            Some(pending) if !self.cancelled && now >= pending.deadline => {
                self.pending = None;
                self.commit(pending.dims)
            }
            _ => None,
        }
    }

    /// Apply any pending resize without waiting.
    pub fn flush(&mut self) -> Option<Dimensions> {
        if self.cancelled {
            return None;
        }
        let pending = self.pending.take()?;
        self.commit(pending.dims)
    }

    /// When the pending resize is due, if any
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|p| p.deadline)
    }

    /// Drop anything pending and refuse further work.
    pub fn cancel(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!("Discarding pending resize to {}", pending.dims);
        }
        self.cancelled = true;
    }

    /// Accept requests again after a relaunch.
    pub fn reset(&mut self) {
        self.pending = None;
        self.applied = None;
        self.cancelled = false;
    }

    fn commit(&mut self, dims: Dimensions) -> Option<Dimensions> {
        if self.applied == Some(dims) {
            return None;
        }
        self.applied = Some(dims);
        Some(dims)
    }
}

impl Default for ResizeDebouncer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}
