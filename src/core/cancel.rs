//! Cancellation tied to session disposal
//!
//! Every asynchronous operation a session starts (launch resolution, process
//! events, addon loads, write acknowledgements) reports back through a
//! [`Reply`] bound to the session's message channel and its
//! [`CancellationToken`]. Once the session is disposed the token is cancelled
//! and late replies are dropped instead of being applied.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use super::session::SessionMessage;

/// Shared cancellation flag
#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the token cancelled. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// One-shot continuation handle for an in-flight asynchronous operation.
///
/// Consuming the reply posts the result to the owning session. Replies sent
/// after cancellation are silently discarded.
pub struct Reply<T> {
    tx: Sender<SessionMessage>,
    token: CancellationToken,
    wrap: Box<dyn FnOnce(T) -> SessionMessage + Send>,
}

impl<T> Reply<T> {
    pub(crate) fn new(
        tx: Sender<SessionMessage>,
        token: CancellationToken,
        wrap: impl FnOnce(T) -> SessionMessage + Send + 'static,
    ) -> Self {
        Self {
            tx,
            token,
            wrap: Box::new(wrap),
        }
    }

    /// Deliver the result. Returns false when the session is gone.
    pub fn send(self, value: T) -> bool {
        if self.token.is_cancelled() {
            return false;
        }
        self.tx.send((self.wrap)(value)).is_ok()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl<T> fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply").field("token", &self.token).finish()
    }
}
