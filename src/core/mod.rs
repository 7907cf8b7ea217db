//! Session controller core.
//!
//! Everything here is free of OS calls; the process boundary is the
//! [`process::PtyBackend`] trait and the screen is the
//! [`terminal::VirtualTerminal`] trait.
//!
//! - **session**: one interactive shell session, its lifecycle and host commands
//! - **manager**: many sessions sharing process-wide state
//! - **process**: backing-process state machine, flow control, exit classification
//! - **dimensions** / **resize**: grid measurement and debounced resize
//! - **shell_integration**: observe-only OSC decoder with pluggable codecs
//! - **capabilities**: typed registry of what the shell has told us
//! - **addons**: optional features loaded asynchronously
//!
//! # Architecture
//!
//! ```text
//! SessionManager
//! └── Session
//!     ├── ProcessManager ── PtyBackend (ConPTY / pipes)
//!     ├── VirtualTerminal (external VT core)
//!     ├── ShellIntegrationDecoder ──> CapabilityRegistry
//!     ├── ResizeDebouncer
//!     └── AddonHost (search, clipboard, decorations, unicode, ligatures, renderer)
//! ```

pub mod addons;
pub mod cancel;
pub mod capabilities;
pub mod dimensions;
pub mod events;
pub mod launch;
pub mod manager;
pub mod process;
pub mod resize;
pub mod session;
pub mod shared;
pub mod shell_integration;
pub mod terminal;

#[cfg(test)]
pub(crate) mod testing;

pub use manager::{SessionId, SessionManager};
pub use session::{
    InitialSize, ProcessContext, RenderContext, ResizeRequest, Session, SessionContext, SessionEvent,
    SessionOptions, SessionState,
};
