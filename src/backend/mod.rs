//! Concrete process backends.
//!
//! - **conpty**: Windows pseudo console (Windows only)
//! - **pty**: Unix pseudo terminal via `portable-pty`

#[cfg(windows)]
pub mod conpty;
#[cfg(unix)]
pub mod pty;

#[cfg(windows)]
pub use conpty::ConPtyBackend;
#[cfg(unix)]
pub use pty::PortablePtyBackend;

use crate::core::process::PtyBackend;

/// Best backend for this platform
pub fn default_backend() -> Box<dyn PtyBackend> {
    #[cfg(windows)]
    {
        Box::new(ConPtyBackend::new())
    }
    #[cfg(unix)]
    {
        Box::new(PortablePtyBackend::new())
    }
}
