//! Host-terminal adapters for the demo binary.
//!
//! - **passthrough**: `VirtualTerminal` that forwards output to the host terminal
//! - **keymapper**: key events to process input, plus prefix-key session commands

pub mod keymapper;
pub mod passthrough;

pub use keymapper::{encode_key, KeyAction, KeyModes, PrefixKeys};
pub use passthrough::{PassthroughInput, PassthroughTerminal};
