//! Shell integration
//!
//! Shells that opt in report prompt and command boundaries, command lines,
//! exit codes and the working directory through invisible OSC sequences.
//!
//! - **scanner**: chunk-safe OSC framing with carry-over state
//! - **codec**: pluggable wire formats (633, 133, OSC 7 / 1337 cwd)
//! - **decoder**: scanner + codecs, producing [`ShellIntegrationEvent`]s

pub mod codec;
pub mod decoder;
pub mod scanner;

use std::path::PathBuf;

pub use codec::{default_codecs, CwdReportCodec, Osc133Codec, Osc633Codec, ShellIntegrationCodec};
pub use decoder::ShellIntegrationDecoder;
pub use scanner::OscScanner;

/// Structured event decoded from the output stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellIntegrationEvent {
    /// The shell started drawing a prompt
    PromptStart,
    /// The prompt ended; user input follows
    CommandStart,
    /// The user's command started running
    CommandExecuted,
    /// The command finished. `None` when the shell did not report a usable code.
    CommandFinished { exit_code: Option<i32> },
    /// The command line about to run
    CommandLine(String),
    CwdChanged(PathBuf),
    /// A named or anonymous buffer mark at the cursor
    SetMark { id: Option<String>, hidden: bool },
    /// Any other `key=value` the shell reports about itself
    Property { key: String, value: String },
}

impl ShellIntegrationEvent {
    /// Events that drive command detection
    pub fn is_command_marker(&self) -> bool {
        matches!(
            self,
            Self::PromptStart
                | Self::CommandStart
                | Self::CommandExecuted
                | Self::CommandFinished { .. }
                | Self::CommandLine(_)
        )
    }
}
