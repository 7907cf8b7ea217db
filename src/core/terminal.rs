//! Virtual-terminal collaborator
//!
//! The character grid, cursor, scrollback and painting belong to an external
//! virtual-terminal core. The session only needs the narrow surface below.

use std::sync::mpsc::Sender;

use thiserror::Error;

use super::dimensions::{Dimensions, FontMetrics};
use super::session::SessionMessage;

#[derive(Error, Debug)]
pub enum TerminalError {
    #[error("Terminal write failed: {0}")]
    Write(String),

    #[error("Terminal has been disposed")]
    Disposed,
}

/// Acknowledgement handle for one output chunk.
///
/// The terminal must call [`WriteAck::complete`] once the chunk has been fully
/// parsed; the session uses it for flow control and flushing.
#[derive(Debug)]
pub struct WriteAck {
    id: u64,
    tx: Sender<SessionMessage>,
}

impl WriteAck {
    pub(crate) fn new(id: u64, tx: Sender<SessionMessage>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn complete(self) {
        let _ = self.tx.send(SessionMessage::WriteAcked(self.id));
    }
}

/// Where the terminal sends user keystrokes
#[derive(Debug, Clone)]
pub struct TerminalSink {
    tx: Sender<SessionMessage>,
}

impl TerminalSink {
    pub(crate) fn new(tx: Sender<SessionMessage>) -> Self {
        Self { tx }
    }

    /// Forward user input to the session.
    pub fn send_input(&self, data: &[u8]) -> bool {
        self.tx.send(SessionMessage::Input(data.to_vec())).is_ok()
    }
}

/// The external virtual-terminal core
pub trait VirtualTerminal {
    /// Hand over the sink for user keystrokes. Called once at session open.
    fn attach(&mut self, _sink: TerminalSink) {}

    /// Queue output for parsing; `ack` fires when parsing completes.
    fn write(&mut self, data: &[u8], ack: WriteAck) -> Result<(), TerminalError>;

    fn resize(&mut self, dims: Dimensions);

    fn font(&self) -> FontMetrics;

    fn focus(&mut self);

    fn has_focus(&self) -> bool;

    /// Absolute line of the cursor (scrollback + viewport row)
    fn cursor_line(&self) -> usize {
        0
    }

    /// Number of lines in scrollback plus viewport
    fn line_count(&self) -> usize {
        0
    }

    /// Plain text of one buffer line
    fn line_text(&self, _line: usize) -> Option<String> {
        None
    }

    fn clear(&mut self) {}

    fn select_all(&mut self) {}

    fn selection(&self) -> Option<String> {
        None
    }

    fn clear_selection(&mut self) {}

    fn scroll_lines(&mut self, _delta: i32) {}

    fn scroll_to_bottom(&mut self) {}

    /// Release resources. The terminal is not used afterwards.
    fn dispose(&mut self) {}
}
