//! Passthrough virtual terminal
//!
//! Used by the demo binary: the host terminal does the actual emulation, so
//! output is forwarded to it untouched. A plain-text copy of the output is
//! kept for search and selection.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::keymapper::KeyModes;
use crate::core::addons::printable_text;
use crate::core::dimensions::{Dimensions, FontMetrics};
use crate::core::terminal::{TerminalError, TerminalSink, VirtualTerminal, WriteAck};

/// Lines of plain text kept for search
pub const SCROLLBACK_LINES: usize = 10_000;

/// Host keystrokes on their way to the session
#[derive(Debug, Clone, Default)]
pub struct PassthroughInput {
    sink: Arc<Mutex<Option<TerminalSink>>>,
}

impl PassthroughInput {
    /// Returns false before the session attached or after it went away.
    pub fn send(&self, data: &[u8]) -> bool {
        match self.sink.lock() {
            Ok(sink) => sink.as_ref().map(|s| s.send_input(data)).unwrap_or(false),
            Err(_) => false,
        }
    }

    fn set(&self, sink: Option<TerminalSink>) {
        if let Ok(mut slot) = self.sink.lock() {
            *slot = sink;
        }
    }
}

pub struct PassthroughTerminal<W: Write> {
    out: W,
    font: FontMetrics,
    dims: Dimensions,
    focused: bool,
    lines: VecDeque<String>,
    selection: Option<String>,
    modes: Arc<Mutex<KeyModes>>,
    input: PassthroughInput,
    disposed: bool,
}

impl<W: Write> PassthroughTerminal<W> {
    pub fn new(out: W, font: FontMetrics) -> Self {
        Self {
            out,
            font,
            dims: Dimensions::default(),
            focused: false,
            lines: VecDeque::from([String::new()]),
            selection: None,
            modes: Arc::new(Mutex::new(KeyModes::default())),
            input: PassthroughInput::default(),
            disposed: false,
        }
    }

    /// Input modes seen in the output, shared with the key encoder
    pub fn modes(&self) -> Arc<Mutex<KeyModes>> {
        self.modes.clone()
    }

    pub fn input(&self) -> PassthroughInput {
        self.input.clone()
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dims
    }

    fn append_text(&mut self, text: &str) {
        let mut parts = text.split('\n');
        if let Some(first) = parts.next() {
            if let Some(last) = self.lines.back_mut() {
                last.push_str(first);
            }
        }
        for part in parts {
            self.lines.push_back(part.to_string());
        }
        while self.lines.len() > SCROLLBACK_LINES {
            self.lines.pop_front();
        }
    }
}

impl<W: Write> VirtualTerminal for PassthroughTerminal<W> {
    fn attach(&mut self, sink: TerminalSink) {
        self.input.set(Some(sink));
    }

    fn write(&mut self, data: &[u8], ack: WriteAck) -> Result<(), TerminalError> {
        if self.disposed {
            return Err(TerminalError::Disposed);
        }
        self.out
            .write_all(data)
            .and_then(|_| self.out.flush())
            .map_err(|e| TerminalError::Write(e.to_string()))?;

        if let Ok(mut modes) = self.modes.lock() {
            modes.observe(data);
        }
        self.append_text(&printable_text(data));
        ack.complete();
        Ok(())
    }

    fn resize(&mut self, dims: Dimensions) {
        self.dims = dims;
    }

    fn font(&self) -> FontMetrics {
        self.font
    }

    fn focus(&mut self) {
        self.focused = true;
    }

    fn has_focus(&self) -> bool {
        self.focused
    }

    fn cursor_line(&self) -> usize {
        self.lines.len().saturating_sub(1)
    }

    fn line_count(&self) -> usize {
        self.lines.len()
    }

    fn line_text(&self, line: usize) -> Option<String> {
        self.lines.get(line).cloned()
    }

    fn clear(&mut self) {
        let _ = self.out.write_all(b"\x1b[2J\x1b[3J\x1b[H");
        let _ = self.out.flush();
        self.lines = VecDeque::from([String::new()]);
    }

    fn select_all(&mut self) {
        let text = self.lines.iter().cloned().collect::<Vec<_>>().join("\n");
        self.selection = Some(text.trim_end().to_string()).filter(|t| !t.is_empty());
    }

    fn selection(&self) -> Option<String> {
        self.selection.clone()
    }

    fn clear_selection(&mut self) {
        self.selection = None;
    }

    fn scroll_lines(&mut self, delta: i32) {
        // The host terminal owns its scrollback
        debug!("Ignoring scroll by {} lines", delta);
    }

    fn dispose(&mut self) {
        self.disposed = true;
        self.input.set(None);
        let _ = self.out.flush();
    }
}
