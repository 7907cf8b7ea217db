//! Clipboard bridging (OSC 52)
//!
//! Programs running in the terminal can set the system clipboard with
//! `ESC ] 52 ; <targets> ; <base64> BEL`. Clipboard reads (`?` payload) are
//! never answered.

use std::any::Any;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::{debug, warn};

use super::{Addon, AddonError, AddonKind};
use crate::core::shell_integration::OscScanner;

/// Upper bound for a decoded clipboard payload
const MAX_CLIPBOARD_BYTES: usize = 1024 * 1024;

/// Longest OSC 52 body: base64 of the payload plus the `52;c;` header
const MAX_OSC52_LEN: usize = MAX_CLIPBOARD_BYTES / 3 * 4 + 16;

/// Where clipboard text goes
pub trait ClipboardProvider: Send {
    fn set_text(&mut self, text: String) -> Result<(), AddonError>;

    fn get_text(&mut self) -> Result<String, AddonError>;
}

/// System clipboard via `arboard`
#[derive(Debug)]
pub struct ArboardClipboard;

impl ArboardClipboard {
    /// Probe the system clipboard once so a missing display fails the load.
    pub fn new() -> Result<Self, AddonError> {
        arboard::Clipboard::new().map_err(|e| AddonError::Load {
            kind: AddonKind::Clipboard,
            reason: e.to_string(),
        })?;
        Ok(Self)
    }

    fn open() -> Result<arboard::Clipboard, AddonError> {
        arboard::Clipboard::new().map_err(runtime)
    }
}

impl ClipboardProvider for ArboardClipboard {
    fn set_text(&mut self, text: String) -> Result<(), AddonError> {
        Self::open()?.set_text(text).map_err(runtime)
    }

    fn get_text(&mut self) -> Result<String, AddonError> {
        Self::open()?.get_text().map_err(runtime)
    }
}

fn runtime(e: arboard::Error) -> AddonError {
    AddonError::Runtime {
        kind: AddonKind::Clipboard,
        reason: e.to_string(),
    }
}

pub struct ClipboardAddon {
    provider: Box<dyn ClipboardProvider>,
    scanner: OscScanner,
    osc52: bool,
}

impl ClipboardAddon {
    pub fn new(provider: Box<dyn ClipboardProvider>) -> Self {
        Self {
            provider,
            scanner: OscScanner::with_max_len(MAX_OSC52_LEN),
            osc52: true,
        }
    }

    pub fn set_osc52_enabled(&mut self, enabled: bool) {
        self.osc52 = enabled;
        if !enabled {
            self.scanner.reset();
        }
    }

    pub fn copy(&mut self, text: &str) -> Result<(), AddonError> {
        self.provider.set_text(text.to_string())
    }

    pub fn paste(&mut self) -> Result<String, AddonError> {
        self.provider.get_text()
    }
}

/// Decode an OSC 52 body into the text to store
fn decode_osc52(body: &[u8]) -> Option<String> {
    let body = std::str::from_utf8(body).ok()?;
    let rest = body.strip_prefix("52;")?;
    let (_targets, payload) = rest.split_once(';')?;
    if payload == "?" {
        debug!("Ignoring OSC 52 clipboard read request");
        return None;
    }
    let bytes = STANDARD.decode(payload).ok()?;
    if bytes.len() > MAX_CLIPBOARD_BYTES {
        return None;
    }
    String::from_utf8(bytes).ok()
}

impl Addon for ClipboardAddon {
    fn kind(&self) -> AddonKind {
        AddonKind::Clipboard
    }

    fn on_output(&mut self, data: &[u8]) -> Result<(), AddonError> {
        if !self.osc52 {
            return Ok(());
        }
        let mut texts = Vec::new();
        self.scanner.feed(data, |body| {
            if let Some(text) = decode_osc52(body) {
                texts.push(text);
            }
        });
        for text in texts {
            debug!("OSC 52 set clipboard ({} bytes)", text.len());
            if let Err(e) = self.provider.set_text(text) {
                warn!("Clipboard write failed: {}", e);
            }
        }
        Ok(())
    }

    fn dispose(&mut self) {
        self.scanner.reset();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct MemoryClipboard(Arc<Mutex<Vec<String>>>);

    impl ClipboardProvider for MemoryClipboard {
        fn set_text(&mut self, text: String) -> Result<(), AddonError> {
            self.0.lock().unwrap().push(text);
            Ok(())
        }

        fn get_text(&mut self) -> Result<String, AddonError> {
            Ok(self.0.lock().unwrap().last().cloned().unwrap_or_default())
        }
    }

    #[test]
    fn test_osc52_sets_clipboard() {
        let memory = MemoryClipboard::default();
        let mut addon = ClipboardAddon::new(Box::new(memory.clone()));
        // "hello" split across two chunks
        addon.on_output(b"out\x1b]52;c;aGVs").unwrap();
        addon.on_output(b"bG8=\x07more").unwrap();
        assert_eq!(*memory.0.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_osc52_read_and_garbage_ignored() {
        let memory = MemoryClipboard::default();
        let mut addon = ClipboardAddon::new(Box::new(memory.clone()));
        addon.on_output(b"\x1b]52;c;?\x07\x1b]52;c;!!!\x07\x1b]0;title\x07").unwrap();
        assert!(memory.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_osc52_disabled() {
        let memory = MemoryClipboard::default();
        let mut addon = ClipboardAddon::new(Box::new(memory.clone()));
        addon.set_osc52_enabled(false);
        addon.on_output(b"\x1b]52;c;aGVsbG8=\x07").unwrap();
        assert!(memory.0.lock().unwrap().is_empty());
        addon.copy("manual").unwrap();
        assert_eq!(addon.paste().unwrap(), "manual");
    }
}
