//! Key mapping for the demo host
//!
//! Encodes crossterm key events as the byte sequences a shell expects, and
//! recognizes the prefix-key chords (`Ctrl+B` then a key) that drive session
//! commands instead of reaching the process.

use bitflags::bitflags;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

bitflags! {
    /// Modifier keys
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const CTRL  = 0b0010;
        const ALT   = 0b0100;
    }
}

impl From<KeyModifiers> for Modifiers {
    fn from(mods: KeyModifiers) -> Self {
        let mut result = Modifiers::empty();
        if mods.contains(KeyModifiers::SHIFT) {
            result |= Modifiers::SHIFT;
        }
        if mods.contains(KeyModifiers::CONTROL) {
            result |= Modifiers::CTRL;
        }
        if mods.contains(KeyModifiers::ALT) {
            result |= Modifiers::ALT;
        }
        result
    }
}

/// Input modes the running program has switched on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyModes {
    /// DECCKM: arrows send `ESC O x`
    pub application_cursor: bool,
    /// LNM: Enter sends CR LF
    pub linefeed_newline: bool,
}

impl KeyModes {
    /// Track `CSI ? 1 h/l` and `CSI 20 h/l` in process output.
    pub fn observe(&mut self, data: &[u8]) {
        for i in 0..data.len() {
            if !data[i..].starts_with(b"\x1b[") {
                continue;
            }
            let rest = &data[i + 2..];
            if rest.starts_with(b"?1h") {
                self.application_cursor = true;
            } else if rest.starts_with(b"?1l") {
                self.application_cursor = false;
            } else if rest.starts_with(b"20h") {
                self.linefeed_newline = true;
            } else if rest.starts_with(b"20l") {
                self.linefeed_newline = false;
            }
        }
    }
}

/// Session commands reachable through the prefix key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    /// Bytes for the process
    Send,
    /// Swallowed (prefix pressed, waiting for the command key)
    Pending,
    Quit,
    Kill,
    Relaunch,
    Detach,
    Copy,
    Paste,
    Clear,
    ScrollUp,
    ScrollDown,
}

/// Prefix key state machine (`Ctrl+B`, like tmux)
#[derive(Debug, Default)]
pub struct PrefixKeys {
    armed: bool,
}

impl PrefixKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn handle(&mut self, event: &KeyEvent) -> KeyAction {
        let is_prefix = event.code == KeyCode::Char('b') && event.modifiers.contains(KeyModifiers::CONTROL);
        if !self.armed {
            if is_prefix {
                self.armed = true;
                return KeyAction::Pending;
            }
            return KeyAction::Send;
        }

        self.armed = false;
        if is_prefix {
            // Prefix twice sends a literal Ctrl+B
            return KeyAction::Send;
        }
        match event.code {
            KeyCode::Char('q') => KeyAction::Quit,
            KeyCode::Char('k') => KeyAction::Kill,
            KeyCode::Char('r') => KeyAction::Relaunch,
            KeyCode::Char('d') => KeyAction::Detach,
            KeyCode::Char('c') => KeyAction::Copy,
            KeyCode::Char('v') | KeyCode::Char(']') => KeyAction::Paste,
            KeyCode::Char('l') => KeyAction::Clear,
            KeyCode::PageUp => KeyAction::ScrollUp,
            KeyCode::PageDown => KeyAction::ScrollDown,
            _ => KeyAction::Pending,
        }
    }
}

/// Encode a key event for the process. `None` for keys with no encoding.
pub fn encode_key(event: &KeyEvent, modes: KeyModes) -> Option<Vec<u8>> {
    let mods = Modifiers::from(event.modifiers);

    match event.code {
        KeyCode::Char(ch) => Some(encode_char(ch, mods)),
        KeyCode::Enter if modes.linefeed_newline => Some(b"\r\n".to_vec()),
        KeyCode::Enter => Some(b"\r".to_vec()),
        KeyCode::Backspace if mods.contains(Modifiers::ALT) => Some(b"\x1b\x7f".to_vec()),
        KeyCode::Backspace => Some(vec![0x7F]),
        KeyCode::BackTab => Some(b"\x1b[Z".to_vec()),
        KeyCode::Tab if mods.contains(Modifiers::SHIFT) => Some(b"\x1b[Z".to_vec()),
        KeyCode::Tab => Some(b"\t".to_vec()),
        KeyCode::Esc => Some(vec![0x1B]),

        KeyCode::Up => Some(cursor_key(b'A', mods, modes)),
        KeyCode::Down => Some(cursor_key(b'B', mods, modes)),
        KeyCode::Right => Some(cursor_key(b'C', mods, modes)),
        KeyCode::Left => Some(cursor_key(b'D', mods, modes)),
        KeyCode::Home => Some(cursor_key(b'H', mods, modes)),
        KeyCode::End => Some(cursor_key(b'F', mods, modes)),

        KeyCode::Insert => Some(tilde_key(2, mods)),
        KeyCode::Delete => Some(tilde_key(3, mods)),
        KeyCode::PageUp => Some(tilde_key(5, mods)),
        KeyCode::PageDown => Some(tilde_key(6, mods)),
        KeyCode::F(n) => function_key(n, mods),

        _ => None,
    }
}

fn encode_char(ch: char, mods: Modifiers) -> Vec<u8> {
    if mods.contains(Modifiers::CTRL) {
        if let Some(code) = control_code(ch) {
            return if mods.contains(Modifiers::ALT) {
                vec![0x1B, code]
            } else {
                vec![code]
            };
        }
    }

    let mut bytes = Vec::with_capacity(5);
    if mods.contains(Modifiers::ALT) {
        bytes.push(0x1B);
    }
    let mut buf = [0u8; 4];
    bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
    bytes
}

/// C0 code for Ctrl+`ch`
fn control_code(ch: char) -> Option<u8> {
    match ch {
        'a'..='z' => Some(ch as u8 - b'a' + 1),
        'A'..='Z' => Some(ch as u8 - b'A' + 1),
        '@' | '`' | ' ' | '2' => Some(0x00),
        '[' | '3' => Some(0x1B),
        '\\' | '4' => Some(0x1C),
        ']' | '5' => Some(0x1D),
        '^' | '~' | '6' => Some(0x1E),
        '_' | '?' | '/' | '7' => Some(0x1F),
        _ => None,
    }
}

/// xterm modifier parameter
fn modifier_param(mods: Modifiers) -> u8 {
    let mut param = 1;
    if mods.contains(Modifiers::SHIFT) {
        param += 1;
    }
    if mods.contains(Modifiers::ALT) {
        param += 2;
    }
    if mods.contains(Modifiers::CTRL) {
        param += 4;
    }
    param
}

fn cursor_key(key: u8, mods: Modifiers, modes: KeyModes) -> Vec<u8> {
    if !mods.is_empty() {
        format!("\x1b[1;{}{}", modifier_param(mods), key as char).into_bytes()
    } else if modes.application_cursor {
        vec![0x1B, b'O', key]
    } else {
        vec![0x1B, b'[', key]
    }
}

fn tilde_key(code: u8, mods: Modifiers) -> Vec<u8> {
    if mods.is_empty() {
        format!("\x1b[{}~", code).into_bytes()
    } else {
        format!("\x1b[{};{}~", code, modifier_param(mods)).into_bytes()
    }
}

fn function_key(n: u8, mods: Modifiers) -> Option<Vec<u8>> {
    // F1-F4 are SS3 letters, the rest tilde codes
    let ss3 = match n {
        1 => Some(b'P'),
        2 => Some(b'Q'),
        3 => Some(b'R'),
        4 => Some(b'S'),
        _ => None,
    };
    if let Some(key) = ss3 {
        return Some(if mods.is_empty() {
            vec![0x1B, b'O', key]
        } else {
            format!("\x1b[1;{}{}", modifier_param(mods), key as char).into_bytes()
        });
    }
    let code = match n {
        5 => 15,
        6..=10 => n + 11,
        11 | 12 => n + 12,
        _ => return None,
    };
    Some(tilde_key(code, mods))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode, mods: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, mods)
    }

    #[test]
    fn test_chars_and_controls() {
        let modes = KeyModes::default();
        assert_eq!(encode_key(&key(KeyCode::Char('a'), KeyModifiers::NONE), modes), Some(b"a".to_vec()));
        assert_eq!(encode_key(&key(KeyCode::Char('c'), KeyModifiers::CONTROL), modes), Some(vec![0x03]));
        assert_eq!(encode_key(&key(KeyCode::Char('x'), KeyModifiers::ALT), modes), Some(b"\x1bx".to_vec()));
        assert_eq!(encode_key(&key(KeyCode::Char('é'), KeyModifiers::NONE), modes), Some("é".as_bytes().to_vec()));
    }

    #[test]
    fn test_cursor_keys_follow_mode() {
        let mut modes = KeyModes::default();
        let up = key(KeyCode::Up, KeyModifiers::NONE);
        assert_eq!(encode_key(&up, modes), Some(b"\x1b[A".to_vec()));
        modes.observe(b"\x1b[?1h");
        assert_eq!(encode_key(&up, modes), Some(b"\x1bOA".to_vec()));
        assert_eq!(
            encode_key(&key(KeyCode::Up, KeyModifiers::CONTROL), modes),
            Some(b"\x1b[1;5A".to_vec())
        );
        modes.observe(b"text\x1b[?1l");
        assert!(!modes.application_cursor);
    }

    #[test]
    fn test_function_keys() {
        let modes = KeyModes::default();
        assert_eq!(encode_key(&key(KeyCode::F(1), KeyModifiers::NONE), modes), Some(b"\x1bOP".to_vec()));
        assert_eq!(encode_key(&key(KeyCode::F(5), KeyModifiers::NONE), modes), Some(b"\x1b[15~".to_vec()));
        assert_eq!(encode_key(&key(KeyCode::F(12), KeyModifiers::SHIFT), modes), Some(b"\x1b[24;2~".to_vec()));
        assert_eq!(encode_key(&key(KeyCode::F(20), KeyModifiers::NONE), modes), None);
    }

    #[test]
    fn test_prefix_chords() {
        let mut prefix = PrefixKeys::new();
        let ctrl_b = key(KeyCode::Char('b'), KeyModifiers::CONTROL);
        assert_eq!(prefix.handle(&key(KeyCode::Char('k'), KeyModifiers::NONE)), KeyAction::Send);
        assert_eq!(prefix.handle(&ctrl_b), KeyAction::Pending);
        assert_eq!(prefix.handle(&key(KeyCode::Char('k'), KeyModifiers::NONE)), KeyAction::Kill);
        assert_eq!(prefix.handle(&ctrl_b), KeyAction::Pending);
        assert_eq!(prefix.handle(&ctrl_b), KeyAction::Send);
        assert!(!prefix.is_armed());
    }
}
