//! Streaming OSC scanner
//!
//! Finds `ESC ] <body> BEL` and `ESC ] <body> ESC \` sequences in a byte
//! stream that arrives in arbitrary chunks. Partial sequences are carried over
//! to the next chunk. Anything that does not terminate cleanly is abandoned
//! without producing a body.

use tracing::debug;

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;
const CAN: u8 = 0x18;
const SUB: u8 = 0x1a;

/// Longest OSC body kept before the sequence is abandoned
pub const MAX_OSC_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Ground,
    Escape,
    Body,
    /// ESC seen inside a body, expecting `\`
    BodyEscape,
    /// Body overflowed; skip to the terminator
    Overflow,
    OverflowEscape,
}

/// Single-threaded accumulator for OSC bodies
#[derive(Debug)]
pub struct OscScanner {
    state: ScanState,
    body: Vec<u8>,
    max_len: usize,
}

impl Default for OscScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl OscScanner {
    pub fn new() -> Self {
        Self::with_max_len(MAX_OSC_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            state: ScanState::Ground,
            body: Vec::new(),
            max_len,
        }
    }

    /// True while a sequence is open across a chunk boundary
    pub fn in_sequence(&self) -> bool {
        self.state != ScanState::Ground
    }

    /// Forget any partially accumulated sequence.
    pub fn reset(&mut self) {
        self.state = ScanState::Ground;
        self.body.clear();
    }

    /// Scan `chunk`, calling `on_osc` with each complete body in order.
    pub fn feed(&mut self, chunk: &[u8], mut on_osc: impl FnMut(&[u8])) {
        for &byte in chunk {
            self.state = match self.state {
                ScanState::Ground => {
                    if byte == ESC {
                        ScanState::Escape
                    } else {
                        ScanState::Ground
                    }
                }
                ScanState::Escape => match byte {
                    b']' => {
                        self.body.clear();
                        ScanState::Body
                    }
                    ESC => ScanState::Escape,
                    _ => ScanState::Ground,
                },
                ScanState::Body => match byte {
                    BEL => {
                        on_osc(&self.body);
                        self.body.clear();
                        ScanState::Ground
                    }
                    ESC => ScanState::BodyEscape,
                    CAN | SUB => self.abandon("cancelled"),
                    _ if self.body.len() >= self.max_len => {
                        debug!("OSC body exceeded {} bytes, skipping", self.max_len);
                        self.body.clear();
                        ScanState::Overflow
                    }
                    _ => {
                        self.body.push(byte);
                        ScanState::Body
                    }
                },
                ScanState::BodyEscape => match byte {
                    b'\\' => {
                        on_osc(&self.body);
                        self.body.clear();
                        ScanState::Ground
                    }
                    b']' => {
                        // A new sequence interrupts the unterminated one
                        self.abandon("interrupted");
                        ScanState::Body
                    }
                    ESC => {
                        self.abandon("interrupted");
                        ScanState::Escape
                    }
                    _ => self.abandon("interrupted"),
                },
                ScanState::Overflow => match byte {
                    BEL | CAN | SUB => ScanState::Ground,
                    ESC => ScanState::OverflowEscape,
                    _ => ScanState::Overflow,
                },
                ScanState::OverflowEscape => match byte {
                    b'\\' => ScanState::Ground,
                    b']' => ScanState::Body,
                    ESC => ScanState::Escape,
                    _ => ScanState::Ground,
                },
            };
        }
    }

    fn abandon(&mut self, why: &str) -> ScanState {
        debug!("Abandoning OSC sequence ({}, {} bytes)", why, self.body.len());
        self.body.clear();
        ScanState::Ground
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(scanner: &mut OscScanner, chunk: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        scanner.feed(chunk, |body| out.push(String::from_utf8_lossy(body).into_owned()));
        out
    }

    #[test]
    fn test_bel_and_st_terminators() {
        let mut scanner = OscScanner::new();
        let bodies = scan(&mut scanner, b"a\x1b]0;title\x07b\x1b]7;file:///tmp\x1b\\c");
        assert_eq!(bodies, vec!["0;title", "7;file:///tmp"]);
        assert!(!scanner.in_sequence());
    }

    #[test]
    fn test_split_across_chunks() {
        let mut scanner = OscScanner::new();
        assert!(scan(&mut scanner, b"out\x1b]63").is_empty());
        assert!(scanner.in_sequence());
        assert!(scan(&mut scanner, b"3;D;").is_empty());
        assert_eq!(scan(&mut scanner, b"0\x07rest"), vec!["633;D;0"]);
    }

    #[test]
    fn test_split_st_terminator() {
        let mut scanner = OscScanner::new();
        assert!(scan(&mut scanner, b"\x1b]133;A\x1b").is_empty());
        assert_eq!(scan(&mut scanner, b"\\"), vec!["133;A"]);
    }

    #[test]
    fn test_interrupted_sequence_is_dropped() {
        let mut scanner = OscScanner::new();
        let bodies = scan(&mut scanner, b"\x1b]633;D;1\x1b[0m\x1b]633;A\x07");
        assert_eq!(bodies, vec!["633;A"]);
    }

    #[test]
    fn test_nested_start_restarts_body() {
        let mut scanner = OscScanner::new();
        let bodies = scan(&mut scanner, b"\x1b]633;D\x1b]633;B\x07");
        assert_eq!(bodies, vec!["633;B"]);
    }

    #[test]
    fn test_cancel_bytes_abort() {
        let mut scanner = OscScanner::new();
        assert!(scan(&mut scanner, b"\x1b]633;A\x18\x07").is_empty());
    }

    #[test]
    fn test_overflow_skips_to_terminator() {
        let mut scanner = OscScanner::with_max_len(8);
        let bodies = scan(&mut scanner, b"\x1b]0123456789abcdef\x07\x1b]ok\x07");
        assert_eq!(bodies, vec!["ok"]);
    }

    #[test]
    fn test_csi_is_ignored() {
        let mut scanner = OscScanner::new();
        assert!(scan(&mut scanner, b"\x1b[31mred\x1b[0m").is_empty());
        assert!(!scanner.in_sequence());
    }
}
