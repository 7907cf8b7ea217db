//! Character width tables
//!
//! Version 11 follows current East Asian Width data (emoji are wide).
//! Version 6 reproduces older tables where pictographs occupy one cell, for
//! shells and programs that still assume them.

use std::any::Any;

use serde::{Deserialize, Serialize};
use unicode_width::UnicodeWidthChar;

use super::{Addon, AddonKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UnicodeVersion {
    #[serde(rename = "6")]
    V6,
    #[default]
    #[serde(rename = "11")]
    V11,
}

/// Blocks that were narrow before Unicode 9 widened emoji
fn is_pictograph(c: char) -> bool {
    matches!(c as u32,
        0x1F300..=0x1F64F
        | 0x1F680..=0x1F6FF
        | 0x1F900..=0x1F9FF
        | 0x2600..=0x27BF)
}

#[derive(Debug)]
pub struct UnicodeAddon {
    version: UnicodeVersion,
}

impl UnicodeAddon {
    pub fn new(version: UnicodeVersion) -> Self {
        Self { version }
    }

    pub fn version(&self) -> UnicodeVersion {
        self.version
    }

    pub fn set_version(&mut self, version: UnicodeVersion) {
        self.version = version;
    }

    /// Cell width of one char; control characters take none
    pub fn char_width(&self, c: char) -> usize {
        if self.version == UnicodeVersion::V6 && is_pictograph(c) {
            return 1;
        }
        c.width().unwrap_or(0)
    }

    pub fn str_width(&self, s: &str) -> usize {
        s.chars().map(|c| self.char_width(c)).sum()
    }
}

impl Addon for UnicodeAddon {
    fn kind(&self) -> AddonKind {
        AddonKind::Unicode
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

    #[test]
    fn test_widths() {
        let v11 = UnicodeAddon::new(UnicodeVersion::V11);
        assert_eq!(v11.char_width('a'), 1);
        assert_eq!(v11.char_width('中'), 2);
        assert_eq!(v11.char_width('\u{1F600}'), 2);
        assert_eq!(v11.char_width('\x07'), 0);
        assert_eq!(v11.str_width("ab中"), 4);

        let v6 = UnicodeAddon::new(UnicodeVersion::V6);
        assert_eq!(v6.char_width('\u{1F600}'), 1);
        assert_eq!(v6.char_width('中'), 2);
    }
}
