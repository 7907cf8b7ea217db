//! Find text in the terminal buffer

use std::any::Any;

use super::{Addon, AddonKind};
use crate::core::terminal::VirtualTerminal;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub case_sensitive: bool,
    pub whole_word: bool,
}

/// A match, in char columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchMatch {
    pub line: usize,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Default)]
pub struct SearchAddon {
    last: Option<SearchMatch>,
}

impl SearchAddon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_match(&self) -> Option<SearchMatch> {
        self.last
    }

    pub fn clear(&mut self) {
        self.last = None;
    }

    /// Next match after the previous one, wrapping at the end of the buffer.
    pub fn find_next(
        &mut self,
        terminal: &dyn VirtualTerminal,
        query: &str,
        options: SearchOptions,
    ) -> Option<SearchMatch> {
        let lines = terminal.line_count();
        if query.is_empty() || lines == 0 {
            return None;
        }
        let (start_line, start_col) = match self.last {
            Some(m) => (m.line, m.start + 1),
            None => (0, 0),
        };

        for offset in 0..=lines {
            let line = (start_line + offset) % lines;
            let Some(text) = terminal.line_text(line) else { continue };
            let matches = find_in_line(&text, query, options);
            let found = if offset == 0 {
                matches.into_iter().find(|&(s, _)| s >= start_col)
            } else if offset == lines {
                // Wrapped back to the starting line
                matches.into_iter().find(|&(s, _)| s < start_col)
            } else {
                matches.into_iter().next()
            };
            if let Some((start, end)) = found {
                let m = SearchMatch { line, start, end };
                self.last = Some(m);
                return Some(m);
            }
        }
        self.last = None;
        None
    }

    /// Previous match before the last one, wrapping at the top of the buffer.
    pub fn find_previous(
        &mut self,
        terminal: &dyn VirtualTerminal,
        query: &str,
        options: SearchOptions,
    ) -> Option<SearchMatch> {
        let lines = terminal.line_count();
        if query.is_empty() || lines == 0 {
            return None;
        }
        let (start_line, start_col) = match self.last {
            Some(m) => (m.line, Some(m.start)),
            None => (lines - 1, None),
        };

        for offset in 0..=lines {
            let line = (start_line + lines * 2 - offset) % lines;
            let Some(text) = terminal.line_text(line) else { continue };
            let matches = find_in_line(&text, query, options);
            let found = match (offset, start_col) {
                (0, Some(col)) => matches.into_iter().rev().find(|&(s, _)| s < col),
                (o, Some(col)) if o == lines => matches.into_iter().rev().find(|&(s, _)| s >= col),
                _ => matches.into_iter().next_back(),
            };
            if let Some((start, end)) = found {
                let m = SearchMatch { line, start, end };
                self.last = Some(m);
                return Some(m);
            }
        }
        self.last = None;
        None
    }
}

/// All matches in one line as char ranges
fn find_in_line(text: &str, query: &str, options: SearchOptions) -> Vec<(usize, usize)> {
    let fold = |s: &str| -> Vec<char> {
        if options.case_sensitive {
            s.chars().collect()
        } else {
            s.chars().flat_map(char::to_lowercase).collect()
        }
    };
    let haystack = fold(text);
    let needle = fold(query);
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }

    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    (0..=haystack.len() - needle.len())
        .filter(|&i| haystack[i..i + needle.len()] == needle[..])
        .filter(|&i| {
            if !options.whole_word {
                return true;
            }
            let before = i == 0 || !is_word(haystack[i - 1]);
            let end = i + needle.len();
            let after = end == haystack.len() || !is_word(haystack[end]);
            before && after
        })
        .map(|i| (i, i + needle.len()))
        .collect()
}

impl Addon for SearchAddon {
    fn kind(&self) -> AddonKind {
        AddonKind::Search
    }

    fn dispose(&mut self) {
        self.last = None;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
