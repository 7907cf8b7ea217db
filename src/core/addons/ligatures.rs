//! Ligature shaping
//!
//! Detects programming-ligature runs (`->`, `!=`, `===` ...) in output and
//! keeps an atlas of the runs seen so far. The accelerated renderer rasterizes
//! runs as single glyphs while this addon is loaded.

use std::any::Any;
use std::collections::BTreeSet;

use super::{printable_text, Addon, AddonKind};

/// Recognized sequences, longest first so the longest run wins
const LIGATURES: &[&str] = &[
    "<!--", "===", "!==", "...", "<=>", "->>", "=>>", "<<=", ">>=", "->", "<-", "=>", "==", "!=", "<=",
    ">=", "&&", "||", "::", "|>", "<|", "//", "/*", "*/", "++", "--", "..",
];

/// Ligature runs in `text` as (char offset, sequence)
pub fn find_ligature_runs(text: &str) -> Vec<(usize, &'static str)> {
    let chars: Vec<char> = text.chars().collect();
    let mut runs = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let hit = LIGATURES.iter().find(|lig| {
            let n = lig.chars().count();
            i + n <= chars.len() && lig.chars().eq(chars[i..i + n].iter().copied())
        });
        match hit {
            Some(lig) => {
                runs.push((i, *lig));
                i += lig.chars().count();
            }
            None => i += 1,
        }
    }
    runs
}

#[derive(Debug, Default)]
pub struct LigaturesAddon {
    atlas: BTreeSet<&'static str>,
    generation: u64,
}

impl LigaturesAddon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequences seen so far
    pub fn atlas(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.atlas.iter().copied()
    }

    /// Bumped whenever the atlas grows
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Addon for LigaturesAddon {
    fn kind(&self) -> AddonKind {
        AddonKind::Ligatures
    }

    fn on_output(&mut self, data: &[u8]) -> Result<(), super::AddonError> {
        let text = printable_text(data);
        let mut grew = false;
        for (_, lig) in find_ligature_runs(&text) {
            grew |= self.atlas.insert(lig);
        }
        if grew {
            self.generation += 1;
        }
        Ok(())
    }

    fn dispose(&mut self) {
        self.atlas.clear();
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
    fn test_longest_run_wins() {
        let runs = find_ligature_runs("a === b -> c");
        assert_eq!(runs, vec![(2, "==="), (8, "->")]);
    }

    #[test]
    fn test_atlas_grows_once_per_sequence() {
        let mut addon = LigaturesAddon::new();
        addon.on_output(b"x != y").unwrap();
        addon.on_output(b"\x1b[31ma != b\x1b[0m").unwrap();
        assert_eq!(addon.generation(), 1);
        addon.on_output(b"f => g").unwrap();
        assert_eq!(addon.atlas().collect::<Vec<_>>(), vec!["!=", "=>"]);
        assert_eq!(addon.generation(), 2);
    }
}
