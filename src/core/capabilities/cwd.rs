//! Working-directory detection
//!
//! [`CwdDetection`] is fed by shell integration and is authoritative.
//! [`NaiveCwdDetection`] only knows what the process layer reported (launch
//! directory, backend polling) and is a fallback for shells without
//! integration.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// Distinct directories remembered, most recent first
pub const CWD_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Default)]
pub struct CwdDetection {
    cwd: Option<PathBuf>,
    history: VecDeque<PathBuf>,
}

impl CwdDetection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Most recently used directories, newest first, without duplicates
    pub fn history(&self) -> impl Iterator<Item = &PathBuf> {
        self.history.iter()
    }

    /// Returns true when the directory actually changed.
    pub fn update(&mut self, cwd: PathBuf) -> bool {
        if self.cwd.as_ref() == Some(&cwd) {
            return false;
        }
        self.history.retain(|p| p != &cwd);
        self.history.push_front(cwd.clone());
        self.history.truncate(CWD_HISTORY_LIMIT);
        self.cwd = Some(cwd);
        true
    }
}

#[derive(Debug, Default)]
pub struct NaiveCwdDetection {
    cwd: Option<PathBuf>,
}

impl NaiveCwdDetection {
    pub fn new(cwd: Option<PathBuf>) -> Self {
        Self { cwd }
    }

    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn update(&mut self, cwd: PathBuf) -> bool {
        if self.cwd.as_ref() == Some(&cwd) {
            return false;
        }
        self.cwd = Some(cwd);
        true
    }
}
