//! Command decorations
//!
//! One marker per finished command, coloured by outcome in the gutter.

use std::any::Any;
use std::collections::VecDeque;

use super::{Addon, AddonKind};
use crate::core::capabilities::command::COMMAND_HISTORY_LIMIT;
use crate::core::capabilities::TerminalCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecorationStatus {
    Success,
    Error,
    /// The shell did not report an exit code
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDecoration {
    /// Line the marker is anchored to
    pub line: Option<usize>,
    pub command: String,
    pub status: DecorationStatus,
}

#[derive(Debug, Default)]
pub struct DecorationsAddon {
    decorations: VecDeque<CommandDecoration>,
}

impl DecorationsAddon {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decorations(&self) -> impl Iterator<Item = &CommandDecoration> {
        self.decorations.iter()
    }

    pub fn len(&self) -> usize {
        self.decorations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decorations.is_empty()
    }

    pub fn clear(&mut self) {
        self.decorations.clear();
    }
}

impl Addon for DecorationsAddon {
    fn kind(&self) -> AddonKind {
        AddonKind::Decorations
    }

    fn on_command_finished(&mut self, command: &TerminalCommand) {
        let status = match command.succeeded() {
            Some(true) => DecorationStatus::Success,
            Some(false) => DecorationStatus::Error,
            None => DecorationStatus::Unknown,
        };
        if self.decorations.len() == COMMAND_HISTORY_LIMIT {
            self.decorations.pop_front();
        }
        self.decorations.push_back(CommandDecoration {
            line: command.prompt_line.or(command.executed_line),
            command: command.command.clone(),
            status,
        });
    }

    fn dispose(&mut self) {
        self.decorations.clear();
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

    fn command(exit_code: Option<i32>) -> TerminalCommand {
        TerminalCommand {
            command: "make".to_string(),
            cwd: None,
            exit_code,
            prompt_line: Some(4),
            executed_line: Some(5),
            finished_line: Some(9),
        }
    }

    #[test]
    fn test_status_from_exit_code() {
        let mut addon = DecorationsAddon::new();
        addon.on_command_finished(&command(Some(0)));
        addon.on_command_finished(&command(Some(2)));
        addon.on_command_finished(&command(None));
        let statuses: Vec<_> = addon.decorations().map(|d| d.status).collect();
        assert_eq!(
            statuses,
            vec![DecorationStatus::Success, DecorationStatus::Error, DecorationStatus::Unknown]
        );
        assert_eq!(addon.decorations().next().and_then(|d| d.line), Some(4));
    }
}
