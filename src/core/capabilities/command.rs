//! Command detection
//!
//! Tracks the prompt → input → execution → finish cycle reported by shell
//! integration and keeps a bounded history of finished commands.

use std::collections::VecDeque;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Maximum number of finished commands kept
pub const COMMAND_HISTORY_LIMIT: usize = 1000;

/// Where the shell currently is in its command cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommandPhase {
    #[default]
    Idle,
    /// Prompt is being drawn
    Prompt,
    /// User is typing
    Input,
    /// Command is running
    Executing,
}

/// A command that ran to completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalCommand {
    pub command: String,
    pub cwd: Option<PathBuf>,
    /// `None` when the shell did not report a usable exit code
    pub exit_code: Option<i32>,
    pub prompt_line: Option<usize>,
    pub executed_line: Option<usize>,
    pub finished_line: Option<usize>,
}

impl TerminalCommand {
    pub fn succeeded(&self) -> Option<bool> {
        self.exit_code.map(|code| code == 0)
    }
}

/// Command currently being assembled
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct PartialCommand {
    command: String,
    prompt_line: Option<usize>,
    command_line: Option<usize>,
    executed_line: Option<usize>,
}

/// Serializable history, used for reattach and replay
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDetectionSnapshot {
    pub commands: Vec<TerminalCommand>,
    pub cwd: Option<PathBuf>,
    pub phase: CommandPhase,
}

#[derive(Debug, Default)]
pub struct CommandDetection {
    phase: CommandPhase,
    current: PartialCommand,
    commands: VecDeque<TerminalCommand>,
    cwd: Option<PathBuf>,
}

impl CommandDetection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> CommandPhase {
        self.phase
    }

    pub fn cwd(&self) -> Option<&PathBuf> {
        self.cwd.as_ref()
    }

    pub fn set_cwd(&mut self, cwd: PathBuf) {
        self.cwd = Some(cwd);
    }

    /// Finished commands, oldest first
    pub fn commands(&self) -> impl Iterator<Item = &TerminalCommand> {
        self.commands.iter()
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn last_command(&self) -> Option<&TerminalCommand> {
        self.commands.back()
    }

    pub fn last_exit_code(&self) -> Option<i32> {
        self.commands.back().and_then(|c| c.exit_code)
    }

    /// Command line of the running command, if known
    pub fn executing_command(&self) -> Option<&str> {
        if self.phase == CommandPhase::Executing && !self.current.command.is_empty() {
            Some(&self.current.command)
        } else {
            None
        }
    }

    pub fn handle_prompt_start(&mut self, line: usize) {
        self.current = PartialCommand {
            prompt_line: Some(line),
            ..PartialCommand::default()
        };
        self.phase = CommandPhase::Prompt;
    }

    pub fn handle_command_start(&mut self, line: usize) {
        self.current.command_line = Some(line);
        self.phase = CommandPhase::Input;
    }

    pub fn set_command_line(&mut self, command: String) {
        self.current.command = command;
    }

    pub fn handle_command_executed(&mut self, line: usize) {
        self.current.executed_line = Some(line);
        self.phase = CommandPhase::Executing;
    }

    /// Close the current command. Returns the recorded command, or `None`
    /// when nothing was executing (e.g. an empty prompt was submitted).
    pub fn handle_command_finished(
        &mut self,
        exit_code: Option<i32>,
        line: usize,
    ) -> Option<&TerminalCommand> {
        let was_executing = self.phase == CommandPhase::Executing;
        let current = std::mem::take(&mut self.current);
        self.phase = CommandPhase::Idle;

        if !was_executing && current.command.is_empty() {
            debug!("Command finished without execution; not recording");
            return None;
        }

        let command = TerminalCommand {
            command: current.command.trim().to_string(),
            cwd: self.cwd.clone(),
            exit_code,
            prompt_line: current.prompt_line,
            executed_line: current.executed_line,
            finished_line: Some(line),
        };
        self.push(command);
        self.commands.back()
    }

    pub fn snapshot(&self) -> CommandDetectionSnapshot {
        CommandDetectionSnapshot {
            commands: self.commands.iter().cloned().collect(),
            cwd: self.cwd.clone(),
            phase: self.phase,
        }
    }

    /// Replace history with a replayed snapshot.
    pub fn restore(&mut self, snapshot: CommandDetectionSnapshot) {
        debug!("Restoring {} commands", snapshot.commands.len());
        self.commands.clear();
        for command in snapshot.commands {
            self.push(command);
        }
        if snapshot.cwd.is_some() {
            self.cwd = snapshot.cwd;
        }
        self.phase = snapshot.phase;
        self.current = PartialCommand::default();
    }

    fn push(&mut self, command: TerminalCommand) {
        if self.commands.len() >= COMMAND_HISTORY_LIMIT {
            self.commands.pop_front();
        }
        self.commands.push_back(command);
    }
}
