//! Launch configuration and resolution
//!
//! A [`LaunchConfig`] says how to start (or re-attach to) a process. Parts of
//! it may be resolved lazily: the default shell is picked and workspace trust
//! is checked by a [`LaunchResolver`] before the first process is created. The
//! result, a [`ResolvedLaunch`], is frozen for the lifetime of that process.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::cancel::Reply;
use super::capabilities::CommandDetectionSnapshot;
use super::dimensions::Dimensions;

/// Shell family, classified from the executable name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShellKind {
    Bash,
    Zsh,
    Fish,
    Sh,
    Nu,
    Pwsh,
    PowerShell,
    Cmd,
    Wsl,
    Other(String),
}

impl ShellKind {
    /// Classify an executable path or command line
    pub fn from_executable(executable: &str) -> Self {
        // Accept both separators so Windows paths classify on any host
        let name = executable
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .unwrap_or(executable)
            .to_lowercase();
        let name = name.strip_suffix(".exe").unwrap_or(&name);

        match name {
            "bash" => ShellKind::Bash,
            "zsh" => ShellKind::Zsh,
            "fish" => ShellKind::Fish,
            "sh" | "dash" | "ash" => ShellKind::Sh,
            "nu" => ShellKind::Nu,
            "pwsh" => ShellKind::Pwsh,
            "powershell" => ShellKind::PowerShell,
            "cmd" => ShellKind::Cmd,
            "wsl" => ShellKind::Wsl,
            other => ShellKind::Other(other.to_string()),
        }
    }

    /// Human readable name used as the default title
    pub fn display_name(&self) -> &str {
        match self {
            ShellKind::Bash => "Bash",
            ShellKind::Zsh => "Zsh",
            ShellKind::Fish => "Fish",
            ShellKind::Sh => "sh",
            ShellKind::Nu => "Nushell",
            ShellKind::Pwsh => "PowerShell 7",
            ShellKind::PowerShell => "Windows PowerShell",
            ShellKind::Cmd => "Command Prompt",
            ShellKind::Wsl => "WSL",
            ShellKind::Other(name) => name,
        }
    }

    /// Shells we know how to emit integration sequences from
    pub fn supports_shell_integration(&self) -> bool {
        matches!(
            self,
            ShellKind::Bash | ShellKind::Zsh | ShellKind::Fish | ShellKind::Pwsh | ShellKind::PowerShell
        )
    }
}

/// Reattach descriptor for a process that outlived its previous session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistentProcess {
    pub id: u64,
    pub dimensions: Dimensions,
    pub cwd: Option<PathBuf>,
    pub title: String,
    pub executable: String,
    pub commands: Option<CommandDetectionSnapshot>,
}

/// How to start or re-attach to the backing process
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchConfig {
    pub name: Option<String>,
    /// `None` lets the resolver pick the default shell
    pub executable: Option<String>,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub attach_persistent_process: Option<PersistentProcess>,
    pub ignore_shell_integration: bool,
}

impl LaunchConfig {
    pub fn shell(executable: impl Into<String>) -> Self {
        Self {
            executable: Some(executable.into()),
            ..Self::default()
        }
    }
}

/// Fully resolved launch, frozen once a process has been created from it
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLaunch {
    pub name: Option<String>,
    pub executable: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub shell_kind: ShellKind,
    pub attach: Option<PersistentProcess>,
    pub shell_integration: bool,
}

/// Outcome of resolution; `Err` carries a user-facing reason
pub type ResolveOutcome = Result<ResolvedLaunch, String>;

/// Resolves the executable and checks workspace trust, possibly asynchronously
pub trait LaunchResolver {
    fn resolve(&self, launch: LaunchConfig, reply: Reply<ResolveOutcome>);
}

pub const UNTRUSTED_WORKSPACE_MESSAGE: &str =
    "Cannot launch a terminal process in an untrusted workspace";

/// Resolver used by the binary: picks a shell from config or environment and
/// answers immediately.
#[derive(Debug, Clone)]
pub struct DefaultLaunchResolver {
    pub default_shell: Option<String>,
    pub default_args: Vec<String>,
    pub trusted: bool,
    pub shell_integration: bool,
}

impl Default for DefaultLaunchResolver {
    fn default() -> Self {
        Self {
            default_shell: None,
            default_args: Vec::new(),
            trusted: true,
            shell_integration: true,
        }
    }
}

impl DefaultLaunchResolver {
    pub fn resolve_now(&self, launch: LaunchConfig) -> ResolveOutcome {
        if !self.trusted {
            info!("Launch denied: workspace is not trusted");
            return Err(UNTRUSTED_WORKSPACE_MESSAGE.to_string());
        }

        let (executable, args) = match (&launch.executable, &launch.attach_persistent_process) {
            (Some(exe), _) => (exe.clone(), launch.args.clone()),
            (None, Some(attach)) => (attach.executable.clone(), launch.args.clone()),
            (None, None) => match &self.default_shell {
                Some(shell) => (shell.clone(), self.default_args.clone()),
                None => (platform_default_shell(), Vec::new()),
            },
        };
        let shell_kind = ShellKind::from_executable(&executable);
        let shell_integration = self.shell_integration && !launch.ignore_shell_integration;

        let mut env = launch.env.clone();
        if shell_integration {
            env.insert("TERM_PROGRAM".to_string(), "termctl".to_string());
            env.insert(
                "TERM_PROGRAM_VERSION".to_string(),
                env!("CARGO_PKG_VERSION").to_string(),
            );
            env.insert("TERMCTL_SHELL_INTEGRATION".to_string(), "1".to_string());
        }

        debug!("Resolved launch: {} ({:?})", executable, shell_kind);
        Ok(ResolvedLaunch {
            name: launch.name,
            executable,
            args,
            cwd: launch
                .cwd
                .or_else(|| launch.attach_persistent_process.as_ref().and_then(|p| p.cwd.clone())),
            env,
            shell_kind,
            attach: launch.attach_persistent_process,
            shell_integration,
        })
    }
}

impl LaunchResolver for DefaultLaunchResolver {
    fn resolve(&self, launch: LaunchConfig, reply: Reply<ResolveOutcome>) {
        reply.send(self.resolve_now(launch));
    }
}

/// `$SHELL` / `%COMSPEC%`, then a hard-coded default
pub fn platform_default_shell() -> String {
    #[cfg(windows)]
    {
        std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
    }
    #[cfg(not(windows))]
    {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_kind_classification() {
        assert_eq!(ShellKind::from_executable("/usr/bin/bash"), ShellKind::Bash);
        assert_eq!(ShellKind::from_executable("pwsh.exe"), ShellKind::Pwsh);
        assert_eq!(ShellKind::from_executable("C:\\Windows\\System32\\cmd.exe"), ShellKind::Cmd);
        assert_eq!(ShellKind::from_executable("POWERSHELL.EXE"), ShellKind::PowerShell);
        assert_eq!(
            ShellKind::from_executable("/opt/bin/xonsh"),
            ShellKind::Other("xonsh".to_string())
        );
        assert_eq!(ShellKind::Pwsh.display_name(), "PowerShell 7");
        assert!(ShellKind::Zsh.supports_shell_integration());
        assert!(!ShellKind::Cmd.supports_shell_integration());
    }

    #[test]
    fn test_resolve_explicit_executable() {
        let resolver = DefaultLaunchResolver::default();
        let mut launch = LaunchConfig::shell("bash");
        launch.args = vec!["-l".to_string()];
        let resolved = resolver.resolve_now(launch).expect("resolves");
        assert_eq!(resolved.executable, "bash");
        assert_eq!(resolved.args, vec!["-l".to_string()]);
        assert_eq!(resolved.shell_kind, ShellKind::Bash);
        assert_eq!(resolved.env.get("TERMCTL_SHELL_INTEGRATION").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_resolve_default_shell() {
        let resolver = DefaultLaunchResolver {
            default_shell: Some("zsh".to_string()),
            ..DefaultLaunchResolver::default()
        };
        let resolved = resolver.resolve_now(LaunchConfig::default()).expect("resolves");
        assert_eq!(resolved.shell_kind, ShellKind::Zsh);
    }

    #[test]
    fn test_resolve_untrusted() {
        let resolver = DefaultLaunchResolver {
            trusted: false,
            ..DefaultLaunchResolver::default()
        };
        let outcome = resolver.resolve_now(LaunchConfig::shell("bash"));
        assert_eq!(outcome, Err(UNTRUSTED_WORKSPACE_MESSAGE.to_string()));
    }

    #[test]
    fn test_ignore_shell_integration() {
        let resolver = DefaultLaunchResolver::default();
        let launch = LaunchConfig {
            ignore_shell_integration: true,
            ..LaunchConfig::shell("bash")
        };
        let resolved = resolver.resolve_now(launch).expect("resolves");
        assert!(!resolved.shell_integration);
        assert!(!resolved.env.contains_key("TERMCTL_SHELL_INTEGRATION"));
    }
}
