//! Configuration for termctl.
//!
//! Loaded from `~/.termctl/config.toml`. Every field is optional; missing or
//! invalid files fall back to defaults.
//!
//! ```toml
//! # Default shell (optional, otherwise $SHELL / %COMSPEC%)
//! shell = "pwsh.exe"
//! args = ["-NoLogo"]
//! log_level = "info"
//!
//! [session]
//! keep_open_on_exit = false
//! queue_input_until_ready = true
//!
//! [resize]
//! debounce_ms = 50
//!
//! [shell_integration]
//! enabled = true
//!
//! [addons]
//! gpu_acceleration = "auto"   # auto, on, off
//! unicode_version = "11"      # 6, 11
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::core::addons::{AddonOptions, GpuAcceleration, UnicodeVersion};
use crate::core::dimensions::FontMetrics;
use crate::core::launch::{DefaultLaunchResolver, LaunchConfig};
use crate::core::process::FlowControl;
use crate::core::session::SessionOptions;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not determine config path")]
    NoHome,
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default shell command
    pub shell: Option<String>,
    pub args: Vec<String>,
    /// Starting directory
    pub cwd: Option<PathBuf>,
    /// Extra environment for the shell
    pub env: BTreeMap<String, String>,
    /// tracing filter, e.g. "info" or "termctl=debug"
    pub log_level: String,
    /// Untrusted workspaces refuse to launch processes
    pub trusted_workspace: bool,
    pub session: SessionConfig,
    pub resize: ResizeConfig,
    pub shell_integration: ShellIntegrationConfig,
    pub flow_control: FlowControlConfig,
    pub addons: AddonsConfig,
    pub font: FontConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: None,
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            log_level: "info".to_string(),
            trusted_workspace: true,
            session: SessionConfig::default(),
            resize: ResizeConfig::default(),
            shell_integration: ShellIntegrationConfig::default(),
            flow_control: FlowControlConfig::default(),
            addons: AddonsConfig::default(),
            font: FontConfig::default(),
        }
    }
}

/// Session lifecycle settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub queue_input_until_ready: bool,
    pub keep_open_on_exit: bool,
    pub flush_retries: u32,
    pub flush_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_input_until_ready: false,
            keep_open_on_exit: false,
            flush_retries: 10,
            flush_interval_ms: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResizeConfig {
    pub debounce_ms: u64,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self { debounce_ms: 50 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellIntegrationConfig {
    pub enabled: bool,
    /// Gutter markers for finished commands
    pub decorations: bool,
}

impl Default for ShellIntegrationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            decorations: true,
        }
    }
}

/// Output flow control, in bytes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowControlConfig {
    pub high_watermark: usize,
    pub low_watermark: usize,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        let flow = FlowControl::default();
        Self {
            high_watermark: flow.high_watermark,
            low_watermark: flow.low_watermark,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddonsConfig {
    pub gpu_acceleration: GpuAcceleration,
    pub ligatures: bool,
    pub unicode_version: UnicodeVersion,
    /// Let programs set the clipboard with OSC 52
    pub clipboard_osc52: bool,
}

impl Default for AddonsConfig {
    fn default() -> Self {
        Self {
            gpu_acceleration: GpuAcceleration::Auto,
            ligatures: false,
            unicode_version: UnicodeVersion::V11,
            clipboard_osc52: true,
        }
    }
}

/// Font metrics in logical pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FontConfig {
    pub cell_width: f64,
    pub cell_height: f64,
    pub letter_spacing: f64,
    pub line_height: f64,
    pub device_pixel_ratio: f64,
}

impl Default for FontConfig {
    fn default() -> Self {
        let font = FontMetrics::default();
        Self {
            cell_width: font.cell_width,
            cell_height: font.cell_height,
            letter_spacing: font.letter_spacing,
            line_height: font.line_height,
            device_pixel_ratio: font.device_pixel_ratio,
        }
    }
}

impl FontConfig {
    pub fn metrics(&self) -> FontMetrics {
        FontMetrics {
            cell_width: self.cell_width,
            cell_height: self.cell_height,
            letter_spacing: self.letter_spacing,
            line_height: self.line_height,
            device_pixel_ratio: self.device_pixel_ratio,
        }
    }
}

impl Config {
    /// Load configuration from `~/.termctl/config.toml`
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Using default configuration: {}", e);
                Self::default()
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to `~/.termctl/config.toml`
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoHome)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `~/.termctl`, created on demand
    pub fn data_dir() -> Option<PathBuf> {
        let dir = home_dir()?.join(".termctl");
        if !dir.exists() {
            let _ = fs::create_dir_all(&dir);
        }
        Some(dir)
    }

    fn config_path() -> Option<PathBuf> {
        Self::data_dir().map(|dir| dir.join("config.toml"))
    }

    /// Options for new sessions
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            queue_input_until_ready: self.session.queue_input_until_ready,
            keep_open_on_exit: self.session.keep_open_on_exit,
            flush_retries: self.session.flush_retries,
            flush_interval: Duration::from_millis(self.session.flush_interval_ms),
            resize_debounce: Duration::from_millis(self.resize.debounce_ms),
            flow_control: FlowControl {
                high_watermark: self.flow_control.high_watermark,
                // Resuming must be possible below the pause threshold
                low_watermark: self.flow_control.low_watermark.min(self.flow_control.high_watermark),
            },
            addons: AddonOptions {
                gpu_acceleration: self.addons.gpu_acceleration,
                ligatures: self.addons.ligatures,
                unicode_version: self.addons.unicode_version,
                clipboard_osc52: self.addons.clipboard_osc52,
                decorations: self.shell_integration.enabled && self.shell_integration.decorations,
            },
        }
    }

    /// Launch for the configured shell
    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            executable: self.shell.clone(),
            args: self.args.clone(),
            cwd: self.cwd.clone(),
            env: self.env.clone(),
            ignore_shell_integration: !self.shell_integration.enabled,
            ..LaunchConfig::default()
        }
    }

    pub fn launch_resolver(&self) -> DefaultLaunchResolver {
        DefaultLaunchResolver {
            default_shell: self.shell.clone(),
            default_args: self.args.clone(),
            trusted: self.trusted_workspace,
            shell_integration: self.shell_integration.enabled,
        }
    }
}

// Get home directory
fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE")
        .or_else(|| std::env::var_os("HOME"))
        .map(PathBuf::from)
}
