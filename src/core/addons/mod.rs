//! Addon composition layer
//!
//! Addons are optional feature modules attached to a session's output and
//! render pipeline. They are loaded lazily through an [`AddonLoader`] and
//! live in an [`AddonHost`], which isolates their failures: a load error, an
//! activation error or a runtime error is logged and the feature is simply
//! absent.
//!
//! Built-in addons:
//!
//! - **search**: find text in the terminal buffer
//! - **clipboard**: OSC 52 clipboard bridging
//! - **decorations**: per-command success/failure markers
//! - **unicode**: character width tables
//! - **ligatures**: ligature run detection and atlas
//! - **renderer**: accelerated renderer with permanent fallback

pub mod clipboard;
pub mod decorations;
pub mod ligatures;
pub mod renderer;
pub mod search;
pub mod unicode;

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::thread;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::cancel::Reply;
use super::capabilities::TerminalCommand;
use super::dimensions::{Dimensions, FontMetrics};
use super::shared::SharedState;

pub use clipboard::{ArboardClipboard, ClipboardAddon, ClipboardProvider};
pub use decorations::{CommandDecoration, DecorationStatus, DecorationsAddon};
pub use ligatures::LigaturesAddon;
pub use renderer::{AcceleratedRenderer, CellMetrics, RendererState};
pub use search::{SearchAddon, SearchMatch, SearchOptions};
pub use unicode::{UnicodeAddon, UnicodeVersion};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddonKind {
    Search,
    Clipboard,
    Decorations,
    Unicode,
    Ligatures,
    Renderer,
}

impl AddonKind {
    pub fn name(self) -> &'static str {
        match self {
            AddonKind::Search => "search",
            AddonKind::Clipboard => "clipboard",
            AddonKind::Decorations => "decorations",
            AddonKind::Unicode => "unicode",
            AddonKind::Ligatures => "ligatures",
            AddonKind::Renderer => "renderer",
        }
    }
}

impl fmt::Display for AddonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum AddonError {
    #[error("Failed to load {kind} addon: {reason}")]
    Load { kind: AddonKind, reason: String },

    #[error("{kind} addon failed: {reason}")]
    Runtime { kind: AddonKind, reason: String },

    #[error("{0} addon is unavailable")]
    Unavailable(AddonKind),
}

/// Accelerated rendering preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuAcceleration {
    /// Use it unless it failed before in this process
    #[default]
    Auto,
    On,
    Off,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddonOptions {
    pub gpu_acceleration: GpuAcceleration,
    pub ligatures: bool,
    pub unicode_version: UnicodeVersion,
    pub clipboard_osc52: bool,
    pub decorations: bool,
}

impl Default for AddonOptions {
    fn default() -> Self {
        Self {
            gpu_acceleration: GpuAcceleration::Auto,
            ligatures: false,
            unicode_version: UnicodeVersion::V11,
            clipboard_osc52: true,
            decorations: true,
        }
    }
}

/// What an addon sees when it is activated
pub struct AddonContext<'a> {
    pub font: FontMetrics,
    pub dimensions: Dimensions,
    pub shared: &'a SharedState,
}

/// An optional feature module
pub trait Addon: Any + Send {
    fn kind(&self) -> AddonKind;

    /// Called once when the load completes, before the addon is visible.
    fn activate(&mut self, _ctx: &AddonContext<'_>) -> Result<(), AddonError> {
        Ok(())
    }

    /// Raw process output, in receipt order
    fn on_output(&mut self, _data: &[u8]) -> Result<(), AddonError> {
        Ok(())
    }

    fn on_command_finished(&mut self, _command: &TerminalCommand) {}

    fn on_resize(&mut self, _dims: Dimensions, _font: &FontMetrics) {}

    /// Another addon was loaded or unloaded
    fn on_addon_changed(&mut self, _kind: AddonKind, _loaded: bool) {}

    fn dispose(&mut self) {}

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Result of one asynchronous addon load
pub struct AddonLoad {
    pub kind: AddonKind,
    pub result: Result<Box<dyn Addon>, AddonError>,
}

impl fmt::Debug for AddonLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddonLoad")
            .field("kind", &self.kind)
            .field("ok", &self.result.is_ok())
            .finish()
    }
}

/// Loads addons, possibly off-thread
pub trait AddonLoader {
    fn load(&self, kind: AddonKind, options: &AddonOptions, reply: Reply<AddonLoad>);
}

/// Constructs the built-in addons on a worker thread
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinAddonLoader;

impl AddonLoader for BuiltinAddonLoader {
    fn load(&self, kind: AddonKind, options: &AddonOptions, reply: Reply<AddonLoad>) {
        let options = options.clone();
        let spawned = thread::Builder::new()
            .name(format!("addon-{}", kind))
            .spawn(move || {
                let result = create_builtin(kind, &options);
                if !reply.send(AddonLoad { kind, result }) {
                    debug!("Discarded {} addon load: session is gone", kind);
                }
            });
        if let Err(e) = spawned {
            warn!("Failed to start loader for {} addon: {}", kind, e);
        }
    }
}

/// Construct a built-in addon
pub fn create_builtin(kind: AddonKind, options: &AddonOptions) -> Result<Box<dyn Addon>, AddonError> {
    let addon: Box<dyn Addon> = match kind {
        AddonKind::Search => Box::new(SearchAddon::new()),
        AddonKind::Clipboard => {
            let mut clipboard = ClipboardAddon::new(Box::new(ArboardClipboard::new()?));
            clipboard.set_osc52_enabled(options.clipboard_osc52);
            Box::new(clipboard)
        }
        AddonKind::Decorations => Box::new(DecorationsAddon::new()),
        AddonKind::Unicode => Box::new(UnicodeAddon::new(options.unicode_version)),
        AddonKind::Ligatures => Box::new(LigaturesAddon::new()),
        AddonKind::Renderer => Box::new(AcceleratedRenderer::new(options.gpu_acceleration)),
    };
    Ok(addon)
}

/// Loaded addons of one session
#[derive(Default)]
pub struct AddonHost {
    loaded: BTreeMap<AddonKind, Box<dyn Addon>>,
    pending: BTreeSet<AddonKind>,
}

impl fmt::Debug for AddonHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddonHost")
            .field("loaded", &self.loaded.keys().collect::<Vec<_>>())
            .field("pending", &self.pending)
            .finish()
    }
}

impl AddonHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self, kind: AddonKind) -> bool {
        self.loaded.contains_key(&kind)
    }

    pub fn is_pending(&self, kind: AddonKind) -> bool {
        self.pending.contains(&kind)
    }

    pub fn loaded_kinds(&self) -> impl Iterator<Item = AddonKind> + '_ {
        self.loaded.keys().copied()
    }

    /// Mark a load as in flight. Returns false when already loaded or loading.
    pub fn begin(&mut self, kind: AddonKind) -> bool {
        if self.is_loaded(kind) || self.is_pending(kind) {
            return false;
        }
        self.pending.insert(kind);
        true
    }

    /// Finish a load. Returns true when the addon is now active.
    pub fn complete(&mut self, load: AddonLoad, ctx: &AddonContext<'_>) -> bool {
        let AddonLoad { kind, result } = load;
        if !self.pending.remove(&kind) {
            debug!("Ignoring {} addon load that was cancelled", kind);
            if let Ok(mut addon) = result {
                addon.dispose();
            }
            return false;
        }

        let mut addon = match result {
            Ok(addon) => addon,
            Err(e) => {
                warn!("{}", e);
                return false;
            }
        };
        for existing in self.loaded.keys() {
            addon.on_addon_changed(*existing, true);
        }
        if let Err(e) = addon.activate(ctx) {
            warn!("Failed to activate {} addon: {}", kind, e);
            addon.dispose();
            return false;
        }

        info!("Loaded {} addon", kind);
        for other in self.loaded.values_mut() {
            other.on_addon_changed(kind, true);
        }
        self.loaded.insert(kind, addon);
        true
    }

    /// Unload an addon, or cancel its pending load.
    pub fn unload(&mut self, kind: AddonKind) -> bool {
        if self.pending.remove(&kind) {
            debug!("Cancelled pending {} addon load", kind);
            return true;
        }
        match self.loaded.remove(&kind) {
            Some(mut addon) => {
                addon.dispose();
                for other in self.loaded.values_mut() {
                    other.on_addon_changed(kind, false);
                }
                debug!("Unloaded {} addon", kind);
                true
            }
            None => false,
        }
    }

    pub fn get<T: Addon>(&self) -> Option<&T> {
        self.loaded.values().find_map(|a| a.as_any().downcast_ref::<T>())
    }

    pub fn get_mut<T: Addon>(&mut self) -> Option<&mut T> {
        self.loaded
            .values_mut()
            .find_map(|a| a.as_any_mut().downcast_mut::<T>())
    }

    pub fn output(&mut self, data: &[u8]) {
        for (kind, addon) in self.loaded.iter_mut() {
            if let Err(e) = addon.on_output(data) {
                warn!("{} addon failed on output: {}", kind, e);
            }
        }
    }

    pub fn command_finished(&mut self, command: &TerminalCommand) {
        for addon in self.loaded.values_mut() {
            addon.on_command_finished(command);
        }
    }

    pub fn resize(&mut self, dims: Dimensions, font: &FontMetrics) {
        for addon in self.loaded.values_mut() {
            addon.on_resize(dims, font);
        }
    }

    /// Dispose everything and forget pending loads.
    pub fn dispose_all(&mut self) {
        self.pending.clear();
        for (kind, mut addon) in std::mem::take(&mut self.loaded) {
            debug!("Disposing {} addon", kind);
            addon.dispose();
        }
    }
}

/// Printable text of an output chunk with escape sequences removed
pub(crate) fn printable_text(data: &[u8]) -> String {
    #[derive(Clone, Copy)]
    enum State {
        Text,
        Escape,
        Csi,
        Osc,
        OscEscape,
    }

    let text = String::from_utf8_lossy(data);
    let mut out = String::with_capacity(text.len());
    let mut state = State::Text;
    for c in text.chars() {
        state = match (state, c) {
            (State::Text, '\x1b') => State::Escape,
            (State::Text, c) => {
                if !c.is_control() || c == '\n' {
                    out.push(c);
                }
                State::Text
            }
            (State::Escape, '[') => State::Csi,
            (State::Escape, ']') => State::Osc,
            (State::Escape, _) => State::Text,
            (State::Csi, c) if ('\x40'..='\x7e').contains(&c) => State::Text,
            (State::Csi, _) => State::Csi,
            (State::Osc, '\x07') => State::Text,
            (State::Osc, '\x1b') => State::OscEscape,
            (State::Osc, _) => State::Osc,
            (State::OscEscape, _) => State::Text,
        };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(shared: &SharedState) -> AddonContext<'_> {
        AddonContext {
            font: FontMetrics::default(),
            dimensions: Dimensions::new(80, 24),
            shared,
        }
    }

    #[test]
    fn test_load_lifecycle() {
        let shared = SharedState::new();
        let mut host = AddonHost::new();
        assert!(host.begin(AddonKind::Search));
        assert!(!host.begin(AddonKind::Search));
        let load = AddonLoad {
            kind: AddonKind::Search,
            result: create_builtin(AddonKind::Search, &AddonOptions::default()),
        };
        assert!(host.complete(load, &ctx(&shared)));
        assert!(host.get::<SearchAddon>().is_some());
        assert!(host.unload(AddonKind::Search));
        assert!(host.get::<SearchAddon>().is_none());
    }

    #[test]
    fn test_cancelled_load_is_discarded() {
        let shared = SharedState::new();
        let mut host = AddonHost::new();
        host.begin(AddonKind::Unicode);
        host.unload(AddonKind::Unicode);
        let load = AddonLoad {
            kind: AddonKind::Unicode,
            result: create_builtin(AddonKind::Unicode, &AddonOptions::default()),
        };
        assert!(!host.complete(load, &ctx(&shared)));
        assert!(!host.is_loaded(AddonKind::Unicode));
    }

    #[test]
    fn test_load_failure_is_isolated() {
        let shared = SharedState::new();
        let mut host = AddonHost::new();
        host.begin(AddonKind::Clipboard);
        let load = AddonLoad {
            kind: AddonKind::Clipboard,
            result: Err(AddonError::Load {
                kind: AddonKind::Clipboard,
                reason: "no display".to_string(),
            }),
        };
        assert!(!host.complete(load, &ctx(&shared)));
        assert!(!host.is_pending(AddonKind::Clipboard));
        // A later attempt is allowed
        assert!(host.begin(AddonKind::Clipboard));
    }

    #[test]
    fn test_printable_text() {
        let text = printable_text(b"\x1b[1;32mok\x1b[0m \x1b]0;title\x07done\r\n");
        assert_eq!(text, "ok done\n");
    }
}
