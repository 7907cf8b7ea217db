//! Accelerated renderer
//!
//! Tracks the state of a GPU-backed renderer for the VT core: device-pixel
//! cell metrics and the glyph texture atlas. An unrecoverable context loss
//! moves it to `ContextLost`; the session then records the process-wide
//! fallback, unloads the renderer and refreshes dimensions so the fallback
//! path gets reconciled cell metrics.
//!
//! ```text
//! Inactive ── activate ──> Active ── context lost ──> ContextLost
//!                             └──────── dispose ─────────> Disposed
//! ```

use std::any::Any;
use std::collections::BTreeSet;

use tracing::{debug, warn};

use super::ligatures::find_ligature_runs;
use super::{printable_text, Addon, AddonContext, AddonError, AddonKind, GpuAcceleration};
use crate::core::dimensions::{Dimensions, FontMetrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    Inactive,
    Active,
    ContextLost,
    Disposed,
}

/// Cell geometry snapped to whole device pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellMetrics {
    /// Glyph box
    pub char_width: u32,
    pub char_height: u32,
    /// Cell including letter spacing and line height
    pub cell_width: u32,
    pub cell_height: u32,
}

impl CellMetrics {
    pub fn from_font(font: &FontMetrics) -> Self {
        let dpr = if font.device_pixel_ratio > 0.0 {
            font.device_pixel_ratio
        } else {
            1.0
        };
        let char_width = (font.cell_width * dpr).floor().max(1.0);
        let char_height = (font.cell_height * dpr).ceil().max(1.0);
        let cell_width = (char_width + font.letter_spacing.round()).max(1.0);
        let cell_height = (char_height * font.line_height.max(1.0)).floor().max(1.0);
        Self {
            char_width: char_width as u32,
            char_height: char_height as u32,
            cell_width: cell_width as u32,
            cell_height: cell_height as u32,
        }
    }
}

#[derive(Debug)]
pub struct AcceleratedRenderer {
    state: RendererState,
    metrics: Option<CellMetrics>,
    dims: Option<Dimensions>,
    /// Glyphs (or ligature runs) rasterized into the texture atlas
    atlas: BTreeSet<String>,
    atlas_clears: u64,
    ligatures: bool,
    /// Ignore the process-wide fallback
    forced: bool,
}

impl AcceleratedRenderer {
    pub fn new(mode: GpuAcceleration) -> Self {
        Self {
            forced: mode == GpuAcceleration::On,
            state: RendererState::Inactive,
            metrics: None,
            dims: None,
            atlas: BTreeSet::new(),
            atlas_clears: 0,
            ligatures: false,
        }
    }

    pub fn state(&self) -> RendererState {
        self.state
    }

    pub fn metrics(&self) -> Option<CellMetrics> {
        self.metrics
    }

    pub fn ligatures_enabled(&self) -> bool {
        self.ligatures
    }

    pub fn atlas_len(&self) -> usize {
        self.atlas.len()
    }

    pub fn atlas_clears(&self) -> u64 {
        self.atlas_clears
    }

    /// Canvas size in device pixels
    pub fn canvas_size(&self) -> Option<(u32, u32)> {
        let (m, d) = (self.metrics?, self.dims?);
        Some((m.cell_width * d.cols as u32, m.cell_height * d.rows as u32))
    }

    /// The graphics context is gone for good.
    pub fn handle_context_lost(&mut self) {
        if self.state == RendererState::Active {
            warn!("Accelerated renderer lost its context");
            self.state = RendererState::ContextLost;
            self.clear_atlas();
        }
    }

    pub fn clear_atlas(&mut self) {
        self.atlas.clear();
        self.atlas_clears += 1;
    }
}

impl Addon for AcceleratedRenderer {
    fn kind(&self) -> AddonKind {
        AddonKind::Renderer
    }

    fn activate(&mut self, ctx: &AddonContext<'_>) -> Result<(), AddonError> {
        if self.state != RendererState::Inactive {
            return Err(AddonError::Unavailable(AddonKind::Renderer));
        }
        // Another session may have failed while this one was loading
        if !self.forced && ctx.shared.renderer.is_set() {
            return Err(AddonError::Unavailable(AddonKind::Renderer));
        }
        self.metrics = Some(CellMetrics::from_font(&ctx.font));
        self.dims = Some(ctx.dimensions);
        self.state = RendererState::Active;
        debug!("Accelerated renderer active at {} ({:?})", ctx.dimensions, self.metrics);
        Ok(())
    }

    fn on_output(&mut self, data: &[u8]) -> Result<(), AddonError> {
        if self.state != RendererState::Active {
            return Ok(());
        }
        let text = printable_text(data);
        if self.ligatures {
            for (_, run) in find_ligature_runs(&text) {
                self.atlas.insert(run.to_string());
            }
        }
        for c in text.chars().filter(|c| !c.is_whitespace()) {
            self.atlas.insert(c.to_string());
        }
        Ok(())
    }

    fn on_resize(&mut self, dims: Dimensions, font: &FontMetrics) {
        if self.state != RendererState::Active {
            return;
        }
        self.dims = Some(dims);
        let metrics = CellMetrics::from_font(font);
        if self.metrics != Some(metrics) {
            // Glyph size changed; everything has to be re-rasterized
            self.metrics = Some(metrics);
            self.clear_atlas();
        }
    }

    fn on_addon_changed(&mut self, kind: AddonKind, loaded: bool) {
        if kind == AddonKind::Ligatures && self.ligatures != loaded {
            self.ligatures = loaded;
            self.clear_atlas();
        }
    }

    fn dispose(&mut self) {
        self.atlas.clear();
        self.state = RendererState::Disposed;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
