//! Dimension model
//!
//! Computes the effective terminal grid size from a measured container, the
//! font's cell metrics and an optional fixed-size override. Measurement gaps
//! fall back to the process-wide last-known-good value in [`DimensionCache`].

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::shared::DimensionCache;

/// Smallest grid accepted when an override is in effect
pub const MIN_OVERRIDE_COLS: u16 = 2;
pub const MIN_OVERRIDE_ROWS: u16 = 2;

/// Used when nothing has ever been measured
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 30;

/// Terminal grid size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub cols: u16,
    pub rows: u16,
}

impl Dimensions {
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.cols == 0 || self.rows == 0
    }
}

impl Default for Dimensions {
    fn default() -> Self {
        Self::new(DEFAULT_COLS, DEFAULT_ROWS)
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Fixed-size override set by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionOverride {
    pub cols: u16,
    pub rows: u16,
    /// Use the override verbatim instead of fitting it into the container
    pub force_exact_size: bool,
}

impl DimensionOverride {
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self {
            cols,
            rows,
            force_exact_size: false,
        }
    }

    pub const fn exact(cols: u16, rows: u16) -> Self {
        Self {
            cols,
            rows,
            force_exact_size: true,
        }
    }
}

/// Container size in CSS-like logical pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerSize {
    pub width: f64,
    pub height: f64,
}

impl ContainerSize {
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Zero, negative and NaN sizes count as "not measurable"
    pub fn is_measurable(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

/// Cell metrics reported by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FontMetrics {
    /// Glyph cell width in logical pixels
    pub cell_width: f64,
    /// Glyph cell height in logical pixels
    pub cell_height: f64,
    /// Extra horizontal spacing in device pixels
    pub letter_spacing: f64,
    /// Line height multiplier
    pub line_height: f64,
    pub device_pixel_ratio: f64,
}

impl Default for FontMetrics {
    fn default() -> Self {
        Self {
            cell_width: 8.0,
            cell_height: 16.0,
            letter_spacing: 0.0,
            line_height: 1.0,
            device_pixel_ratio: 1.0,
        }
    }
}

impl FontMetrics {
    fn is_usable(&self) -> bool {
        self.cell_width > 0.0 && self.cell_height > 0.0 && self.device_pixel_ratio > 0.0
    }
}

/// Grid that fits into `container`, or `None` when it cannot be measured.
///
/// Floors at one column and one row.
pub fn measure(container: ContainerSize, font: &FontMetrics) -> Option<Dimensions> {
    if !container.is_measurable() || !font.is_usable() {
        return None;
    }

    let dpr = font.device_pixel_ratio;
    let line_height = if font.line_height > 0.0 {
        font.line_height
    } else {
        1.0
    };

    let scaled_width = container.width * dpr;
    let scaled_char_width = font.cell_width * dpr + font.letter_spacing;
    if scaled_char_width <= 0.0 {
        return None;
    }
    let cols = (scaled_width / scaled_char_width).floor().max(1.0);

    let scaled_height = container.height * dpr;
    let scaled_char_height = (font.cell_height * dpr).ceil();
    let scaled_line_height = (scaled_char_height * line_height).floor().max(1.0);
    let rows = (scaled_height / scaled_line_height).floor().max(1.0);

    Some(Dimensions::new(clamp_u16(cols), clamp_u16(rows)))
}

/// Effective dimensions for a container, font and optional override.
///
/// Successful measurements are written to `cache`; failed ones read from it.
pub fn compute_dimensions(
    container: Option<ContainerSize>,
    font: &FontMetrics,
    fixed: Option<DimensionOverride>,
    cache: &DimensionCache,
) -> Dimensions {
    resolve_dimensions(container.and_then(|c| measure(c, font)), fixed, cache)
}

/// Same as [`compute_dimensions`] for a grid the host has already measured.
pub fn resolve_dimensions(
    measured: Option<Dimensions>,
    fixed: Option<DimensionOverride>,
    cache: &DimensionCache,
) -> Dimensions {
    let measured = measured.filter(|m| !m.is_empty());

    if let Some(fixed) = fixed {
        if fixed.force_exact_size {
            if cache.get().is_some() {
                return Dimensions::new(fixed.cols, fixed.rows);
            }
            return Dimensions::new(
                fixed.cols.max(MIN_OVERRIDE_COLS),
                fixed.rows.max(MIN_OVERRIDE_ROWS),
            );
        }

        return match measured {
            Some(measured) => {
                cache.set(measured);
                Dimensions::new(
                    fixed.cols.min(measured.cols).max(MIN_OVERRIDE_COLS),
                    fixed.rows.min(measured.rows).max(MIN_OVERRIDE_ROWS),
                )
            }
            None => Dimensions::new(fixed.cols, fixed.rows),
        };
    }

    match measured {
        Some(measured) => {
            cache.set(measured);
            measured
        }
        None => {
            let fallback = cache.get().unwrap_or_default();
            debug!("Container not measurable, using last known {}", fallback);
            fallback
        }
    }
}

fn clamp_u16(value: f64) -> u16 {
    if value >= f64::from(u16::MAX) {
        u16::MAX
    } else {
        value as u16
    }
}
