//! Process-wide state shared between sessions
//!
//! Both values are hints: last writer wins, readers treat them as eventually
//! consistent. Sessions receive them through [`SharedState`] instead of
//! reaching for globals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::info;

use super::dimensions::Dimensions;

/// Last successfully measured terminal dimensions
#[derive(Debug, Clone, Default)]
pub struct DimensionCache {
    inner: Arc<Mutex<Option<Dimensions>>>,
}

impl DimensionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Dimensions> {
        match self.inner.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set(&self, dims: Dimensions) {
        match self.inner.lock() {
            Ok(mut guard) => *guard = Some(dims),
            Err(poisoned) => *poisoned.into_inner() = Some(dims),
        }
    }
}

/// Set once an accelerated renderer hit an unrecoverable context loss.
///
/// Later sessions skip the accelerated renderer in `auto` mode.
#[derive(Debug, Clone, Default)]
pub struct RendererFallback {
    disabled: Arc<AtomicBool>,
}

impl RendererFallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    pub fn set(&self) {
        if !self.disabled.swap(true, Ordering::SeqCst) {
            info!("Accelerated renderer disabled for this process");
        }
    }
}

/// Everything sessions in one process share
#[derive(Debug, Clone, Default)]
pub struct SharedState {
    pub dimensions: DimensionCache,
    pub renderer: RendererFallback,
}

impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_cache_last_writer_wins() {
        let shared = SharedState::new();
        let other = shared.clone();
        assert_eq!(shared.dimensions.get(), None);
        shared.dimensions.set(Dimensions::new(80, 24));
        other.dimensions.set(Dimensions::new(100, 30));
        assert_eq!(shared.dimensions.get(), Some(Dimensions::new(100, 30)));
    }

    #[test]
    fn test_renderer_fallback_is_shared() {
        let shared = SharedState::new();
        let other = shared.clone();
        other.renderer.set();
        assert!(shared.renderer.is_set());
    }
}
