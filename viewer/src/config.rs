use std::env;

use common::GridLayout;

use crate::lod::LodThresholds;

/// Tunables for the tile cache and viewport.
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub layout: GridLayout,
    /// Resident chunk cap enforced after every render cycle.
    pub max_cached_chunks: usize,
    /// Extra chunk widths loaded around the screen on every side.
    pub buffer_chunks: u32,
    pub min_scale: f64,
    pub max_scale: f64,
    pub initial_scale: f64,
    /// Wheel zoom multiplies the scale by `1 ± zoom_step`.
    pub zoom_step: f64,
    pub thresholds: LodThresholds,
    /// Pointer travel (px) below which a press/release is a click.
    pub click_threshold: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            layout: GridLayout::default(),
            max_cached_chunks: 2_048,
            buffer_chunks: 2,
            min_scale: 0.1,
            max_scale: 8.0,
            initial_scale: 1.0,
            zoom_step: 0.1,
            thresholds: LodThresholds::default(),
            click_threshold: 5.0,
            viewport_width: 1_280.0,
            viewport_height: 800.0,
        }
    }
}

impl ViewerConfig {
    /// Defaults overridden by `MAX_CACHED_CHUNKS`, `VIEWPORT_WIDTH`,
    /// `VIEWPORT_HEIGHT` and `GRID_COLUMNS`.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Ok(value) = env::var("MAX_CACHED_CHUNKS") {
            config.max_cached_chunks = value.parse()?;
        }
        if let Ok(value) = env::var("VIEWPORT_WIDTH") {
            config.viewport_width = value.parse()?;
        }
        if let Ok(value) = env::var("VIEWPORT_HEIGHT") {
            config.viewport_height = value.parse()?;
        }
        if let Ok(value) = env::var("GRID_COLUMNS") {
            config.layout.columns = value.parse::<u64>()?.max(1);
        }
        Ok(config)
    }
}
