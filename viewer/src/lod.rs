//! Level-of-detail rasterization of a chunk into its texture.

use common::GridLayout;
use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::graphics::{Graphics, Paint, Rect};

/// Fill used for cells nobody owns.
const EMPTY_FILL: u32 = 0xCCCCCC;

/// Fill used for owned cells whose stored color does not parse.
const FALLBACK_FILL: u32 = 0xFFFFFF;

const BORDER_COLOR: u32 = 0x444444;

const TEXT_COLOR: u32 = 0x000000;

/// Border drawn around the signed-in user's own cells at every tier.
const MINE_BORDER: (f32, Paint) = (
    2.0,
    Paint {
        color: 0xFFD700,
        alpha: 1.0,
    },
);

/// Scale thresholds separating the detail tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LodThresholds {
    /// Below this everything is flat fills.
    pub low: f64,
    /// At or above this borders are full weight.
    pub high: f64,
    /// Above this like counts are drawn in occupied cells.
    pub text: f64,
}

impl Default for LodThresholds {
    fn default() -> Self {
        Self {
            low: 0.25,
            high: 0.6,
            text: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetailTier {
    UltraLow,
    Low,
    High,
}

/// How one tier paints a cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierStyle {
    pub occupied_alpha: f32,
    pub empty_alpha: f32,
    /// Border stroke width in texture pixels, `None` for no border.
    pub border: Option<(f32, f32)>,
    /// Whether like counts may be drawn (still subject to the text threshold).
    pub text: bool,
}

const TIER_STYLES: [TierStyle; 3] = [
    // UltraLow
    TierStyle {
        occupied_alpha: 0.9,
        empty_alpha: 0.05,
        border: None,
        text: false,
    },
    // Low: (width, alpha)
    TierStyle {
        occupied_alpha: 0.7,
        empty_alpha: 0.1,
        border: Some((0.5, 0.3)),
        text: false,
    },
    // High
    TierStyle {
        occupied_alpha: 0.7,
        empty_alpha: 0.1,
        border: Some((1.0, 0.6)),
        text: true,
    },
];

impl DetailTier {
    pub fn for_scale(scale: f64, thresholds: &LodThresholds) -> Self {
        if scale < thresholds.low {
            DetailTier::UltraLow
        } else if scale < thresholds.high {
            DetailTier::Low
        } else {
            DetailTier::High
        }
    }

    pub fn style(self) -> &'static TierStyle {
        match self {
            DetailTier::UltraLow => &TIER_STYLES[0],
            DetailTier::Low => &TIER_STYLES[1],
            DetailTier::High => &TIER_STYLES[2],
        }
    }
}

/// Draw every cell of `chunk` into its texture for the given scale.
///
/// The texture is created on the first call and overwritten afterwards. Cells
/// past the grid's capacity or column count are left blank. Cells owned by
/// `current_user` get a gold border. Clears the chunk's dirty flag.
pub fn rasterize<G: Graphics>(
    chunk: &mut Chunk<G>,
    layout: &GridLayout,
    scale: f64,
    thresholds: &LodThresholds,
    current_user: Option<&str>,
    gfx: &mut G,
) {
    let tier = DetailTier::for_scale(scale, thresholds);
    let style = tier.style();
    let show_text = style.text && scale > thresholds.text;

    let cell_px = layout.cell_size as f32;
    let edge = layout.chunk_pixel_size().ceil() as u32;
    let coord = chunk.coord();
    let first_row = coord.row as u64 * layout.chunk_size;
    let first_col = coord.col as u64 * layout.chunk_size;

    // The texture is borrowed from the chunk while drawing, so resolve cell
    // paints up front.
    let mut cells = Vec::with_capacity((layout.chunk_size * layout.chunk_size) as usize);
    for local_row in 0..layout.chunk_size {
        let row = first_row + local_row;
        for local_col in 0..layout.chunk_size {
            let col = first_col + local_col;
            if col >= layout.columns {
                break;
            }
            let id = layout.cell_id(row, col);
            if id >= layout.capacity {
                continue;
            }
            let rect = Rect::new(
                local_col as f32 * cell_px,
                local_row as f32 * cell_px,
                cell_px,
                cell_px,
            );
            let occupied = chunk
                .cell(id)
                .filter(|cell| cell.is_owned())
                .map(|cell| (cell.packed_color().unwrap_or(FALLBACK_FILL), cell.like_count));
            let mine = current_user.is_some()
                && chunk.cell(id).is_some_and(|cell| cell.owner.as_deref() == current_user);
            cells.push((rect, occupied, mine));
        }
    }

    let texture = chunk.resources.texture_or_create(gfx, edge, edge);
    gfx.clear(texture);
    for (rect, occupied, mine) in cells {
        let fill = match occupied {
            Some((color, _)) => Paint::new(color, style.occupied_alpha),
            None => Paint::new(EMPTY_FILL, style.empty_alpha),
        };
        gfx.fill_rect(texture, rect, fill);

        if let Some((width, alpha)) = style.border {
            gfx.stroke_rect(texture, rect, width, Paint::new(BORDER_COLOR, alpha));
        }
        if mine {
            let (width, paint) = MINE_BORDER;
            gfx.stroke_rect(texture, rect, width, paint);
        }

        if let (true, Some((_, likes))) = (show_text, occupied) {
            let (x, y) = rect.center();
            gfx.draw_text(
                texture,
                &likes.to_string(),
                x,
                y,
                cell_px * 0.4,
                Paint::new(TEXT_COLOR, 1.0),
            );
        }
    }
    chunk.mark_clean();
}
