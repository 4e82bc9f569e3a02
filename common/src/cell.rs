use serde::{Deserialize, Serialize};

/// Rental period granted when a cell is claimed: 30 days in milliseconds.
pub const RENTAL_PERIOD_MS: u64 = 30 * 24 * 3_600_000;

/// Rental extension granted by each like: one day in milliseconds.
pub const LIKE_EXTENSION_MS: u64 = 24 * 3_600_000;

/// Fill color for cells that never had one chosen.
pub const DEFAULT_COLOR: &str = "#FFFFFF";

/// Moderation state of a cell. Only approved cells are shown on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    #[default]
    Approved,
    Pending,
    Hidden,
}

/// One purchasable grid position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub id: u64,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    /// Hex color string, e.g. "#FF5733"
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
    #[serde(default)]
    pub expires_at: u64,
    #[serde(default)]
    pub status: CellStatus,
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

impl Cell {
    /// A freshly claimed cell owned by `owner`.
    pub fn claimed(id: u64, owner: impl Into<String>, color: impl Into<String>, now_ms: u64) -> Self {
        Self {
            id,
            owner: Some(owner.into()),
            photo_url: None,
            color: color.into(),
            like_count: 0,
            created_at: now_ms,
            updated_at: now_ms,
            expires_at: now_ms + RENTAL_PERIOD_MS,
            status: CellStatus::Approved,
        }
    }

    pub fn is_owned(&self) -> bool {
        self.owner.is_some()
    }

    pub fn is_visible(&self) -> bool {
        self.status == CellStatus::Approved
    }

    /// Parse the hex color string into (R, G, B).
    pub fn rgb(&self) -> Option<(u8, u8, u8)> {
        parse_hex_color(&self.color).map(unpack_rgb)
    }

    /// Packed 0xRRGGBB color, if the stored string is valid.
    pub fn packed_color(&self) -> Option<u32> {
        parse_hex_color(&self.color)
    }

    /// Record a like at `now_ms`. The rental is extended from whichever is later:
    /// the current expiry or now.
    pub fn apply_like(&mut self, now_ms: u64) {
        self.like_count += 1;
        self.expires_at = self.expires_at.max(now_ms) + LIKE_EXTENSION_MS;
        self.updated_at = now_ms;
    }
}

/// Parse `#RRGGBB` (leading `#` optional) into a packed 0xRRGGBB integer.
pub fn parse_hex_color(color: &str) -> Option<u32> {
    let hex = color.strip_prefix('#').unwrap_or(color);
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(hex, 16).ok()
}

pub fn unpack_rgb(packed: u32) -> (u8, u8, u8) {
    ((packed >> 16) as u8, (packed >> 8) as u8, packed as u8)
}

/// A change to the cell store, queued by external flows and applied by the
/// store's consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    /// A purchase completed; the record replaces whatever was stored for the id.
    Claimed { cell: Cell },
    /// A user liked a cell.
    Liked {
        cell_id: u64,
        user_id: String,
        timestamp_ms: u64,
    },
}

impl StoreEvent {
    pub fn cell_id(&self) -> u64 {
        match self {
            StoreEvent::Claimed { cell } => cell.id,
            StoreEvent::Liked { cell_id, .. } => *cell_id,
        }
    }
}
