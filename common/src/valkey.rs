/// Valkey key for the store event queue (producers LPUSH, server RPOPLPUSH).
pub const EVENT_QUEUE: &str = "cell_event_queue";

/// Valkey key for the processing queue (RPOPLPUSH target).
pub const PROCESSING_QUEUE: &str = "cell_processing_queue";

/// Valkey hash of cell id -> JSON-encoded `Cell`.
pub const CELLS_HASH: &str = "cells";

/// Valkey sorted set of stored cell ids, scored by id (for range queries).
pub const CELL_INDEX_ZSET: &str = "cell_index";

/// Valkey key for the configured grid capacity.
pub const GRID_CAPACITY: &str = "grid_capacity";

/// Valkey sorted set of recent cell updates (for WebSocket catch-up).
pub const CELL_UPDATES_ZSET: &str = "cell_updates";

/// Build the Valkey key for the set of users that liked a cell.
pub fn cell_likes_key(cell_id: u64) -> String {
    format!("cell_likes:{cell_id}")
}

/// Build the Valkey key for the set of cell ids owned by a user.
pub fn owner_cells_key(owner: &str) -> String {
    format!("owner_cells:{owner}")
}
