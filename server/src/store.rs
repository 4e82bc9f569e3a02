use common::valkey;
use common::{Cell, StoreEvent};
use lru::LruCache;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::num::NonZero;

pub struct CellStore {
    /// LRU cache of decoded cells keyed by id.
    cache: LruCache<u64, Cell>,
    valkey: redis::aio::MultiplexedConnection,
    default_capacity: u64,
}

impl CellStore {
    pub fn new(
        valkey: redis::aio::MultiplexedConnection,
        cache_size: usize,
        default_capacity: u64,
    ) -> Self {
        let cache_size = NonZero::new(cache_size).unwrap_or(NonZero::<usize>::MIN);
        Self {
            cache: LruCache::new(cache_size),
            valkey,
            default_capacity,
        }
    }

    /// Configured grid capacity, falling back to the server default.
    pub async fn capacity(&mut self) -> u64 {
        let stored: Option<u64> = self
            .valkey
            .get(valkey::GRID_CAPACITY)
            .await
            .unwrap_or(None);
        stored.unwrap_or(self.default_capacity)
    }

    /// Get or load one cell record.
    pub async fn get_cell(&mut self, id: u64) -> Option<Cell> {
        if let Some(cell) = self.cache.get(&id) {
            return Some(cell.clone());
        }

        let json: Option<String> = self
            .valkey
            .hget(valkey::CELLS_HASH, id)
            .await
            .unwrap_or(None);

        let cell = decode_cell(id, json.as_deref()?)?;
        self.cache.put(id, cell.clone());
        Some(cell)
    }

    /// Visible cells with `min_id <= id < max_id`, ordered by id.
    pub async fn get_range(&mut self, min_id: u64, max_id: u64) -> Vec<Cell> {
        let ids: Vec<u64> = redis::cmd("ZRANGEBYSCORE")
            .arg(valkey::CELL_INDEX_ZSET)
            .arg(min_id)
            .arg(format!("({max_id}"))
            .query_async(&mut self.valkey)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("Range query {}..{} failed: {}", min_id, max_id, e);
                Vec::new()
            });

        let mut cells = self.load_cells(&ids).await;
        cells.retain(|cell| cell.is_visible());
        cells
    }

    /// Visible cells owned by `owner`, ordered by id.
    pub async fn get_owned(&mut self, owner: &str) -> Vec<Cell> {
        let mut ids: Vec<u64> = self
            .valkey
            .smembers(valkey::owner_cells_key(owner))
            .await
            .unwrap_or_else(|e| {
                tracing::error!("Owner lookup for {} failed: {}", owner, e);
                Vec::new()
            });
        ids.sort_unstable();

        let mut cells = self.load_cells(&ids).await;
        cells.retain(|cell| cell.is_visible() && cell.owner.as_deref() == Some(owner));
        cells
    }

    /// Records for `ids` in the given order. Missing or undecodable records are
    /// skipped.
    async fn load_cells(&mut self, ids: &[u64]) -> Vec<Cell> {
        let hits: Vec<Option<Cell>> = ids.iter().map(|id| self.cache.get(id).cloned()).collect();
        let misses: Vec<u64> = ids
            .iter()
            .zip(&hits)
            .filter(|(_, hit)| hit.is_none())
            .map(|(id, _)| *id)
            .collect();

        let mut fetched = Vec::with_capacity(misses.len());
        if !misses.is_empty() {
            let blobs: Vec<Option<String>> = redis::cmd("HMGET")
                .arg(valkey::CELLS_HASH)
                .arg(&misses)
                .query_async(&mut self.valkey)
                .await
                .unwrap_or_else(|e| {
                    tracing::error!("Loading {} cells failed: {}", misses.len(), e);
                    Vec::new()
                });

            fetched.extend(
                misses
                    .iter()
                    .zip(blobs)
                    .filter_map(|(id, json)| decode_cell(*id, json.as_deref()?)),
            );
        }

        collect_in_order(&mut self.cache, ids, hits, fetched)
    }

    /// Apply a store event. Returns the updated cell when something changed.
    pub async fn apply_event(&mut self, event: &StoreEvent) -> Option<Cell> {
        match event {
            StoreEvent::Claimed { cell } => {
                let capacity = self.capacity().await;
                if cell.id >= capacity {
                    tracing::warn!("Claim for cell {} beyond capacity {}", cell.id, capacity);
                    return None;
                }
                let previous_owner = self.get_cell(cell.id).await.and_then(|c| c.owner);
                if let Some(previous) = previous_owner.filter(|p| cell.owner.as_ref() != Some(p)) {
                    let _: () = self
                        .valkey
                        .srem(valkey::owner_cells_key(&previous), cell.id)
                        .await
                        .unwrap_or_else(|e| {
                            tracing::error!("Failed to unlink cell {} from {}: {}", cell.id, previous, e);
                        });
                }
                self.write_cell(cell).await;
                Some(cell.clone())
            }
            StoreEvent::Liked {
                cell_id,
                user_id,
                timestamp_ms,
            } => {
                let mut cell = self.get_cell(*cell_id).await?;
                if !accepts_likes(&cell) {
                    return None;
                }

                // One like per user per cell
                let added: i64 = self
                    .valkey
                    .sadd(valkey::cell_likes_key(*cell_id), user_id)
                    .await
                    .unwrap_or(0);
                if added == 0 {
                    return None;
                }

                cell.apply_like(*timestamp_ms);
                self.write_cell(&cell).await;
                Some(cell)
            }
        }
    }

    async fn write_cell(&mut self, cell: &Cell) {
        let json = match serde_json::to_string(cell) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to encode cell {}: {}", cell.id, e);
                return;
            }
        };

        let mut pipe = redis::pipe();
        pipe.hset(valkey::CELLS_HASH, cell.id, json).ignore()
            .zadd(valkey::CELL_INDEX_ZSET, cell.id, cell.id as f64).ignore();
        if let Some(owner) = &cell.owner {
            pipe.sadd(valkey::owner_cells_key(owner), cell.id).ignore();
        }
        let _: () = pipe
            .query_async(&mut self.valkey)
            .await
            .unwrap_or_else(|e| {
                tracing::error!("Failed to write cell {}: {}", cell.id, e);
            });

        self.cache.put(cell.id, cell.clone());
    }
}

/// Merge cache hits and freshly decoded records into `ids` order, caching the
/// decoded ones. The result never depends on what the cache still holds.
fn collect_in_order(
    cache: &mut LruCache<u64, Cell>,
    ids: &[u64],
    hits: Vec<Option<Cell>>,
    fetched: Vec<Cell>,
) -> Vec<Cell> {
    let mut fetched: HashMap<u64, Cell> = fetched.into_iter().map(|c| (c.id, c)).collect();
    for cell in fetched.values() {
        cache.put(cell.id, cell.clone());
    }
    ids.iter()
        .zip(hits)
        .filter_map(|(id, hit)| hit.or_else(|| fetched.remove(id)))
        .collect()
}

/// Only owned, approved cells can be liked.
fn accepts_likes(cell: &Cell) -> bool {
    cell.is_owned() && cell.is_visible()
}

fn decode_cell(id: u64, json: &str) -> Option<Cell> {
    match serde_json::from_str::<Cell>(json) {
        Ok(cell) if cell.id == id => Some(cell),
        Ok(cell) => {
            tracing::warn!("Cell record {} carries id {}", id, cell.id);
            None
        }
        Err(e) => {
            tracing::warn!("Failed to decode cell {}: {}", id, e);
            None
        }
    }
}
