use std::collections::HashMap;
use std::sync::Arc;

use common::{Cell, ChunkCoord, GridLayout};
use lru::LruCache;

use crate::graphics::Graphics;

/// Texture and sprite owned by one chunk.
///
/// Both are `Option`s so that releasing them is a `take()`: the eviction path
/// and the teardown path may both call [`RenderResources::release`], only the
/// first one reaches the backend.
pub struct RenderResources<G: Graphics> {
    texture: Option<G::Texture>,
    sprite: Option<G::Sprite>,
}

impl<G: Graphics> Default for RenderResources<G> {
    fn default() -> Self {
        Self {
            texture: None,
            sprite: None,
        }
    }
}

impl<G: Graphics> RenderResources<G> {
    pub fn texture(&self) -> Option<&G::Texture> {
        self.texture.as_ref()
    }

    pub fn has_texture(&self) -> bool {
        self.texture.is_some()
    }

    pub fn is_attached(&self) -> bool {
        self.sprite.is_some()
    }

    /// The chunk's texture, created on first use and reused afterwards.
    pub(crate) fn texture_or_create(&mut self, gfx: &mut G, width: u32, height: u32) -> &mut G::Texture {
        self.texture
            .get_or_insert_with(|| gfx.create_texture(width, height))
    }

    /// Put the texture on screen at world (x, y) unless it already is.
    pub(crate) fn attach(&mut self, gfx: &mut G, x: f32, y: f32) {
        if self.sprite.is_some() {
            return;
        }
        if let Some(texture) = &self.texture {
            self.sprite = Some(gfx.attach_sprite(texture, x, y));
        }
    }

    pub(crate) fn detach(&mut self, gfx: &mut G) {
        if let Some(sprite) = self.sprite.take() {
            gfx.remove_sprite(sprite);
        }
    }

    /// Detach the sprite, then destroy the texture.
    pub(crate) fn release(&mut self, gfx: &mut G) {
        self.detach(gfx);
        if let Some(texture) = self.texture.take() {
            gfx.destroy_texture(texture);
        }
    }
}

impl<G: Graphics> Drop for RenderResources<G> {
    fn drop(&mut self) {
        if self.texture.is_some() || self.sprite.is_some() {
            tracing::warn!("Chunk render resources dropped without release");
        }
    }
}

/// A K x K tile of the grid.
pub struct Chunk<G: Graphics> {
    coord: ChunkCoord,
    cells: HashMap<u64, Arc<Cell>>,
    data_loaded: bool,
    dirty: bool,
    last_access: u64,
    pub(crate) resources: RenderResources<G>,
}

impl<G: Graphics> Chunk<G> {
    fn new(coord: ChunkCoord) -> Self {
        Self {
            coord,
            cells: HashMap::new(),
            data_loaded: false,
            dirty: true,
            last_access: 0,
            resources: RenderResources::default(),
        }
    }

    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    pub fn cell(&self, id: u64) -> Option<&Arc<Cell>> {
        self.cells.get(&id)
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn is_loaded(&self) -> bool {
        self.data_loaded
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn last_access(&self) -> u64 {
        self.last_access
    }

    pub fn resources(&self) -> &RenderResources<G> {
        &self.resources
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

/// Resident chunks keyed by coordinate, plus a flat cell-id index.
///
/// The `LruCache` is unbounded; its recency order mirrors `last_access` and
/// eviction is driven explicitly by [`crate::evict::LruEvictor`].
pub struct ChunkStore<G: Graphics> {
    layout: GridLayout,
    chunks: LruCache<ChunkCoord, Chunk<G>>,
    cells: HashMap<u64, Arc<Cell>>,
    clock: u64,
}

impl<G: Graphics> ChunkStore<G> {
    pub fn new(layout: GridLayout) -> Self {
        Self {
            layout,
            chunks: LruCache::unbounded(),
            cells: HashMap::new(),
            clock: 0,
        }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub(crate) fn set_layout(&mut self, layout: GridLayout) {
        self.layout = layout;
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.chunks.contains(&coord)
    }

    /// Look up a chunk, creating an empty one if it is not resident.
    /// Counts as an access for eviction order.
    pub fn get_or_create(&mut self, coord: ChunkCoord) -> &mut Chunk<G> {
        self.clock += 1;
        let tick = self.clock;
        let chunk = self.chunks.get_or_insert_mut(coord, || Chunk::new(coord));
        chunk.last_access = tick;
        chunk
    }

    /// Look up a chunk without touching its access time.
    pub fn peek(&self, coord: ChunkCoord) -> Option<&Chunk<G>> {
        self.chunks.peek(&coord)
    }

    pub(crate) fn peek_mut(&mut self, coord: ChunkCoord) -> Option<&mut Chunk<G>> {
        self.chunks.peek_mut(&coord)
    }

    /// O(1) cell lookup independent of chunk membership.
    pub fn cell(&self, id: u64) -> Option<&Arc<Cell>> {
        self.cells.get(&id)
    }

    /// Resident coordinates, least recently accessed first.
    pub fn lru_order(&self) -> Vec<ChunkCoord> {
        self.chunks.iter().rev().map(|(coord, _)| *coord).collect()
    }

    pub fn coords(&self) -> impl Iterator<Item = ChunkCoord> + '_ {
        self.chunks.iter().map(|(coord, _)| *coord)
    }

    /// Remove a chunk, release its render resources and drop its cells from
    /// the flat index. Returns false if the chunk was not resident.
    pub fn evict(&mut self, coord: ChunkCoord, gfx: &mut G) -> bool {
        let Some(mut chunk) = self.chunks.pop(&coord) else {
            return false;
        };
        chunk.resources.release(gfx);
        for id in chunk.cells.keys() {
            self.cells.remove(id);
        }
        true
    }

    /// Replace a chunk's cell data with the result of a fetch.
    ///
    /// Only visible cells inside the chunk's own block are kept. Returns false,
    /// discarding the data, when the chunk has been evicted since the fetch
    /// was issued.
    pub fn merge(&mut self, coord: ChunkCoord, fetched: Vec<Cell>) -> bool {
        let layout = self.layout;
        let Some(chunk) = self.chunks.peek_mut(&coord) else {
            return false;
        };

        let owned: HashMap<u64, Arc<Cell>> = fetched
            .into_iter()
            .filter(|cell| cell.is_visible() && layout.chunk_contains(coord, cell.id))
            .map(|cell| (cell.id, Arc::new(cell)))
            .collect();

        for id in chunk.cells.keys() {
            self.cells.remove(id);
        }
        for (id, cell) in &owned {
            self.cells.insert(*id, Arc::clone(cell));
        }
        chunk.cells = owned;
        chunk.data_loaded = true;
        chunk.dirty = true;
        true
    }

    /// Apply a single updated cell to its resident, loaded chunk. Returns the
    /// chunk that changed.
    pub fn update_cell(&mut self, cell: Cell) -> Option<ChunkCoord> {
        if cell.id >= self.layout.capacity {
            return None;
        }
        let coord = self.layout.chunk_of_id(cell.id);
        let chunk = self.chunks.peek_mut(&coord)?;
        if !chunk.data_loaded {
            return None;
        }

        let id = cell.id;
        if cell.is_visible() {
            let cell = Arc::new(cell);
            chunk.cells.insert(id, Arc::clone(&cell));
            self.cells.insert(id, cell);
        } else {
            chunk.cells.remove(&id);
            self.cells.remove(&id);
        }
        chunk.dirty = true;
        Some(coord)
    }

    /// Forget that a chunk's data was loaded so the next pass re-fetches it.
    pub fn invalidate(&mut self, coord: ChunkCoord) {
        if let Some(chunk) = self.chunks.peek_mut(&coord) {
            chunk.data_loaded = false;
        }
    }

    pub fn mark_all_dirty(&mut self) {
        for (_, chunk) in self.chunks.iter_mut() {
            chunk.dirty = true;
        }
    }

    /// Release every chunk. Used on teardown.
    pub fn clear(&mut self, gfx: &mut G) {
        while let Some((_, mut chunk)) = self.chunks.pop_lru() {
            chunk.resources.release(gfx);
        }
        self.cells.clear();
    }
}
