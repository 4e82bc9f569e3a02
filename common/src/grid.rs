use serde::{Deserialize, Serialize};

/// Default number of cell columns (100,000,000 cells = 10,000 x 10,000).
pub const DEFAULT_COLUMNS: u64 = 10_000;

/// Default total number of purchasable cells.
pub const DEFAULT_CAPACITY: u64 = 100_000_000;

/// Default chunk edge length in cells (10x10 cells per chunk).
pub const DEFAULT_CHUNK_SIZE: u64 = 10;

/// Default edge length of one cell in world pixels.
pub const DEFAULT_CELL_SIZE: f64 = 30.0;

/// Chunk coordinate in the chunk grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub row: u32,
    pub col: u32,
}

impl ChunkCoord {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.row, self.col)
    }
}

/// Shape of the cell grid and its partition into chunks.
///
/// All methods are plain arithmetic over non-negative coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridLayout {
    /// Cells per row (C).
    pub columns: u64,
    /// Chunk edge length in cells (K).
    pub chunk_size: u64,
    /// Cell edge length in world pixels.
    pub cell_size: f64,
    /// Number of purchasable cells; ids run `0..capacity`.
    pub capacity: u64,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self {
            columns: DEFAULT_COLUMNS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            cell_size: DEFAULT_CELL_SIZE,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl GridLayout {
    pub fn new(columns: u64, chunk_size: u64, cell_size: f64, capacity: u64) -> Self {
        Self {
            columns: columns.max(1),
            chunk_size: chunk_size.max(1),
            cell_size,
            capacity,
        }
    }

    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Linear cell id for a (row, col) position.
    pub fn cell_id(&self, row: u64, col: u64) -> u64 {
        row * self.columns + col
    }

    pub fn row_of(&self, id: u64) -> u64 {
        id / self.columns
    }

    pub fn col_of(&self, id: u64) -> u64 {
        id % self.columns
    }

    /// Which chunk a (row, col) position falls in.
    pub fn chunk_of(&self, row: u64, col: u64) -> ChunkCoord {
        ChunkCoord {
            row: (row / self.chunk_size) as u32,
            col: (col / self.chunk_size) as u32,
        }
    }

    /// Which chunk owns a cell id.
    pub fn chunk_of_id(&self, id: u64) -> ChunkCoord {
        self.chunk_of(self.row_of(id), self.col_of(id))
    }

    /// World-space pixel position of a chunk's top-left corner.
    pub fn chunk_pixel_origin(&self, coord: ChunkCoord) -> (f64, f64) {
        let edge = self.chunk_pixel_size();
        (coord.col as f64 * edge, coord.row as f64 * edge)
    }

    /// Edge length of a chunk in world pixels.
    pub fn chunk_pixel_size(&self) -> f64 {
        self.chunk_size as f64 * self.cell_size
    }

    /// Id of the chunk's top-left cell.
    pub fn chunk_start_id(&self, coord: ChunkCoord) -> u64 {
        self.cell_id(
            coord.row as u64 * self.chunk_size,
            coord.col as u64 * self.chunk_size,
        )
    }

    /// Half-open id range `[start, start + K*C + K)` queried when loading a chunk.
    ///
    /// The range covers every id in the chunk, plus ids of horizontally
    /// neighbouring chunks on the same rows.
    pub fn chunk_fetch_range(&self, coord: ChunkCoord) -> (u64, u64) {
        let start = self.chunk_start_id(coord);
        (start, start + self.chunk_size * self.columns + self.chunk_size)
    }

    /// Whether `id` lies within the chunk's K x K block.
    pub fn chunk_contains(&self, coord: ChunkCoord, id: u64) -> bool {
        id < self.capacity && self.chunk_of_id(id) == coord
    }

    /// Number of cell rows needed to hold `capacity` cells.
    pub fn total_rows(&self) -> u64 {
        self.capacity.div_ceil(self.columns)
    }

    /// Number of chunk rows in the chunk grid.
    pub fn chunk_rows(&self) -> u32 {
        self.total_rows().div_ceil(self.chunk_size) as u32
    }

    /// Number of chunk columns in the chunk grid.
    pub fn chunk_cols(&self) -> u32 {
        self.columns.div_ceil(self.chunk_size) as u32
    }

    /// Cell under a world-space point, if it lies on a valid cell.
    pub fn cell_at_world(&self, world_x: f64, world_y: f64) -> Option<u64> {
        if world_x < 0.0 || world_y < 0.0 {
            return None;
        }
        let col = (world_x / self.cell_size).floor() as u64;
        let row = (world_y / self.cell_size).floor() as u64;
        if col >= self.columns {
            return None;
        }
        let id = self.cell_id(row, col);
        (id < self.capacity).then_some(id)
    }

    /// World-space rectangle (x, y, w, h) of a cell.
    pub fn cell_world_rect(&self, id: u64) -> (f64, f64, f64, f64) {
        (
            self.col_of(id) as f64 * self.cell_size,
            self.row_of(id) as f64 * self.cell_size,
            self.cell_size,
            self.cell_size,
        )
    }
}
