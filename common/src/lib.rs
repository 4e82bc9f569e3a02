pub mod cell;
pub mod grid;
pub mod valkey;

pub use cell::{Cell, CellStatus, StoreEvent};
pub use grid::{ChunkCoord, GridLayout};
