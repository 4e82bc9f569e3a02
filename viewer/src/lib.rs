//! Client-side tile cache for the Grid World canvas.
//!
//! The grid is split into fixed-size chunks. Chunks in and around the
//! viewport are created on demand, filled from the remote cell store,
//! rasterized into per-chunk textures at a zoom-dependent level of detail,
//! and evicted least-recently-used first once the cache is over its cap.

pub mod chunk;
pub mod config;
pub mod controller;
pub mod display_list;
pub mod evict;
pub mod fetcher;
pub mod graphics;
pub mod http;
pub mod lod;
pub mod viewport;

pub use chunk::{Chunk, ChunkStore};
pub use config::ViewerConfig;
pub use controller::{CellAction, Release, SessionProvider, StaticSession, ViewportController};
pub use display_list::DisplayList;
pub use fetcher::{CellSource, DataFetcher, SourceError};
pub use graphics::{Graphics, Paint, Rect};
pub use http::HttpCellSource;
pub use lod::{DetailTier, LodThresholds};
pub use viewport::{ChunkRange, Viewport};
