//! Tile-data records and their memory accounting.
//!
//! # Components
//!
//! - [`TileData`]: one tile's pixel buffer, guarded by its own data lock
//! - [`TileDataId`] / [`StoreId`]: record and store identities
//! - [`MemoryMetric`]: resident and pooled byte counters shared by a store
//!   and its records

mod data;
mod memory;

pub(crate) use data::UNREGISTERED;
pub use data::{
    tile_bytes, StoreId, TileData, TileDataId, TileDataReadGuard, TileDataWriteGuard,
    TILE_HEIGHT, TILE_WIDTH,
};
pub use memory::{MemoryMetric, MemorySnapshot};
