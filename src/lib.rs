//! # Tile Data Store
//!
//! A concurrent store for the pixel buffers ("tile data") of a tiled raster
//! image.
//!
//! The store keeps a registry of every live record and lets background
//! threads reclaim memory while painting, rendering and undo threads keep
//! using it:
//!
//! - **Swap-out**: cold records are evicted to a swap backing store by a
//!   second-chance clock sweep and paged back in on first access
//! - **Pre-cloning**: records shared by several tiles get ready-made copies,
//!   so copy-on-write duplication usually costs no payload copy
//! - **Guarded iteration**: forward, reverse, clock-resuming and exclusive
//!   walks over the registry, each holding the registry lock for its scope
//!
//! ## Architecture
//!
//! - [`tile`] - Tile-data records and memory accounting
//! - [`store`] - Registry, iteration and the [`TileDataStore`] itself
//! - [`swap`] - Swap backing stores (in-memory and file-backed)
//! - [`reclaim`] - Pooler and swapper background workers
//! - [`config`] - Store configuration and the workload CLI
//!
//! ## Example
//!
//! ```rust
//! use tile_data_store::{tile_bytes, StoreConfig, TileDataStore};
//!
//! let store = TileDataStore::in_memory(StoreConfig::without_background()).unwrap();
//!
//! let source = store.allocate(tile_bytes(4), &[0, 0, 0, 255]);
//! let copy = store.duplicate(&source).unwrap();
//!
//! store.ensure_loaded_mut(&copy).unwrap()[0] = 128;
//! assert_eq!(store.ensure_loaded(&source).unwrap()[0], 0);
//!
//! store.free(copy);
//! store.free(source);
//! ```

pub mod config;
pub mod error;
pub mod reclaim;
pub mod store;
pub mod swap;
pub mod tile;

// Re-export commonly used types
pub use config::{Config, PoolerConfig, ReportFormat, StoreConfig, SwapperConfig};
pub use error::{StoreError, SwapError};
pub use reclaim::{Pooler, Swapper};
pub use store::{
    StoreClockIterator, StoreExclusiveIterator, StoreIterator, StoreReverseIterator,
    StoreStatistics, TileDataStore,
};
pub use swap::{FileSwapStore, MemorySwapStore, SwapBackingStore, SwapStatistics};
pub use tile::{
    tile_bytes, MemoryMetric, MemorySnapshot, StoreId, TileData, TileDataId, TileDataReadGuard,
    TileDataWriteGuard, TILE_HEIGHT, TILE_WIDTH,
};
