//! Secondary storage for evicted tile payloads.
//!
//! The store pages payloads out through a [`SwapBackingStore`] when memory
//! runs short and pages them back in on first access. Two implementations
//! are provided:
//!
//! - [`MemorySwapStore`]: keeps frozen copies in memory (tests, small runs)
//! - [`FileSwapStore`]: writes payloads to an anonymous temporary file

mod file;
mod memory;

use serde::Serialize;
use tracing::info;

use crate::error::SwapError;
use crate::tile::TileDataId;

pub use file::FileSwapStore;
pub use memory::MemorySwapStore;

/// Counters reported by a swap backing store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SwapStatistics {
    /// Records currently held by the backing store
    pub stored_records: usize,

    /// Payload bytes currently held by the backing store
    pub stored_bytes: u64,

    /// Total successful swap-outs
    pub swap_outs: u64,

    /// Total successful swap-ins
    pub swap_ins: u64,

    /// Size of the underlying file, if any
    pub file_bytes: u64,
}

/// Storage for payloads that have been evicted from memory.
///
/// Every call is made while the caller holds the record's data lock
/// exclusively, so a backing store never sees two concurrent operations for
/// the same [`TileDataId`].
pub trait SwapBackingStore: Send + Sync {
    /// Persist `data` for `id`. On success the caller drops its in-memory copy.
    fn swap_out_tile_data(&self, id: TileDataId, data: &[u8]) -> Result<(), SwapError>;

    /// Return the payload stored for `id` and release the stored copy.
    fn swap_in_tile_data(&self, id: TileDataId, len: usize) -> Result<Box<[u8]>, SwapError>;

    /// Release whatever is stored for `id`. Unknown ids are ignored.
    fn forget_tile_data(&self, id: TileDataId);

    fn statistics(&self) -> SwapStatistics;

    /// Log the current statistics.
    fn debug_statistics(&self) {
        let stats = self.statistics();
        info!(
            stored_records = stats.stored_records,
            stored_bytes = stats.stored_bytes,
            swap_outs = stats.swap_outs,
            swap_ins = stats.swap_ins,
            file_bytes = stats.file_bytes,
            "Swap backing store statistics"
        );
    }
}
