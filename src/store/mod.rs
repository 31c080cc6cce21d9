//! The tile-data store: registry of live records, swap protocol and
//! reclaimer lifecycle.
//!
//! # Example
//!
//! ```rust
//! use tile_data_store::{StoreConfig, TileDataStore};
//!
//! let store = TileDataStore::in_memory(StoreConfig::without_background()).unwrap();
//!
//! let td = store.allocate(16, &[0xFF]);
//! assert!(store.try_swap(&td));
//!
//! let data = store.ensure_loaded(&td).unwrap();
//! assert!(data.iter().all(|&b| b == 0xFF));
//! drop(data);
//!
//! store.free(td);
//! assert_eq!(store.total_record_count(), 0);
//! ```

mod inner;
mod iter;
mod registry;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::reclaim::{Pooler, ReclaimerThread, Swapper};
use crate::swap::{MemorySwapStore, SwapBackingStore};
use crate::tile::{MemoryMetric, StoreId, TileData, TileDataReadGuard, TileDataWriteGuard};

pub(crate) use inner::StoreCore;
pub use inner::StoreStatistics;
pub use iter::{StoreClockIterator, StoreExclusiveIterator, StoreIterator, StoreReverseIterator};

/// Registry of every live tile-data record of one image.
///
/// Records are handed out as `Arc<TileData>`. The registry keeps its own
/// handle to each record until it is freed; payload memory is released by
/// [`free`](Self::free) even if other handles are still around.
///
/// Dropping the store stops the reclaimer threads, waits for them, then
/// frees every remaining record.
pub struct TileDataStore {
    core: Arc<StoreCore>,
    reclaimers: Mutex<Vec<ReclaimerThread>>,
}

impl TileDataStore {
    /// Create a store swapping to `backing`.
    ///
    /// Starts the pooler and then the swapper thread when
    /// `config.background_workers` is set.
    pub fn new(
        config: StoreConfig,
        backing: impl SwapBackingStore + 'static,
    ) -> Result<Self, StoreError> {
        config.validate().map_err(StoreError::InvalidConfig)?;

        let core = Arc::new(StoreCore::new(&config, Box::new(backing)));
        let mut reclaimers = Vec::new();

        if config.background_workers {
            let pooler_core = core.clone();
            reclaimers.push(ReclaimerThread::spawn(
                "tile-pooler",
                core.pooler.signal(),
                config.pooler.interval,
                move || {
                    pooler_core.pooler.run_cycle(&pooler_core);
                },
            )?);

            let swapper_core = core.clone();
            reclaimers.push(ReclaimerThread::spawn(
                "tile-swapper",
                core.swapper.signal(),
                config.swapper.interval,
                move || {
                    swapper_core.swapper.run_cycle(&swapper_core);
                },
            )?);
        }

        info!(
            store = ?core.id(),
            background_workers = config.background_workers,
            soft_limit_bytes = config.swapper.soft_limit_bytes,
            hard_limit_bytes = config.swapper.hard_limit_bytes,
            "Tile data store created"
        );

        Ok(Self {
            core,
            reclaimers: Mutex::new(reclaimers),
        })
    }

    /// Create a store whose swapped payloads stay in memory.
    pub fn in_memory(config: StoreConfig) -> Result<Self, StoreError> {
        Self::new(config, MemorySwapStore::new())
    }

    pub fn id(&self) -> StoreId {
        self.core.id()
    }

    // =========================================================================
    // Records
    // =========================================================================

    /// Create and register a record of `size` bytes filled with `default_pixel`.
    ///
    /// Runs the swapper's memory check first, which may evict records on the
    /// calling thread when over the hard limit.
    ///
    /// # Panics
    /// Panics if `size` is not a multiple of the pixel length, or if the
    /// calling thread holds an iteration of this store.
    pub fn allocate(&self, size: usize, default_pixel: &[u8]) -> Arc<TileData> {
        self.core.allocate(size, default_pixel)
    }

    /// Register a content-equal copy of `source`.
    ///
    /// Pops a pre-clone when one is queued, otherwise copies the payload
    /// (paging it in if needed).
    pub fn duplicate(&self, source: &TileData) -> Result<Arc<TileData>, StoreError> {
        self.core.duplicate(source)
    }

    /// Unregister `td` and release its payload and swap-store entry.
    ///
    /// # Panics
    /// Panics if `td` belongs to another store or is not registered.
    pub fn free(&self, td: Arc<TileData>) {
        self.core.free(td)
    }

    /// Release every registered record.
    ///
    /// Reclaimer threads must not run concurrently; call
    /// [`stop_reclaimers`](Self::stop_reclaimers) first.
    pub fn free_all(&self) -> usize {
        self.core.free_all()
    }

    /// Shared access to the payload, paging it in if it was swapped out.
    pub fn ensure_loaded<'a>(&self, td: &'a TileData) -> Result<TileDataReadGuard<'a>, StoreError> {
        self.core.ensure_loaded(td)
    }

    /// Exclusive access to the payload, paging it in if it was swapped out.
    /// Drops the record's queued pre-clones.
    pub fn ensure_loaded_mut<'a>(
        &self,
        td: &'a TileData,
    ) -> Result<TileDataWriteGuard<'a>, StoreError> {
        self.core.ensure_loaded_mut(td)
    }

    /// Swap `td` out unless its data lock is taken or it is already swapped
    /// out. Never blocks.
    pub fn try_swap(&self, td: &TileData) -> bool {
        self.core.try_swap(td)
    }

    pub fn total_record_count(&self) -> usize {
        self.core.total_record_count()
    }

    /// Payload bytes currently resident in memory.
    pub fn memory_metric(&self) -> usize {
        self.core.memory().resident_bytes()
    }

    /// The accounting shared by this store and its records. Outlives the
    /// store as long as a handle is kept.
    pub fn memory(&self) -> &Arc<MemoryMetric> {
        self.core.memory()
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Oldest-to-newest walk under the shared registry lock.
    pub fn begin_iteration(&self) -> StoreIterator<'_> {
        self.core.begin_iteration()
    }

    /// Newest-to-oldest walk under the shared registry lock.
    pub fn begin_reverse_iteration(&self) -> StoreReverseIterator<'_> {
        self.core.begin_reverse_iteration()
    }

    /// One round from the persisted clock cursor under the shared registry lock.
    pub fn begin_clock_iteration(&self) -> StoreClockIterator<'_> {
        self.core.begin_clock_iteration()
    }

    /// Oldest-to-newest walk under the exclusive registry lock.
    ///
    /// # Panics
    /// Panics if the calling thread already holds an iteration of this store.
    pub fn begin_exclusive_iteration(&self) -> StoreExclusiveIterator<'_> {
        self.core.begin_exclusive_iteration()
    }

    // =========================================================================
    // Reclaimers
    // =========================================================================

    pub fn pooler(&self) -> &Pooler {
        &self.core.pooler
    }

    pub fn swapper(&self) -> &Swapper {
        &self.core.swapper
    }

    /// Run one pooler pass on the calling thread.
    pub fn run_pooler_cycle(&self) -> usize {
        self.core.pooler.run_cycle(&self.core)
    }

    /// Run one swapper sweep on the calling thread.
    pub fn run_swapper_cycle(&self) -> usize {
        self.core.swapper.run_cycle(&self.core)
    }

    /// Terminate and join the reclaimer threads. Idempotent.
    pub fn stop_reclaimers(&self) {
        let mut reclaimers = self.reclaimers.lock();
        for reclaimer in reclaimers.iter_mut() {
            reclaimer.terminate();
        }
        reclaimers.clear();
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub fn statistics(&self) -> StoreStatistics {
        self.core.statistics()
    }

    /// Log one line per registered record at debug level.
    pub fn debug_print_list(&self) {
        self.core.debug_print_list()
    }

    /// Swap out every record whose data lock is free. Returns how many were
    /// swapped.
    pub fn debug_swap_all(&self) -> usize {
        self.core.debug_swap_all()
    }
}

impl Drop for TileDataStore {
    fn drop(&mut self) {
        self.stop_reclaimers();
        let freed = self.core.free_all();
        debug!(store = ?self.core.id(), freed, "Tile data store dropped");
    }
}
