//! Store internals shared between the owning handle and the reclaimer threads.
//!
//! # Locking
//!
//! Two kinds of locks are involved: the registry lock (one per store) and
//! the data lock (one per record). The only sequence that holds both is
//! `free`: data lock first, then the registry lock for the unregistration.
//! Code that holds the registry lock (iterations) only *tries* data locks,
//! which is why `try_swap` and the pooler never block on a record.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::iter::{StoreClockIterator, StoreExclusiveIterator, StoreIterator, StoreReverseIterator};
use super::registry::{assert_not_iterating, Registry};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::reclaim::{Pooler, Swapper};
use crate::swap::{SwapBackingStore, SwapStatistics};
use crate::tile::{
    MemoryMetric, MemorySnapshot, StoreId, TileData, TileDataId, TileDataReadGuard,
    TileDataWriteGuard,
};

/// Snapshot of a store's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStatistics {
    /// Registered records
    pub record_count: usize,
    pub memory: MemorySnapshot,
    pub allocations: u64,
    pub frees: u64,
    /// Duplications served from a pre-clone queue
    pub pool_hits: u64,
    /// Duplications that copied the source payload
    pub pool_misses: u64,
    pub swap_outs: u64,
    pub swap_ins: u64,
    pub swap: SwapStatistics,
}

#[derive(Debug, Default)]
struct StoreCounters {
    allocations: AtomicU64,
    frees: AtomicU64,
    pool_hits: AtomicU64,
    pool_misses: AtomicU64,
    swap_outs: AtomicU64,
    swap_ins: AtomicU64,
}

impl StoreCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

pub(crate) struct StoreCore {
    id: StoreId,
    registry: RwLock<Registry>,
    swapped: Box<dyn SwapBackingStore>,
    memory: Arc<MemoryMetric>,
    next_tile_id: AtomicU64,
    counters: StoreCounters,
    pub(crate) pooler: Pooler,
    pub(crate) swapper: Swapper,
}

impl StoreCore {
    pub(crate) fn new(config: &StoreConfig, swapped: Box<dyn SwapBackingStore>) -> Self {
        let id = StoreId::next();
        Self {
            id,
            registry: RwLock::new(Registry::new(id)),
            swapped,
            memory: Arc::new(MemoryMetric::new()),
            next_tile_id: AtomicU64::new(1),
            counters: StoreCounters::default(),
            pooler: Pooler::new(config.pooler.clone()),
            swapper: Swapper::new(config.swapper.clone()),
        }
    }

    pub(crate) fn id(&self) -> StoreId {
        self.id
    }

    pub(crate) fn memory(&self) -> &Arc<MemoryMetric> {
        &self.memory
    }

    fn next_tile_id(&self) -> TileDataId {
        TileDataId::new(self.next_tile_id.fetch_add(1, Ordering::Relaxed))
    }

    fn assert_owned(&self, td: &TileData, operation: &str) {
        assert!(
            td.owner() == self.id,
            "{} of tile data {} through a store that does not own it",
            operation,
            td.id()
        );
    }

    // =========================================================================
    // Registry management
    // =========================================================================

    fn register(&self, td: Arc<TileData>) {
        assert_not_iterating(self.id, "register");
        self.registry.write().insert(td);
    }

    fn unregister(&self, td: &TileData) -> Arc<TileData> {
        assert_not_iterating(self.id, "unregister");
        self.registry.write().remove(td)
    }

    /// Release every registered record. Only called once reclaimers are stopped.
    pub(crate) fn free_all(&self) -> usize {
        assert_not_iterating(self.id, "free_all");
        let drained = self.registry.write().drain();

        // The registry lock is released before any data lock is taken.
        for td in &drained {
            self.release(td);
        }
        drained.len()
    }

    fn release(&self, td: &TileData) {
        let released = {
            let mut payload = td.data_lock().write();
            if payload.is_none() {
                self.swapped.forget_tile_data(td.id());
            }
            td.evict_payload(&mut payload)
        };
        td.clear_pre_clones();
        drop(released);
    }

    pub(crate) fn total_record_count(&self) -> usize {
        self.registry.read_recursive().len()
    }

    // =========================================================================
    // Allocation, duplication, freeing
    // =========================================================================

    pub(crate) fn allocate(&self, size: usize, default_pixel: &[u8]) -> Arc<TileData> {
        self.swapper.check_free_memory(self);

        let td = Arc::new(TileData::new(
            self.next_tile_id(),
            self.id,
            size,
            default_pixel,
            self.memory.clone(),
        ));
        self.register(td.clone());
        StoreCounters::bump(&self.counters.allocations);
        td
    }

    /// Unregistered copy of `source` holding `data`.
    pub(crate) fn clone_tile_data(&self, source: &TileData, data: &[u8]) -> TileData {
        TileData::duplicate_of(self.next_tile_id(), source, data)
    }

    pub(crate) fn duplicate(&self, source: &TileData) -> Result<Arc<TileData>, StoreError> {
        self.assert_owned(source, "duplicate");

        let td = match source.pop_pre_clone() {
            Some(td) => {
                StoreCounters::bump(&self.counters.pool_hits);
                debug!(source = %source.id(), clone = %td.id(), "Pre-clone hit");
                td
            }
            None => {
                // Holding the read guard keeps the source resident for the copy.
                let data = self.ensure_loaded(source)?;
                let td = Arc::new(self.clone_tile_data(source, &data));
                drop(data);

                StoreCounters::bump(&self.counters.pool_misses);
                debug!(source = %source.id(), clone = %td.id(), "Pre-clone miss");
                td
            }
        };

        self.register(td.clone());
        Ok(td)
    }

    pub(crate) fn free(&self, td: Arc<TileData>) {
        self.assert_owned(&td, "free");

        let released = {
            let mut payload = td.data_lock().write();
            if payload.is_none() {
                self.swapped.forget_tile_data(td.id());
            }
            self.unregister(&td);
            td.evict_payload(&mut payload)
        };
        td.clear_pre_clones();
        drop(released);

        StoreCounters::bump(&self.counters.frees);
        trace!(tile_id = %td.id(), "Freed tile data");
    }

    // =========================================================================
    // Swap-in / swap-out
    // =========================================================================

    /// Shared access to the payload, paging it in first if needed.
    ///
    /// While the returned guard is alive the record cannot be swapped out.
    pub(crate) fn ensure_loaded<'a>(
        &self,
        td: &'a TileData,
    ) -> Result<TileDataReadGuard<'a>, StoreError> {
        td.mark_accessed();

        match RwLockReadGuard::try_map(td.data_lock().read(), |p| p.as_deref()) {
            Ok(data) => return Ok(data),
            Err(guard) => drop(guard),
        }

        // Only one upgradable holder at a time: concurrent loaders queue here
        // and the first one does the swap-in. The write guard downgrades
        // atomically, so nothing can swap the payload out in between.
        let upgradable = td.data_lock().upgradable_read();
        let guard = if upgradable.is_some() {
            RwLockUpgradableReadGuard::downgrade(upgradable)
        } else {
            let mut payload = RwLockUpgradableReadGuard::upgrade(upgradable);
            self.swap_in_locked(td, &mut payload)?;
            RwLockWriteGuard::downgrade(payload)
        };

        RwLockReadGuard::try_map(guard, |p| p.as_deref())
            .map_err(|_| StoreError::PayloadMissing(td.id()))
    }

    /// Exclusive access to the payload, paging it in first if needed.
    ///
    /// Queued pre-clones of the record are dropped since they would no
    /// longer match its content.
    pub(crate) fn ensure_loaded_mut<'a>(
        &self,
        td: &'a TileData,
    ) -> Result<TileDataWriteGuard<'a>, StoreError> {
        td.mark_accessed();

        let mut payload = td.data_lock().write();
        if payload.is_none() {
            self.swap_in_locked(td, &mut payload)?;
        }

        let dropped = td.clear_pre_clones();
        if dropped > 0 {
            trace!(tile_id = %td.id(), dropped, "Dropped stale pre-clones");
        }

        RwLockWriteGuard::try_map(payload, |p| p.as_deref_mut())
            .map_err(|_| StoreError::PayloadMissing(td.id()))
    }

    fn swap_in_locked(
        &self,
        td: &TileData,
        payload: &mut Option<Box<[u8]>>,
    ) -> Result<(), StoreError> {
        let data = self.swapped.swap_in_tile_data(td.id(), td.size())?;
        td.install_payload(payload, data);

        StoreCounters::bump(&self.counters.swap_ins);
        trace!(tile_id = %td.id(), "Swapped in tile data");
        Ok(())
    }

    /// Swap the record out if its data lock is free and its payload resident.
    /// Never blocks.
    pub(crate) fn try_swap(&self, td: &TileData) -> bool {
        let Some(mut payload) = td.data_lock().try_write() else {
            return false;
        };
        let Some(data) = payload.as_deref() else {
            return false;
        };

        if let Err(e) = self.swapped.swap_out_tile_data(td.id(), data) {
            warn!(tile_id = %td.id(), error = %e, "Failed to swap out tile data");
            return false;
        }

        drop(td.evict_payload(&mut payload));
        StoreCounters::bump(&self.counters.swap_outs);
        trace!(tile_id = %td.id(), "Swapped out tile data");
        true
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    pub(crate) fn begin_iteration(&self) -> StoreIterator<'_> {
        StoreIterator::new(self.registry.read_recursive())
    }

    pub(crate) fn begin_reverse_iteration(&self) -> StoreReverseIterator<'_> {
        StoreReverseIterator::new(self.registry.read_recursive())
    }

    pub(crate) fn begin_clock_iteration(&self) -> StoreClockIterator<'_> {
        StoreClockIterator::new(self.registry.read_recursive())
    }

    pub(crate) fn begin_exclusive_iteration(&self) -> StoreExclusiveIterator<'_> {
        assert_not_iterating(self.id, "begin_exclusive_iteration");
        StoreExclusiveIterator::new(self.registry.write())
    }

    // =========================================================================
    // Diagnostics
    // =========================================================================

    pub(crate) fn statistics(&self) -> StoreStatistics {
        StoreStatistics {
            record_count: self.total_record_count(),
            memory: self.memory.snapshot(),
            allocations: StoreCounters::get(&self.counters.allocations),
            frees: StoreCounters::get(&self.counters.frees),
            pool_hits: StoreCounters::get(&self.counters.pool_hits),
            pool_misses: StoreCounters::get(&self.counters.pool_misses),
            swap_outs: StoreCounters::get(&self.counters.swap_outs),
            swap_ins: StoreCounters::get(&self.counters.swap_ins),
            swap: self.swapped.statistics(),
        }
    }

    pub(crate) fn debug_print_list(&self) {
        for td in self.begin_iteration() {
            // Contended data locks are reported as unknown rather than waited on.
            let resident = td.try_has_payload();
            debug!(
                tile_id = %td.id(),
                size = td.size(),
                users = td.users(),
                pre_clones = td.pre_clone_count(),
                resident = ?resident,
                "Tile data"
            );
        }
    }

    pub(crate) fn debug_swap_all(&self) -> usize {
        let mut swapped = 0;
        let mut total = 0;
        for td in self.begin_exclusive_iteration() {
            total += 1;
            if self.try_swap(&td) {
                swapped += 1;
            }
        }

        info!(swapped, total, "Swapped out tile data");
        self.swapped.debug_statistics();
        swapped
    }
}
