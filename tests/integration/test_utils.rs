//! Test utilities for integration tests.
//!
//! This module provides a call-counting swap backing store with failure
//! injection and helpers for building stores with deterministic reclaimers.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tile_data_store::{
    MemorySwapStore, StoreConfig, SwapBackingStore, SwapError, SwapStatistics, SwapperConfig,
    TileData, TileDataId, TileDataStore,
};

// =============================================================================
// Counting Swap Store
// =============================================================================

/// Calls observed by a [`CountingSwapStore`], shared with the test.
#[derive(Debug, Default)]
pub struct SwapCalls {
    swap_outs: AtomicUsize,
    swap_ins: AtomicUsize,
    forgets: AtomicUsize,
    fail_swap_out: AtomicBool,
    fail_swap_in: AtomicBool,
}

impl SwapCalls {
    pub fn swap_outs(&self) -> usize {
        self.swap_outs.load(Ordering::SeqCst)
    }

    pub fn swap_ins(&self) -> usize {
        self.swap_ins.load(Ordering::SeqCst)
    }

    pub fn forgets(&self) -> usize {
        self.forgets.load(Ordering::SeqCst)
    }

    pub fn set_fail_swap_out(&self, fail: bool) {
        self.fail_swap_out.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_swap_in(&self, fail: bool) {
        self.fail_swap_in.store(fail, Ordering::SeqCst);
    }
}

fn injected_failure() -> SwapError {
    SwapError::Io(io::Error::new(io::ErrorKind::Other, "injected failure"))
}

/// A memory swap store that counts calls and can be told to fail.
pub struct CountingSwapStore {
    inner: MemorySwapStore,
    calls: Arc<SwapCalls>,
}

impl CountingSwapStore {
    pub fn new() -> (Self, Arc<SwapCalls>) {
        let calls = Arc::new(SwapCalls::default());
        let store = Self {
            inner: MemorySwapStore::new(),
            calls: calls.clone(),
        };
        (store, calls)
    }
}

impl SwapBackingStore for CountingSwapStore {
    fn swap_out_tile_data(&self, id: TileDataId, data: &[u8]) -> Result<(), SwapError> {
        if self.calls.fail_swap_out.load(Ordering::SeqCst) {
            return Err(injected_failure());
        }
        self.calls.swap_outs.fetch_add(1, Ordering::SeqCst);
        self.inner.swap_out_tile_data(id, data)
    }

    fn swap_in_tile_data(&self, id: TileDataId, len: usize) -> Result<Box<[u8]>, SwapError> {
        if self.calls.fail_swap_in.load(Ordering::SeqCst) {
            return Err(injected_failure());
        }
        self.calls.swap_ins.fetch_add(1, Ordering::SeqCst);
        self.inner.swap_in_tile_data(id, len)
    }

    fn forget_tile_data(&self, id: TileDataId) {
        self.calls.forgets.fetch_add(1, Ordering::SeqCst);
        self.inner.forget_tile_data(id);
    }

    fn statistics(&self) -> SwapStatistics {
        self.inner.statistics()
    }
}

// =============================================================================
// Store Builders
// =============================================================================

/// A store without reclaimer threads and with limits nothing reaches.
pub fn test_store() -> TileDataStore {
    TileDataStore::in_memory(StoreConfig::without_background()).unwrap()
}

/// Like [`test_store`], swapping through a [`CountingSwapStore`].
pub fn counting_store() -> (TileDataStore, Arc<SwapCalls>) {
    let (backing, calls) = CountingSwapStore::new();
    let store = TileDataStore::new(StoreConfig::without_background(), backing).unwrap();
    (store, calls)
}

/// A store without reclaimer threads using the given swapper limits.
pub fn store_with_limits(soft_limit_bytes: usize, hard_limit_bytes: usize) -> TileDataStore {
    let config = StoreConfig {
        swapper: SwapperConfig {
            soft_limit_bytes,
            hard_limit_bytes,
            ..SwapperConfig::default()
        },
        ..StoreConfig::without_background()
    };
    TileDataStore::in_memory(config).unwrap()
}

/// Record ids in iteration order.
pub fn ids(iter: impl Iterator<Item = Arc<TileData>>) -> Vec<TileDataId> {
    iter.map(|td| td.id()).collect()
}

/// Copy of a record's payload.
pub fn contents(store: &TileDataStore, td: &TileData) -> Vec<u8> {
    store.ensure_loaded(td).unwrap().to_vec()
}
