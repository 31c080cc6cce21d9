use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use super::{SwapBackingStore, SwapStatistics};
use crate::error::SwapError;
use crate::tile::TileDataId;

/// Swap backing store that keeps evicted payloads in memory.
///
/// Nothing is actually reclaimed; this exists so the store's swap protocol
/// can run without touching the filesystem.
#[derive(Debug, Default)]
pub struct MemorySwapStore {
    entries: Mutex<HashMap<TileDataId, Bytes>>,
    swap_outs: AtomicU64,
    swap_ins: AtomicU64,
}

impl MemorySwapStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a payload is stored for `id`.
    pub fn contains(&self, id: TileDataId) -> bool {
        self.entries.lock().contains_key(&id)
    }
}

impl SwapBackingStore for MemorySwapStore {
    fn swap_out_tile_data(&self, id: TileDataId, data: &[u8]) -> Result<(), SwapError> {
        self.entries.lock().insert(id, Bytes::copy_from_slice(data));
        self.swap_outs.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn swap_in_tile_data(&self, id: TileDataId, len: usize) -> Result<Box<[u8]>, SwapError> {
        let mut entries = self.entries.lock();

        let actual = entries.get(&id).ok_or(SwapError::NotFound(id))?.len();
        if actual != len {
            return Err(SwapError::SizeMismatch {
                id,
                expected: len,
                actual,
            });
        }

        let data = entries.remove(&id).ok_or(SwapError::NotFound(id))?;
        self.swap_ins.fetch_add(1, Ordering::Relaxed);
        Ok(Box::from(&data[..]))
    }

    fn forget_tile_data(&self, id: TileDataId) {
        self.entries.lock().remove(&id);
    }

    fn statistics(&self) -> SwapStatistics {
        let entries = self.entries.lock();
        SwapStatistics {
            stored_records: entries.len(),
            stored_bytes: entries.values().map(|b| b.len() as u64).sum(),
            swap_outs: self.swap_outs.load(Ordering::Relaxed),
            swap_ins: self.swap_ins.load(Ordering::Relaxed),
            file_bytes: 0,
        }
    }
}
