//! Memory accounting shared by a store and every record it creates.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Byte counters for payload memory owned by one store.
///
/// `resident_bytes` covers every in-memory payload, including pre-clones
/// sitting in pools. `pooled_*` track the pre-clones alone.
#[derive(Debug, Default)]
pub struct MemoryMetric {
    resident_bytes: AtomicUsize,
    pooled_clones: AtomicUsize,
    pooled_bytes: AtomicUsize,
}

/// Point-in-time copy of a [`MemoryMetric`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    pub resident_bytes: usize,
    pub pooled_clones: usize,
    pub pooled_bytes: usize,
}

impl MemoryMetric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes of payload currently held in memory.
    pub fn resident_bytes(&self) -> usize {
        self.resident_bytes.load(Ordering::Acquire)
    }

    /// Bytes held by queued pre-clones.
    pub fn pooled_bytes(&self) -> usize {
        self.pooled_bytes.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            resident_bytes: self.resident_bytes(),
            pooled_clones: self.pooled_clones.load(Ordering::Acquire),
            pooled_bytes: self.pooled_bytes(),
        }
    }

    pub(crate) fn payload_loaded(&self, bytes: usize) {
        self.resident_bytes.fetch_add(bytes, Ordering::AcqRel);
    }

    pub(crate) fn payload_released(&self, bytes: usize) {
        self.resident_bytes.fetch_sub(bytes, Ordering::AcqRel);
    }

    pub(crate) fn clone_pooled(&self, bytes: usize) {
        self.pooled_clones.fetch_add(1, Ordering::AcqRel);
        self.pooled_bytes.fetch_add(bytes, Ordering::AcqRel);
    }

    pub(crate) fn clone_unpooled(&self, bytes: usize) {
        self.pooled_clones.fetch_sub(1, Ordering::AcqRel);
        self.pooled_bytes.fetch_sub(bytes, Ordering::AcqRel);
    }
}
