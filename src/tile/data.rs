//! The tile-data record: one fixed-size pixel buffer tracked by a store.
//!
//! A record owns its payload exclusively. The payload lives behind the
//! record's data lock and is `None` while the record is swapped out. The
//! registry only indexes records; it never touches payload bytes.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard};
use serde::Serialize;

use super::memory::MemoryMetric;

/// Tile width in pixels.
pub const TILE_WIDTH: usize = 64;

/// Tile height in pixels.
pub const TILE_HEIGHT: usize = 64;

/// Payload size of one tile for the given pixel size in bytes.
pub const fn tile_bytes(pixel_size: usize) -> usize {
    TILE_WIDTH * TILE_HEIGHT * pixel_size
}

/// Registry position sentinel for records that are not registered.
pub(crate) const UNREGISTERED: u64 = u64::MAX;

/// Shared read access to a resident payload.
pub type TileDataReadGuard<'a> = MappedRwLockReadGuard<'a, [u8]>;

/// Exclusive write access to a resident payload.
pub type TileDataWriteGuard<'a> = MappedRwLockWriteGuard<'a, [u8]>;

type Payload = Option<Box<[u8]>>;

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of a tile-data record, unique within its store.
///
/// Swap backing stores key their entries by this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TileDataId(u64);

impl TileDataId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TileDataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Process-unique identity of a store. Used for ownership checks and
/// iteration tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreId(u64);

impl StoreId {
    pub(crate) fn next() -> Self {
        static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

// =============================================================================
// TileData
// =============================================================================

/// A single tile's pixel buffer and its bookkeeping.
///
/// Records are created by a [`TileDataStore`](crate::store::TileDataStore)
/// through `allocate` or `duplicate` and handed out as `Arc<TileData>`.
/// Payload access goes through the store (`ensure_loaded`,
/// `ensure_loaded_mut`) so swapped-out payloads are paged back in first.
pub struct TileData {
    id: TileDataId,
    owner: StoreId,
    size: usize,

    /// The data lock. `None` while swapped out.
    payload: RwLock<Payload>,

    /// Packed registry slot key, or `UNREGISTERED`.
    position: AtomicU64,

    /// Ready-made duplicates prepared by the pooler.
    pre_clones: SegQueue<Arc<TileData>>,

    /// Set while this record sits in another record's pre-clone queue.
    pooled: AtomicBool,

    /// Number of tiles sharing this data.
    users: AtomicUsize,

    /// Second-chance bit for the swapper.
    accessed: AtomicBool,

    memory: Arc<MemoryMetric>,
}

impl TileData {
    /// Create a record whose payload is `default_pixel` repeated over `size` bytes.
    ///
    /// # Panics
    /// Panics if `default_pixel` is empty or `size` is not a multiple of its length.
    pub(crate) fn new(
        id: TileDataId,
        owner: StoreId,
        size: usize,
        default_pixel: &[u8],
        memory: Arc<MemoryMetric>,
    ) -> Self {
        assert!(
            !default_pixel.is_empty(),
            "default pixel of tile data {} is empty",
            id.get()
        );
        assert!(
            size % default_pixel.len() == 0,
            "tile data size {} is not a multiple of the {}-byte default pixel",
            size,
            default_pixel.len()
        );

        let payload: Box<[u8]> = match default_pixel {
            [byte] => vec![*byte; size].into_boxed_slice(),
            pixel => pixel.iter().copied().cycle().take(size).collect(),
        };

        Self::with_payload(id, owner, payload, memory)
    }

    /// Create a record holding a byte-for-byte copy of `data`, owned by the
    /// same store as `source`.
    pub(crate) fn duplicate_of(id: TileDataId, source: &TileData, data: &[u8]) -> Self {
        Self::with_payload(id, source.owner, Box::from(data), source.memory.clone())
    }

    fn with_payload(
        id: TileDataId,
        owner: StoreId,
        payload: Box<[u8]>,
        memory: Arc<MemoryMetric>,
    ) -> Self {
        memory.payload_loaded(payload.len());
        Self {
            id,
            owner,
            size: payload.len(),
            payload: RwLock::new(Some(payload)),
            position: AtomicU64::new(UNREGISTERED),
            pre_clones: SegQueue::new(),
            pooled: AtomicBool::new(false),
            users: AtomicUsize::new(0),
            accessed: AtomicBool::new(true),
            memory,
        }
    }

    pub fn id(&self) -> TileDataId {
        self.id
    }

    /// Identity of the store that created this record.
    pub fn owner(&self) -> StoreId {
        self.owner
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the payload is currently in memory.
    ///
    /// Blocks while a writer holds the data lock, so it must not be called
    /// while the caller holds a write guard of this same record. Use
    /// [`try_has_payload`](Self::try_has_payload) where that can happen.
    pub fn has_payload(&self) -> bool {
        self.payload.read().is_some()
    }

    /// Non-blocking [`has_payload`](Self::has_payload). `None` when a writer
    /// holds the data lock.
    pub fn try_has_payload(&self) -> Option<bool> {
        self.payload.try_read().map(|payload| payload.is_some())
    }

    /// Whether the record is currently registered in its store.
    pub fn is_registered(&self) -> bool {
        self.position.load(Ordering::Acquire) != UNREGISTERED
    }

    /// Number of tiles sharing this data.
    pub fn users(&self) -> usize {
        self.users.load(Ordering::Acquire)
    }

    /// Record one more tile sharing this data. Returns the new count.
    pub fn acquire_user(&self) -> usize {
        self.users.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Record one tile fewer sharing this data. Returns the new count.
    ///
    /// # Panics
    /// Panics if there are no users.
    pub fn release_user(&self) -> usize {
        let previous = self
            .users
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match previous {
            Ok(n) => n - 1,
            Err(_) => panic!("tile data {} released more users than acquired", self.id),
        }
    }

    /// Number of ready-made duplicates waiting in the pre-clone queue.
    pub fn pre_clone_count(&self) -> usize {
        self.pre_clones.len()
    }

    // -------------------------------------------------------------------------
    // Crate-internal surface used by the store and the reclaimers
    // -------------------------------------------------------------------------

    pub(crate) fn data_lock(&self) -> &RwLock<Payload> {
        &self.payload
    }

    /// Shared access to the payload if it is resident and the lock is free.
    /// Never blocks.
    pub(crate) fn try_read_resident(&self) -> Option<TileDataReadGuard<'_>> {
        let guard = self.payload.try_read()?;
        RwLockReadGuard::try_map(guard, |payload| payload.as_deref()).ok()
    }

    pub(crate) fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub(crate) fn set_position(&self, packed: u64) {
        self.position.store(packed, Ordering::Release);
    }

    pub(crate) fn mark_accessed(&self) {
        self.accessed.store(true, Ordering::Relaxed);
    }

    /// Clear the accessed bit, returning its previous value.
    pub(crate) fn take_accessed(&self) -> bool {
        self.accessed.swap(false, Ordering::Relaxed)
    }

    /// Put a payload back in place after a swap-in.
    pub(crate) fn install_payload(&self, slot: &mut Payload, payload: Box<[u8]>) {
        self.memory.payload_loaded(payload.len());
        *slot = Some(payload);
    }

    /// Take the payload out of memory, for swap-out or release.
    pub(crate) fn evict_payload(&self, slot: &mut Payload) -> Option<Box<[u8]>> {
        let payload = slot.take();
        if let Some(ref bytes) = payload {
            self.memory.payload_released(bytes.len());
        }
        payload
    }

    pub(crate) fn push_pre_clone(&self, clone: Arc<TileData>) {
        clone.pooled.store(true, Ordering::Release);
        self.memory.clone_pooled(clone.size);
        self.pre_clones.push(clone);
    }

    pub(crate) fn pop_pre_clone(&self) -> Option<Arc<TileData>> {
        let clone = self.pre_clones.pop()?;
        clone.leave_pool();
        Some(clone)
    }

    /// Drop every queued pre-clone. Returns how many were dropped.
    pub(crate) fn clear_pre_clones(&self) -> usize {
        let mut dropped = 0;
        while self.pop_pre_clone().is_some() {
            dropped += 1;
        }
        dropped
    }

    fn leave_pool(&self) {
        if self.pooled.swap(false, Ordering::AcqRel) {
            self.memory.clone_unpooled(self.size);
        }
    }
}

impl Drop for TileData {
    fn drop(&mut self) {
        if let Some(payload) = self.payload.get_mut().take() {
            self.memory.payload_released(payload.len());
        }
        self.leave_pool();
    }
}

impl fmt::Debug for TileData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileData")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("registered", &self.is_registered())
            .field("users", &self.users())
            .field("pre_clones", &self.pre_clone_count())
            .finish()
    }
}
