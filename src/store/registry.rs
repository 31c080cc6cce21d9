//! The store's master list of live tile-data records.
//!
//! Records live in a slot arena. Each occupied slot is also linked into a
//! doubly linked insertion-order list threaded through slot indices, which
//! gives O(1) unregistration and a stable order for sweeps. A record keeps
//! its packed [`SlotKey`] as its registry position; slot generations make a
//! stale key detectable after the slot is recycled.
//!
//! The clock cursor is kept here as well. Removing the record under the
//! cursor moves the cursor to that record's successor first.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::tile::{StoreId, TileData, UNREGISTERED};

/// Link value meaning "no slot" (list end).
pub(crate) const NIL: u32 = u32::MAX;

/// Position of a record in the registry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotKey {
    index: u32,
    generation: u32,
}

impl SlotKey {
    pub(crate) fn pack(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub(crate) fn unpack(packed: u64) -> Option<Self> {
        if packed == UNREGISTERED {
            return None;
        }
        Some(Self {
            index: packed as u32,
            generation: (packed >> 32) as u32,
        })
    }
}

struct Slot {
    generation: u32,
    entry: Option<Arc<TileData>>,
    prev: u32,
    next: u32,
}

pub(crate) struct Registry {
    /// Store this registry belongs to
    store: StoreId,
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    head: u32,
    tail: u32,
    len: usize,
    /// Packed key of the record the next clock sweep starts at, or
    /// `UNREGISTERED` for the list end. Written by clock iterations under
    /// the shared lock, hence atomic.
    clock: AtomicU64,
}

impl Registry {
    pub(crate) fn new(store: StoreId) -> Self {
        Self {
            store,
            slots: Vec::new(),
            free_slots: Vec::new(),
            head: NIL,
            tail: NIL,
            len: 0,
            clock: AtomicU64::new(UNREGISTERED),
        }
    }

    pub(crate) fn store(&self) -> StoreId {
        self.store
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn head(&self) -> u32 {
        self.head
    }

    pub(crate) fn tail(&self) -> u32 {
        self.tail
    }

    pub(crate) fn next_of(&self, index: u32) -> u32 {
        self.slots[index as usize].next
    }

    pub(crate) fn prev_of(&self, index: u32) -> u32 {
        self.slots[index as usize].prev
    }

    /// The record stored at an occupied slot.
    ///
    /// # Panics
    /// Panics if the slot is vacant.
    pub(crate) fn entry(&self, index: u32) -> &Arc<TileData> {
        match self.slots[index as usize].entry {
            Some(ref td) => td,
            None => panic!("registry slot {} is vacant", index),
        }
    }

    fn key_of(&self, index: u32) -> SlotKey {
        SlotKey {
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    fn is_live(&self, key: SlotKey) -> bool {
        self.slots
            .get(key.index as usize)
            .is_some_and(|slot| slot.generation == key.generation && slot.entry.is_some())
    }

    /// Append a record at the end of the list and record its position in it.
    pub(crate) fn insert(&mut self, td: Arc<TileData>) -> SlotKey {
        debug_assert!(!td.is_registered(), "tile data {} registered twice", td.id());

        let index = match self.free_slots.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len())
                    .ok()
                    .filter(|&i| i != NIL)
                    .unwrap_or_else(|| panic!("tile data registry is full"));
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                    prev: NIL,
                    next: NIL,
                });
                index
            }
        };

        let key = self.key_of(index);
        td.set_position(key.pack());

        let slot = &mut self.slots[index as usize];
        slot.entry = Some(td);
        slot.prev = self.tail;
        slot.next = NIL;

        if self.tail == NIL {
            self.head = index;
        } else {
            self.slots[self.tail as usize].next = index;
        }
        self.tail = index;
        self.len += 1;

        key
    }

    /// Unlink a record. If the clock cursor points at it, the cursor moves
    /// to the record's successor first.
    ///
    /// # Panics
    /// Panics if `td` is not registered here.
    pub(crate) fn remove(&mut self, td: &TileData) -> Arc<TileData> {
        let key = SlotKey::unpack(td.position())
            .filter(|&key| self.is_live(key))
            .unwrap_or_else(|| panic!("tile data {} is not registered", td.id()));

        let index = key.index;
        if !std::ptr::eq(Arc::as_ptr(self.entry(index)), td) {
            panic!("tile data {} does not own its registry slot", td.id());
        }

        let (prev, next) = {
            let slot = &self.slots[index as usize];
            (slot.prev, slot.next)
        };

        if *self.clock.get_mut() == key.pack() {
            *self.clock.get_mut() = if next == NIL {
                UNREGISTERED
            } else {
                self.key_of(next).pack()
            };
        }

        if prev == NIL {
            self.head = next;
        } else {
            self.slots[prev as usize].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.slots[next as usize].prev = prev;
        }

        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        slot.prev = NIL;
        slot.next = NIL;
        let removed = slot.entry.take().unwrap_or_else(|| unreachable!());

        self.free_slots.push(index);
        self.len -= 1;
        removed.set_position(UNREGISTERED);
        removed
    }

    /// Unlink every record, in list order.
    pub(crate) fn drain(&mut self) -> Vec<Arc<TileData>> {
        let mut drained = Vec::with_capacity(self.len);
        let mut index = self.head;
        while index != NIL {
            let slot = &mut self.slots[index as usize];
            index = slot.next;
            if let Some(td) = slot.entry.take() {
                td.set_position(UNREGISTERED);
                drained.push(td);
            }
        }

        self.slots.clear();
        self.free_slots.clear();
        self.head = NIL;
        self.tail = NIL;
        self.len = 0;
        *self.clock.get_mut() = UNREGISTERED;
        drained
    }

    /// Slot index the clock cursor points at, or `NIL` for the list end.
    pub(crate) fn clock_position(&self) -> u32 {
        SlotKey::unpack(self.clock.load(Ordering::Acquire))
            .filter(|&key| self.is_live(key))
            .map_or(NIL, |key| key.index)
    }

    pub(crate) fn set_clock_position(&self, index: u32) {
        let packed = if index == NIL {
            UNREGISTERED
        } else {
            self.key_of(index).pack()
        };
        self.clock.store(packed, Ordering::Release);
    }
}

// =============================================================================
// Per-thread iteration tracking
// =============================================================================

thread_local! {
    /// One entry per iteration open on this thread, naming its store.
    static OPEN_ITERATIONS: RefCell<Vec<StoreId>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn enter_iteration(store: StoreId) {
    OPEN_ITERATIONS.with(|open| open.borrow_mut().push(store));
}

pub(crate) fn exit_iteration(store: StoreId) {
    OPEN_ITERATIONS.with(|open| {
        let mut open = open.borrow_mut();
        if let Some(index) = open.iter().rposition(|&s| s == store) {
            open.remove(index);
        }
    });
}

fn iteration_depth(store: StoreId) -> usize {
    OPEN_ITERATIONS.with(|open| open.borrow().iter().filter(|&&s| s == store).count())
}

/// Registry mutation on a thread that is iterating the same store would
/// deadlock on the registry lock. Fail loudly instead. Iterations of other
/// stores do not count.
pub(crate) fn assert_not_iterating(store: StoreId, operation: &str) {
    let depth = iteration_depth(store);
    assert!(
        depth == 0,
        "{} called while this thread holds {} registry iteration(s) of the same store",
        operation,
        depth
    );
}
