//! Scoped iteration over a store's registry.
//!
//! Every iterator holds the registry lock for its whole lifetime: starting
//! an iteration acquires it, dropping the iterator (or calling `end`)
//! releases it. The shared iterators take the lock recursively, so a thread
//! may nest them. No iterator may be held across a call that registers or
//! unregisters records on the same thread.
//!
//! Items are yielded as `Arc<TileData>` handles. Inside an iteration, record
//! data locks must only be *tried*: a record being freed holds its data lock
//! while waiting for the registry lock.

use std::sync::Arc;

use parking_lot::{RwLockReadGuard, RwLockWriteGuard};

use super::registry::{enter_iteration, exit_iteration, Registry, NIL};
use crate::tile::TileData;

// =============================================================================
// Forward
// =============================================================================

/// Walks the registry from the oldest record to the newest.
pub struct StoreIterator<'a> {
    registry: RwLockReadGuard<'a, Registry>,
    cursor: u32,
}

impl<'a> StoreIterator<'a> {
    pub(crate) fn new(registry: RwLockReadGuard<'a, Registry>) -> Self {
        enter_iteration(registry.store());
        let cursor = registry.head();
        Self { registry, cursor }
    }

    pub fn has_next(&self) -> bool {
        self.cursor != NIL
    }

    /// Release the registry lock.
    pub fn end(self) {}
}

impl Iterator for StoreIterator<'_> {
    type Item = Arc<TileData>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        let td = self.registry.entry(self.cursor).clone();
        self.cursor = self.registry.next_of(self.cursor);
        Some(td)
    }
}

impl Drop for StoreIterator<'_> {
    fn drop(&mut self) {
        exit_iteration(self.registry.store());
    }
}

// =============================================================================
// Reverse
// =============================================================================

/// Walks the registry from the newest record to the oldest.
pub struct StoreReverseIterator<'a> {
    registry: RwLockReadGuard<'a, Registry>,
    cursor: u32,
}

impl<'a> StoreReverseIterator<'a> {
    pub(crate) fn new(registry: RwLockReadGuard<'a, Registry>) -> Self {
        enter_iteration(registry.store());
        let cursor = registry.tail();
        Self { registry, cursor }
    }

    pub fn has_next(&self) -> bool {
        self.cursor != NIL
    }

    pub fn end(self) {}
}

impl Iterator for StoreReverseIterator<'_> {
    type Item = Arc<TileData>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        let td = self.registry.entry(self.cursor).clone();
        self.cursor = self.registry.prev_of(self.cursor);
        Some(td)
    }
}

impl Drop for StoreReverseIterator<'_> {
    fn drop(&mut self) {
        exit_iteration(self.registry.store());
    }
}

// =============================================================================
// Clock
// =============================================================================

/// One full round over the registry starting at the persisted clock cursor.
///
/// The walk runs from the cursor to the list end, wraps to the head and
/// stops when it gets back to where it started. When the cursor is at the
/// list end or the head, the walk is a single head-to-end pass.
///
/// When the iterator ends, the position of the next unvisited record
/// becomes the new cursor, so successive sweeps make progress around the
/// registry. Concurrent clock iterations each persist their own final
/// position; the last one to end wins.
pub struct StoreClockIterator<'a> {
    registry: RwLockReadGuard<'a, Registry>,
    current: u32,
    start: u32,
    end_reached: bool,
}

impl<'a> StoreClockIterator<'a> {
    pub(crate) fn new(registry: RwLockReadGuard<'a, Registry>) -> Self {
        enter_iteration(registry.store());
        let position = registry.clock_position();

        let (current, start, end_reached) = if position == NIL || position == registry.head() {
            (registry.head(), NIL, true)
        } else {
            (position, position, false)
        };

        Self {
            registry,
            current,
            start,
            end_reached,
        }
    }

    pub fn has_next(&self) -> bool {
        !(self.end_reached && self.current == self.start)
    }

    /// End the iteration, persisting the cursor.
    pub fn end(self) {}
}

impl Iterator for StoreClockIterator<'_> {
    type Item = Arc<TileData>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_next() {
            return None;
        }

        if self.current == NIL {
            self.current = self.registry.head();
            self.end_reached = true;
            if !self.has_next() {
                return None;
            }
        }

        let td = self.registry.entry(self.current).clone();
        self.current = self.registry.next_of(self.current);
        Some(td)
    }
}

impl Drop for StoreClockIterator<'_> {
    fn drop(&mut self) {
        self.registry.set_clock_position(self.current);
        exit_iteration(self.registry.store());
    }
}

// =============================================================================
// Exclusive
// =============================================================================

/// Forward walk holding the registry lock exclusively.
///
/// No record can be registered or unregistered and no other iteration can
/// run until this iterator ends.
pub struct StoreExclusiveIterator<'a> {
    registry: RwLockWriteGuard<'a, Registry>,
    cursor: u32,
}

impl<'a> StoreExclusiveIterator<'a> {
    pub(crate) fn new(registry: RwLockWriteGuard<'a, Registry>) -> Self {
        enter_iteration(registry.store());
        let cursor = registry.head();
        Self { registry, cursor }
    }

    pub fn has_next(&self) -> bool {
        self.cursor != NIL
    }

    pub fn end(self) {}
}

impl Iterator for StoreExclusiveIterator<'_> {
    type Item = Arc<TileData>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        let td = self.registry.entry(self.cursor).clone();
        self.cursor = self.registry.next_of(self.cursor);
        Some(td)
    }
}

impl Drop for StoreExclusiveIterator<'_> {
    fn drop(&mut self) {
        exit_iteration(self.registry.store());
    }
}
