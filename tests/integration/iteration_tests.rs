//! Guarded iteration tests: ordering, clock cursor persistence, lock scope.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::test_utils::{contents, ids, test_store};

// =============================================================================
// Ordering
// =============================================================================

#[test]
fn test_forward_and_reverse_order() {
    let store = test_store();
    let records: Vec<_> = (0..5).map(|_| store.allocate(8, &[0])).collect();
    let expected: Vec<_> = records.iter().map(|td| td.id()).collect();

    assert_eq!(ids(store.begin_iteration()), expected);

    let mut reversed = expected.clone();
    reversed.reverse();
    assert_eq!(ids(store.begin_reverse_iteration()), reversed);

    assert_eq!(ids(store.begin_exclusive_iteration()), expected);
}

#[test]
fn test_freed_records_are_not_visited() {
    let store = test_store();
    let a = store.allocate(8, &[0]);
    let b = store.allocate(8, &[0]);
    let c = store.allocate(8, &[0]);
    let (a_id, c_id) = (a.id(), c.id());

    store.free(b);
    assert_eq!(ids(store.begin_iteration()), vec![a_id, c_id]);

    // The freed slot is reused, the new record goes to the end.
    let d = store.allocate(8, &[0]);
    assert_eq!(ids(store.begin_iteration()), vec![a_id, c_id, d.id()]);
}

#[test]
fn test_has_next_and_explicit_end() {
    let store = test_store();
    let mut iter = store.begin_iteration();
    assert!(!iter.has_next());
    assert!(iter.next().is_none());
    iter.end();

    let _td = store.allocate(8, &[0]);
    let mut iter = store.begin_iteration();
    assert!(iter.has_next());
    iter.next();
    assert!(!iter.has_next());
    iter.end();
}

// =============================================================================
// Clock Cursor
// =============================================================================

#[test]
fn test_clock_resumes_after_freeing_cursor_target() {
    let store = test_store();
    let a = store.allocate(8, &[0]);
    let b = store.allocate(8, &[0]);
    let c = store.allocate(8, &[0]);
    let (a_id, c_id) = (a.id(), c.id());

    let mut clock = store.begin_clock_iteration();
    assert_eq!(clock.next().map(|td| td.id()), Some(a_id));
    clock.end();

    // The cursor points at B; freeing it moves the cursor to C.
    store.free(b);

    assert_eq!(ids(store.begin_clock_iteration()), vec![c_id, a_id]);
}

#[test]
fn test_clock_progresses_across_sessions() {
    let store = test_store();
    let records: Vec<_> = (0..6).map(|_| store.allocate(8, &[0])).collect();
    let all: Vec<_> = records.iter().map(|td| td.id()).collect();

    let mut visited = Vec::new();
    for _ in 0..3 {
        let mut clock = store.begin_clock_iteration();
        visited.extend(clock.by_ref().take(2).map(|td| td.id()));
        clock.end();
    }
    assert_eq!(visited, all);
}

#[test]
fn test_clock_cursor_at_last_record_wraps() {
    let store = test_store();
    let records: Vec<_> = (0..3).map(|_| store.allocate(8, &[0])).collect();
    let all: Vec<_> = records.iter().map(|td| td.id()).collect();

    let mut clock = store.begin_clock_iteration();
    clock.by_ref().take(2).for_each(drop);
    clock.end();

    assert_eq!(ids(store.begin_clock_iteration()), vec![all[2], all[0], all[1]]);
}

#[test]
fn test_clock_cursor_survives_freeing_last_record() {
    let store = test_store();
    let a = store.allocate(8, &[0]);
    let b = store.allocate(8, &[0]);
    let a_id = a.id();

    let mut clock = store.begin_clock_iteration();
    clock.next();
    clock.end();

    // Cursor pointed at B, the last record: it moves to the end.
    store.free(b);
    assert_eq!(ids(store.begin_clock_iteration()), vec![a_id]);
}

#[test]
fn test_empty_clock_iteration() {
    let store = test_store();
    let mut clock = store.begin_clock_iteration();
    assert!(!clock.has_next());
    assert!(clock.next().is_none());
}

// =============================================================================
// Lock Scope
// =============================================================================

#[test]
fn test_nested_shared_iterations() {
    let store = test_store();
    let _a = store.allocate(8, &[0]);
    let _b = store.allocate(8, &[0]);

    let mut pairs = 0;
    for _outer in store.begin_iteration() {
        for _inner in store.begin_reverse_iteration() {
            pairs += 1;
        }
    }
    assert_eq!(pairs, 4);
}

#[test]
fn test_concurrent_shared_iterations() {
    let store = Arc::new(test_store());
    for _ in 0..4 {
        store.allocate(8, &[0]);
    }

    let iteration = store.begin_iteration();
    let other = store.clone();
    let seen = thread::spawn(move || other.begin_reverse_iteration().count())
        .join()
        .unwrap();
    assert_eq!(seen, 4);
    drop(iteration);
}

#[test]
fn test_exclusive_iteration_blocks_allocation() {
    let store = Arc::new(test_store());
    let _existing = store.allocate(8, &[0]);

    let iteration = store.begin_exclusive_iteration();

    let allocated = Arc::new(AtomicBool::new(false));
    let worker = {
        let store = store.clone();
        let allocated = allocated.clone();
        thread::spawn(move || {
            let td = store.allocate(8, &[0]);
            allocated.store(true, Ordering::SeqCst);
            td
        })
    };

    thread::sleep(Duration::from_millis(50));
    assert!(!allocated.load(Ordering::SeqCst));

    iteration.end();
    let td = worker.join().unwrap();
    assert!(allocated.load(Ordering::SeqCst));
    assert!(td.is_registered());
    assert_eq!(store.total_record_count(), 2);
}

#[test]
#[should_panic(expected = "registry iteration")]
fn test_free_inside_iteration_panics() {
    let store = test_store();
    let td = store.allocate(8, &[0]);
    let _iteration = store.begin_iteration();
    store.free(td);
}

#[test]
#[should_panic(expected = "registry iteration")]
fn test_exclusive_inside_shared_iteration_panics() {
    let store = test_store();
    let _iteration = store.begin_clock_iteration();
    let _exclusive = store.begin_exclusive_iteration();
}

#[test]
fn test_iteration_allowed_again_after_end() {
    let store = test_store();
    let iteration = store.begin_iteration();
    iteration.end();

    let td = store.allocate(8, &[0]);
    store.free(td);
}

#[test]
fn test_iterating_one_store_allows_mutating_another() {
    let a = test_store();
    let b = test_store();
    let _a_record = a.allocate(8, &[1]);
    let b_record = b.allocate(16, &[2]);

    let mut iteration = a.begin_iteration();
    assert!(iteration.next().is_some());

    let fresh = b.allocate(16, &[3]);
    let copy = b.duplicate(&b_record).unwrap();
    assert_eq!(contents(&b, &copy), vec![2; 16]);
    b.free(copy);
    b.free(fresh);
    assert_eq!(ids(b.begin_exclusive_iteration()), vec![b_record.id()]);

    iteration.end();
    assert_eq!(a.total_record_count(), 1);
    assert_eq!(b.total_record_count(), 1);
}

#[test]
#[should_panic(expected = "registry iteration")]
fn test_other_store_iteration_does_not_hide_own() {
    let a = test_store();
    let b = test_store();
    let td = a.allocate(8, &[0]);

    let _own = a.begin_iteration();
    let other = b.begin_iteration();
    other.end();
    a.free(td);
}

// =============================================================================
// Diagnostics
// =============================================================================

#[test]
fn test_debug_swap_all_skips_locked_records() {
    let store = test_store();
    let free = store.allocate(8, &[0]);
    let busy = store.allocate(8, &[0]);

    let guard = store.ensure_loaded(&busy).unwrap();
    assert_eq!(store.debug_swap_all(), 1);
    drop(guard);

    assert!(!free.has_payload());
    assert!(busy.has_payload());
    store.debug_print_list();
}
