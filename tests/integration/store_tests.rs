//! Record lifecycle tests: allocation, duplication, freeing, swap round trips.

use std::sync::Arc;

use rand::Rng;
use tile_data_store::{
    tile_bytes, FileSwapStore, StoreConfig, StoreError, StoreStatistics, TileData, TileDataStore,
};

use super::test_utils::{contents, counting_store, test_store};

// =============================================================================
// Record Accounting
// =============================================================================

#[test]
fn test_record_count_tracks_live_records() {
    let store = test_store();
    let mut rng = rand::thread_rng();
    let mut live: Vec<Arc<TileData>> = Vec::new();

    for _ in 0..500 {
        if live.is_empty() || rng.gen_bool(0.6) {
            live.push(store.allocate(16, &[0]));
        } else {
            let index = rng.gen_range(0..live.len());
            store.free(live.swap_remove(index));
        }
        assert_eq!(store.total_record_count(), live.len());
    }

    for td in live.drain(..) {
        store.free(td);
    }
    assert_eq!(store.total_record_count(), 0);
    assert_eq!(store.memory_metric(), 0);
}

#[test]
fn test_duplicates_are_counted() {
    let store = test_store();
    let source = store.allocate(16, &[1]);
    let copy = store.duplicate(&source).unwrap();
    assert_eq!(store.total_record_count(), 2);

    store.free(source);
    assert_eq!(store.total_record_count(), 1);
    assert!(copy.is_registered());
}

#[test]
fn test_allocate_tile_sized_with_pixel_pattern() {
    let store = test_store();
    let td = store.allocate(tile_bytes(4), &[1, 2, 3, 4]);

    let data = store.ensure_loaded(&td).unwrap();
    assert_eq!(data.len(), 64 * 64 * 4);
    assert!(data.chunks(4).all(|pixel| pixel == [1, 2, 3, 4]));
}

#[test]
#[should_panic(expected = "not a multiple")]
fn test_allocate_rejects_partial_pixel() {
    let store = test_store();
    store.allocate(10, &[0, 0, 0, 0]);
}

#[test]
#[should_panic(expected = "default pixel")]
fn test_allocate_rejects_empty_pixel() {
    let store = test_store();
    store.allocate(16, &[]);
}

// =============================================================================
// Swap Round Trips
// =============================================================================

#[test]
fn test_swap_out_then_load_restores_fill() {
    let store = test_store();
    let a = store.allocate(16, &[0xFF]);

    assert!(store.try_swap(&a));
    assert!(!a.has_payload());
    assert_eq!(store.memory_metric(), 0);

    let data = store.ensure_loaded(&a).unwrap();
    assert_eq!(&*data, &[0xFF; 16]);
    drop(data);
    assert!(a.has_payload());
}

#[test]
fn test_swap_preserves_written_content() {
    let store = test_store();
    let td = store.allocate(64, &[0]);
    {
        let mut data = store.ensure_loaded_mut(&td).unwrap();
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = i as u8;
        }
    }
    let before = contents(&store, &td);

    assert!(store.try_swap(&td));
    assert_eq!(contents(&store, &td), before);
}

#[test]
fn test_try_swap_already_swapped_out() {
    let (store, calls) = counting_store();
    let td = store.allocate(8, &[0]);

    assert!(store.try_swap(&td));
    assert!(!store.try_swap(&td));
    assert_eq!(calls.swap_outs(), 1);
}

#[test]
fn test_file_backed_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let backing = FileSwapStore::create_in(dir.path()).unwrap();
    let store = TileDataStore::new(StoreConfig::without_background(), backing).unwrap();

    let records: Vec<_> = (0..8u8).map(|i| store.allocate(256, &[i])).collect();
    for td in &records {
        assert!(store.try_swap(td));
    }
    assert_eq!(store.statistics().swap.stored_records, 8);
    assert_eq!(store.statistics().swap.file_bytes, 8 * 256);

    for (i, td) in records.iter().enumerate() {
        assert_eq!(contents(&store, td), vec![i as u8; 256]);
    }
    assert_eq!(store.statistics().swap.stored_records, 0);

    // Freed extents are recycled.
    assert!(store.try_swap(&records[0]));
    assert_eq!(store.statistics().swap.file_bytes, 8 * 256);
}

// =============================================================================
// Duplication
// =============================================================================

#[test]
fn test_duplicate_miss_is_independent() {
    let store = test_store();
    let a = store.allocate(32, &[0x11]);
    let b = store.duplicate(&a).unwrap();
    assert_eq!(store.statistics().pool_misses, 1);

    store.ensure_loaded_mut(&a).unwrap().fill(0x22);

    assert_eq!(contents(&store, &b), vec![0x11; 32]);
    assert_eq!(contents(&store, &a), vec![0x22; 32]);
}

#[test]
fn test_mutating_duplicate_leaves_source() {
    let store = test_store();
    let a = store.allocate(32, &[7]);
    let b = store.duplicate(&a).unwrap();

    store.ensure_loaded_mut(&b).unwrap()[5] = 99;

    assert_eq!(contents(&store, &a), vec![7; 32]);
}

#[test]
fn test_duplicate_of_swapped_out_source() {
    let (store, calls) = counting_store();
    let a = store.allocate(16, &[3]);
    assert!(store.try_swap(&a));

    let b = store.duplicate(&a).unwrap();
    assert_eq!(calls.swap_ins(), 1);
    assert_eq!(contents(&store, &b), vec![3; 16]);
}

#[test]
#[should_panic(expected = "does not own it")]
fn test_duplicate_from_other_store_panics() {
    let first = test_store();
    let second = test_store();
    let td = first.allocate(8, &[0]);
    let _ = second.duplicate(&td);
}

// =============================================================================
// Freeing
// =============================================================================

#[test]
fn test_free_swapped_out_forgets_backing_entry() {
    let (store, calls) = counting_store();
    let td = store.allocate(16, &[0]);
    assert!(store.try_swap(&td));
    assert_eq!(store.statistics().swap.stored_records, 1);

    store.free(td);
    assert_eq!(calls.forgets(), 1);
    assert_eq!(store.statistics().swap.stored_records, 0);
}

#[test]
fn test_free_resident_does_not_touch_backing_store() {
    let (store, calls) = counting_store();
    let td = store.allocate(16, &[0]);
    store.free(td);
    assert_eq!(calls.forgets(), 0);
}

#[test]
fn test_free_releases_payload_with_outstanding_handles() {
    let store = test_store();
    let td = store.allocate(16, &[0]);
    let handle = td.clone();

    store.free(td);
    assert!(!handle.is_registered());
    assert!(!handle.has_payload());
    assert_eq!(store.memory_metric(), 0);
}

#[test]
#[should_panic(expected = "not registered")]
fn test_double_free_panics() {
    let store = test_store();
    let td = store.allocate(8, &[0]);
    store.free(td.clone());
    store.free(td);
}

#[test]
#[should_panic(expected = "does not own it")]
fn test_free_from_other_store_panics() {
    let first = test_store();
    let second = test_store();
    let td = first.allocate(8, &[0]);
    second.free(td);
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn test_failed_swap_out_keeps_payload() {
    let (store, calls) = counting_store();
    let td = store.allocate(16, &[5]);

    calls.set_fail_swap_out(true);
    assert!(!store.try_swap(&td));
    assert!(td.has_payload());
    assert_eq!(store.memory_metric(), 16);

    calls.set_fail_swap_out(false);
    assert!(store.try_swap(&td));
}

#[test]
fn test_failed_swap_in_is_reported_and_recoverable() {
    let (store, calls) = counting_store();
    let td = store.allocate(16, &[5]);
    assert!(store.try_swap(&td));

    calls.set_fail_swap_in(true);
    let result = store.ensure_loaded(&td);
    assert!(matches!(result, Err(StoreError::Swap(_))));
    drop(result);
    assert!(matches!(
        store.ensure_loaded_mut(&td),
        Err(StoreError::Swap(_))
    ));
    assert!(matches!(store.duplicate(&td), Err(StoreError::Swap(_))));

    calls.set_fail_swap_in(false);
    assert_eq!(contents(&store, &td), vec![5; 16]);
}

#[test]
fn test_invalid_config_rejected() {
    let mut config = StoreConfig::without_background();
    config.swapper.soft_limit_bytes = 2048;
    config.swapper.hard_limit_bytes = 1024;

    let result = TileDataStore::in_memory(config);
    assert!(matches!(result, Err(StoreError::InvalidConfig(_))));
}

// =============================================================================
// Statistics and Teardown
// =============================================================================

#[test]
fn test_statistics_serialize_to_json() {
    let store = test_store();
    let a = store.allocate(16, &[0]);
    let _b = store.duplicate(&a).unwrap();
    assert!(store.try_swap(&a));

    let stats: StoreStatistics = store.statistics();
    assert_eq!(stats.record_count, 2);
    assert_eq!(stats.allocations, 1);
    assert_eq!(stats.pool_misses, 1);
    assert_eq!(stats.swap_outs, 1);
    assert_eq!(stats.memory.resident_bytes, 16);

    let json: serde_json::Value = serde_json::to_value(stats).unwrap();
    assert_eq!(json["record_count"], 2);
    assert_eq!(json["memory"]["resident_bytes"], 16);
    assert_eq!(json["swap"]["stored_records"], 1);
}

#[test]
fn test_drop_releases_all_memory() {
    let store = test_store();
    let memory = store.memory().clone();
    let handle = store.allocate(64, &[0]);
    let swapped = store.allocate(64, &[0]);
    let _copy = store.duplicate(&handle).unwrap();
    assert!(store.try_swap(&swapped));
    assert_eq!(memory.resident_bytes(), 128);

    drop(store);
    assert_eq!(memory.resident_bytes(), 0);
    assert!(!handle.is_registered());
}

#[test]
fn test_free_all_empties_store() {
    let store = test_store();
    for _ in 0..10 {
        store.allocate(8, &[0]);
    }
    assert_eq!(store.free_all(), 10);
    assert_eq!(store.total_record_count(), 0);
    assert_eq!(store.memory_metric(), 0);
}
