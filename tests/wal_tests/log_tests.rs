//! Tests for the WalLog facade
//!
//! These tests verify:
//! - Payload round-trip through write + replay for every size class
//! - Monotonic positions across rotation
//! - Replay windows, history errors and restart behaviour

use std::path::Path;
use std::sync::Arc;
use std::thread;

use proptest::prelude::*;
use tandemkv::config::{WalConfig, WalSyncStrategy};
use tandemkv::wal::{list_segments, SequenceId, WalLog, PAGE_CAPACITY, PAGE_SIZE};
use tandemkv::TandemError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn wal_config(max_file_size: u64) -> WalConfig {
    WalConfig {
        max_file_size,
        sync_strategy: WalSyncStrategy::EveryWrite,
    }
}

fn open_wal(dir: &Path, max_file_size: u64) -> WalLog {
    let wal = WalLog::new(dir, &wal_config(max_file_size));
    wal.initialize().unwrap();
    wal
}

/// Every record strictly after `from`
fn records_after(wal: &WalLog, from: SequenceId) -> Vec<(SequenceId, Vec<u8>)> {
    let mut records = Vec::new();
    wal.replay_incomplete(from, |id, bytes| {
        if id > from {
            records.push((id, bytes.to_vec()));
        }
        Ok(())
    })
    .unwrap();
    records
}

fn patterned_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// =============================================================================
// Round-Trip Tests
// =============================================================================

#[test]
fn test_empty_directory_starts_at_start() {
    let temp = TempDir::new().unwrap();
    let wal = WalLog::new(temp.path(), &wal_config(1024 * 1024));

    assert_eq!(wal.initialize().unwrap(), SequenceId::START);
    assert_eq!(wal.current_sequence(), SequenceId::START);
}

#[test]
fn test_write_before_initialize_fails() {
    let temp = TempDir::new().unwrap();
    let wal = WalLog::new(temp.path(), &wal_config(1024 * 1024));

    assert!(matches!(wal.write_entry(b"x"), Err(TandemError::WalWrite(_))));
}

#[test]
fn test_round_trip_size_boundaries() {
    let sizes = [
        1,
        PAGE_CAPACITY - 1,
        PAGE_CAPACITY,
        PAGE_CAPACITY + 1,
        PAGE_CAPACITY * 2,
        PAGE_CAPACITY * 2 + 1,
        PAGE_CAPACITY * 10,
    ];

    for size in sizes {
        let temp = TempDir::new().unwrap();
        let wal = open_wal(temp.path(), 1024 * 1024);
        wal.write_entry(b"prefix").unwrap();

        let before = wal.current_sequence();
        let payload = patterned_payload(size);
        let after = wal.write_entry(&payload).unwrap();

        let records = records_after(&wal, before);
        assert_eq!(records.len(), 1, "size {}", size);
        assert_eq!(records[0].0, after, "size {}", size);
        assert_eq!(records[0].1, payload, "size {}", size);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_round_trip_any_size(size in 1usize..=PAGE_CAPACITY * 10) {
        let temp = TempDir::new().unwrap();
        // Small segments so larger payloads also cross rotations
        let wal = open_wal(temp.path(), (PAGE_SIZE * 4) as u64);

        let before = wal.current_sequence();
        let payload = patterned_payload(size);
        wal.write_entry(&payload).unwrap();

        let records = records_after(&wal, before);
        prop_assert_eq!(records.len(), 1);
        prop_assert_eq!(&records[0].1, &payload);
    }
}

// =============================================================================
// Rotation Tests
// =============================================================================

#[test]
fn test_rotation_keeps_positions_monotonic() {
    let temp = TempDir::new().unwrap();
    let wal = open_wal(temp.path(), (PAGE_SIZE * 4) as u64);

    let mut positions = Vec::new();
    for i in 0..25 {
        // Mix of single-page and split entries
        let size = if i % 3 == 0 { PAGE_CAPACITY + 100 } else { 32 };
        positions.push(wal.write_entry(&patterned_payload(size)).unwrap());
    }

    assert!(positions.windows(2).all(|w| w[0] < w[1]));
    assert!(list_segments(temp.path()).unwrap().len() > 1);

    let collections: Vec<u64> = positions.iter().map(|p| p.collection).collect();
    assert_eq!(collections.first(), Some(&1));
    assert!(collections.last().copied().unwrap() > 1);

    // Replay sees every entry, in order, at the positions write_entry returned
    let replayed: Vec<SequenceId> = records_after(&wal, SequenceId::START)
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(replayed, positions);
}

#[test]
fn test_seq_restarts_after_rotation() {
    let temp = TempDir::new().unwrap();
    let wal = open_wal(temp.path(), (PAGE_SIZE * 2) as u64);

    assert_eq!(wal.write_entry(b"a").unwrap(), SequenceId::new(1, 1, 1));
    assert_eq!(wal.write_entry(b"b").unwrap(), SequenceId::new(1, 1, 2));
    assert_eq!(wal.write_entry(b"c").unwrap(), SequenceId::new(1, 2, 1));
}

// =============================================================================
// Replay Window Tests
// =============================================================================

#[test]
fn test_replay_from_tail_is_noop() {
    let temp = TempDir::new().unwrap();
    let wal = open_wal(temp.path(), 1024 * 1024);
    let tail = wal.write_entry(b"a").unwrap();

    let mut calls = 0;
    let returned = wal
        .replay_incomplete(tail, |_, _| {
            calls += 1;
            Ok(())
        })
        .unwrap();

    assert_eq!(calls, 0);
    assert_eq!(returned, tail);
}

#[test]
fn test_replay_ahead_of_tail_fails() {
    let temp = TempDir::new().unwrap();
    let wal = open_wal(temp.path(), 1024 * 1024);
    wal.write_entry(b"a").unwrap();

    let result = wal.replay_incomplete(SequenceId::new(1, 5, 0), |_, _| Ok(()));
    assert!(matches!(result, Err(TandemError::AheadOfTail { .. })));
}

#[test]
fn test_replay_before_retained_history_fails() {
    let temp = TempDir::new().unwrap();
    let wal = open_wal(temp.path(), (PAGE_SIZE * 2) as u64);
    for i in 0..6 {
        wal.write_entry(format!("e{}", i).as_bytes()).unwrap();
    }

    // Drop the oldest segment, as a compaction would
    let oldest = list_segments(temp.path()).unwrap().remove(0);
    std::fs::remove_file(&oldest.path).unwrap();

    let from_start = wal.replay_incomplete(SequenceId::START, |_, _| Ok(()));
    assert!(matches!(
        from_start,
        Err(TandemError::InsufficientHistory { .. })
    ));

    let mut applied = 0;
    let result = wal.replay_incomplete(SequenceId::new(1, 1, 1), |_, _| {
        applied += 1;
        Ok(())
    });
    assert!(matches!(result, Err(TandemError::InsufficientHistory { .. })));
    assert_eq!(applied, 0);
}

#[test]
fn test_replay_starts_at_segment_of_from() {
    let temp = TempDir::new().unwrap();
    let wal = open_wal(temp.path(), (PAGE_SIZE * 2) as u64);
    for i in 0..6 {
        wal.write_entry(format!("e{}", i).as_bytes()).unwrap();
    }

    let mut seen = Vec::new();
    wal.replay_incomplete(SequenceId::new(1, 2, 1), |_, bytes| {
        seen.push(String::from_utf8(bytes.to_vec()).unwrap());
        Ok(())
    })
    .unwrap();

    // The whole of segment 2 and everything after it
    assert_eq!(seen, vec!["e2", "e3", "e4", "e5"]);
}

#[test]
fn test_apply_error_aborts_replay() {
    let temp = TempDir::new().unwrap();
    let wal = open_wal(temp.path(), 1024 * 1024);
    wal.write_entry(b"a").unwrap();
    wal.write_entry(b"b").unwrap();

    let mut calls = 0;
    let result = wal.replay_incomplete(SequenceId::START, |_, _| {
        calls += 1;
        Err(TandemError::Storage("apply failed".to_string()))
    });

    assert!(matches!(result, Err(TandemError::Storage(_))));
    assert_eq!(calls, 1);
}

// =============================================================================
// Restart / Term / Concurrency Tests
// =============================================================================

#[test]
fn test_restart_resumes_at_tail() {
    let temp = TempDir::new().unwrap();
    let tail = {
        let wal = open_wal(temp.path(), (PAGE_SIZE * 3) as u64);
        for i in 0..5 {
            wal.write_entry(format!("e{}", i).as_bytes()).unwrap();
        }
        wal.current_sequence()
    };

    let wal = WalLog::new(temp.path(), &wal_config((PAGE_SIZE * 3) as u64));
    assert_eq!(wal.initialize().unwrap(), tail);

    let next = wal.write_entry(b"after restart").unwrap();
    assert!(next > tail);
    assert_eq!(records_after(&wal, SequenceId::START).len(), 6);
}

#[test]
fn test_start_term_survives_restart() {
    let temp = TempDir::new().unwrap();
    {
        let wal = open_wal(temp.path(), 1024 * 1024);
        wal.write_entry(b"old term").unwrap();
        assert_eq!(wal.start_term(2).unwrap(), SequenceId::new(2, 2, 0));
    }

    let wal = open_wal(temp.path(), 1024 * 1024);
    assert_eq!(wal.current_sequence(), SequenceId::new(2, 2, 0));
    assert_eq!(wal.write_entry(b"new term").unwrap(), SequenceId::new(2, 2, 1));

    let ids: Vec<SequenceId> = records_after(&wal, SequenceId::START)
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(ids, vec![SequenceId::new(1, 1, 1), SequenceId::new(2, 2, 1)]);
}

#[test]
fn test_interval_sync_strategy_writes() {
    let temp = TempDir::new().unwrap();
    let config = WalConfig {
        max_file_size: 1024 * 1024,
        sync_strategy: WalSyncStrategy::Interval { millis: 10 },
    };
    {
        let wal = WalLog::new(temp.path(), &config);
        wal.initialize().unwrap();
        wal.write_entry(b"buffered").unwrap();
        thread::sleep(std::time::Duration::from_millis(50));
    }

    let wal = open_wal(temp.path(), 1024 * 1024);
    assert_eq!(records_after(&wal, SequenceId::START).len(), 1);
}

#[test]
fn test_concurrent_writers_do_not_interleave_pages() {
    let temp = TempDir::new().unwrap();
    let wal = Arc::new(open_wal(temp.path(), (PAGE_SIZE * 8) as u64));

    let handles: Vec<_> = (0..4u8)
        .map(|t| {
            let wal = Arc::clone(&wal);
            thread::spawn(move || {
                for _ in 0..10 {
                    // Split entries so interleaving would corrupt the chain
                    wal.write_entry(&vec![t; PAGE_CAPACITY + 50]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let records = records_after(&wal, SequenceId::START);
    assert_eq!(records.len(), 40);
    for (_, bytes) in records {
        assert!(bytes.iter().all(|&b| b == bytes[0]));
    }
}
