use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::thread;

use crate::api::log_store::LogStore;
use crate::api::types::LogEntry;
use crate::errors::WalError;
use crate::testing::log_data;
use crate::testing::make_log_entries;
use crate::tests::context::new_testing;

/// Readers work against immutable snapshots, so they may observe any
/// prefix of the writer's progress but never a torn state: every index
/// either round-trips its original payload or reports `NotFound`.
#[test]
fn test_concurrent_readers_during_writes_and_truncation(
) -> Result<(), WalError> {
    let (_ctx, w) = new_testing()?;

    w.store_logs(&make_log_entries(1, 50))?;

    let reads = Arc::new(AtomicU64::new(0));
    let not_found = Arc::new(AtomicU64::new(0));

    let num_threads = 8;
    let iterations = 200;

    let mut handles = Vec::new();
    for thread_id in 0..num_threads {
        let w = w.clone();
        let reads = reads.clone();
        let not_found = not_found.clone();

        handles.push(thread::spawn(move || {
            let mut entry = LogEntry::default();
            for i in 0..iterations {
                let index = 1 + ((thread_id * 37 + i * 13) % 300) as u64;
                match w.get_log(index, &mut entry) {
                    Ok(()) => {
                        assert_eq!(index, entry.index);
                        assert_eq!(
                            log_data(index),
                            entry.data,
                            "payload mismatch at index {}",
                            index
                        );
                        reads.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(WalError::NotFound) => {
                        not_found.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(other) => {
                        panic!("unexpected read error: {:?}", other)
                    }
                }

                // Index queries must stay coherent under concurrency.
                let first = w.first_index().unwrap();
                let last = w.last_index().unwrap();
                if first > 0 && last > 0 {
                    assert!(first <= last);
                }
            }
        }));
    }

    // Writer: grow the log across several rotations, then truncate both
    // ends while readers are in flight.
    for batch in 5..25 {
        w.store_logs(&make_log_entries(batch * 10 + 1, 10))?;
    }
    w.inner.wait_rotate_idle();

    w.truncate_front(120)?;
    w.truncate_back(200)?;

    for handle in handles {
        handle.join().expect("reader thread panicked");
    }

    assert_eq!(120, w.first_index()?);
    assert_eq!(200, w.last_index()?);

    let mut entry = LogEntry::default();
    w.get_log(120, &mut entry)?;
    assert_eq!(log_data(120), entry.data);
    assert!(matches!(
        w.get_log(201, &mut entry),
        Err(WalError::NotFound)
    ));

    // Sanity: the readers actually exercised both outcomes.
    assert!(reads.load(Ordering::Relaxed) > 0);

    Ok(())
}
