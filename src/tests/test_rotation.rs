use pretty_assertions::assert_eq;

use crate::api::log_store::LogStore;
use crate::api::types::LogEntry;
use crate::errors::WalError;
use crate::testing::log_data;
use crate::testing::make_log_entries;
use crate::testing::TEST_INDEX_START;
use crate::tests::context::new_testing;

/// Append 250 entries in batches of 10. Test segments seal at 100 entries,
/// so the log must end up as two sealed segments plus a live tail.
#[test]
fn test_segment_rotation() -> Result<(), WalError> {
    let (ctx, w) = new_testing()?;

    for batch in 0..25 {
        w.store_logs(&make_log_entries(batch * 10 + 1, 10))?;
    }

    assert_eq!(1, w.first_index()?);
    assert_eq!(250, w.last_index()?);

    let meta = ctx.storage.meta_state();
    assert_eq!(3, meta.segments.len());

    assert!(meta.segments[0].is_sealed());
    assert_eq!(1, meta.segments[0].base_index);
    assert_eq!(100, meta.segments[0].max_index);
    assert_eq!(TEST_INDEX_START, meta.segments[0].index_start);

    assert!(meta.segments[1].is_sealed());
    assert_eq!(101, meta.segments[1].base_index);
    assert_eq!(200, meta.segments[1].max_index);

    assert!(!meta.segments[2].is_sealed());
    assert_eq!(201, meta.segments[2].base_index);

    // IDs are assigned in order and never reused.
    assert_eq!(vec![0, 1, 2], meta
        .segments
        .iter()
        .map(|s| s.id)
        .collect::<Vec<_>>());
    assert_eq!(3, meta.next_segment_id);
    ctx.storage.assert_valid_meta();

    // Reads work across segment boundaries.
    let mut entry = LogEntry::default();
    for index in [1, 100, 101, 150, 200, 201, 250] {
        w.get_log(index, &mut entry)?;
        assert_eq!(log_data(index), entry.data);
    }
    assert!(matches!(
        w.get_log(251, &mut entry),
        Err(WalError::NotFound)
    ));

    assert_eq!(2, w.metrics().segment_rotations);
    assert!(ctx.storage.deleted_base_indexes().is_empty());

    Ok(())
}

/// A batch that lands exactly on the seal boundary leaves the rotation in
/// flight; once it completes there is a sealed segment and a fresh empty
/// tail, and the indexes are unchanged.
#[test]
fn test_rotation_at_exact_boundary() -> Result<(), WalError> {
    let (ctx, w) = new_testing()?;

    w.store_logs(&make_log_entries(1, 100))?;
    w.inner.wait_rotate_idle();

    let meta = ctx.storage.meta_state();
    assert_eq!(2, meta.segments.len());
    assert!(meta.segments[0].is_sealed());
    assert_eq!(100, meta.segments[0].max_index);
    assert!(!meta.segments[1].is_sealed());
    assert_eq!(101, meta.segments[1].base_index);

    // The empty tail does not change the observable indexes.
    assert_eq!(1, w.first_index()?);
    assert_eq!(100, w.last_index()?);

    w.store_logs(&make_log_entries(101, 1))?;
    assert_eq!(101, w.last_index()?);

    let mut entry = LogEntry::default();
    w.get_log(100, &mut entry)?;
    assert_eq!(log_data(100), entry.data);
    w.get_log(101, &mut entry)?;
    assert_eq!(log_data(101), entry.data);

    Ok(())
}

/// Closing with a rotation potentially in flight must neither hang nor
/// leave the store usable.
#[test]
fn test_close_with_rotation_pending() -> Result<(), WalError> {
    let (_ctx, w) = new_testing()?;

    w.store_logs(&make_log_entries(1, 100))?;
    w.close()?;

    assert!(matches!(
        w.store_logs(&make_log_entries(101, 1)),
        Err(WalError::Closed)
    ));
    w.close()?;

    Ok(())
}
