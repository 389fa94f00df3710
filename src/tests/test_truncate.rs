use pretty_assertions::assert_eq;

use crate::api::log_store::LogStore;
use crate::api::types::LogEntry;
use crate::errors::WalError;
use crate::testing::log_data;
use crate::testing::make_log_entries;
use crate::tests::context::new_testing;
use crate::tests::context::TestContext;

#[test]
fn test_truncate_front_below_first_is_noop() -> Result<(), WalError> {
    let (ctx, w) = new_testing()?;

    w.store_logs(&make_log_entries(5, 10))?;
    w.truncate_front(3)?;

    assert_eq!(5, w.first_index()?);
    assert_eq!(14, w.last_index()?);
    assert!(ctx.storage.deleted_base_indexes().is_empty());

    Ok(())
}

#[test]
fn test_truncate_front_within_segment() -> Result<(), WalError> {
    let (ctx, w) = new_testing()?;

    w.store_logs(&make_log_entries(1, 10))?;
    w.truncate_front(5)?;

    assert_eq!(5, w.first_index()?);
    assert_eq!(10, w.last_index()?);

    let mut entry = LogEntry::default();
    assert!(matches!(w.get_log(4, &mut entry), Err(WalError::NotFound)));
    w.get_log(5, &mut entry)?;
    assert_eq!(log_data(5), entry.data);

    // The head segment survives with a raised min_index.
    let meta = ctx.storage.meta_state();
    assert_eq!(1, meta.segments.len());
    assert_eq!(5, meta.segments[0].min_index);
    assert!(ctx.storage.deleted_base_indexes().is_empty());
    ctx.storage.assert_valid_meta();

    // Appends are unaffected.
    w.store_logs(&make_log_entries(11, 2))?;
    assert_eq!(12, w.last_index()?);

    Ok(())
}

#[test]
fn test_truncate_front_deletes_whole_segments() -> Result<(), WalError> {
    let ctx = TestContext::new()?;
    ctx.storage.add_full_segment();
    ctx.storage.add_full_segment();
    ctx.storage.add_tail_segment(50);

    let w = ctx.open_wal()?;
    w.truncate_front(150)?;

    assert_eq!(150, w.first_index()?);
    assert_eq!(250, w.last_index()?);

    let mut entry = LogEntry::default();
    assert!(matches!(
        w.get_log(149, &mut entry),
        Err(WalError::NotFound)
    ));
    w.get_log(150, &mut entry)?;
    assert_eq!(log_data(150), entry.data);
    w.get_log(250, &mut entry)?;

    assert_eq!(vec![1], ctx.storage.deleted_base_indexes());
    assert!(ctx.storage.all_deleted_closed());

    let meta = ctx.storage.meta_state();
    assert_eq!(2, meta.segments.len());
    assert_eq!(101, meta.segments[0].base_index);
    assert_eq!(150, meta.segments[0].min_index);

    // 100 entries with the first segment, plus 49 ahead of the new min in
    // the surviving one.
    assert_eq!(149, w.metrics().entries_truncated_front);

    Ok(())
}

/// Truncating past the end resets the log to empty; the next append may
/// then start at any index.
#[test]
fn test_truncate_front_past_end_resets_log() -> Result<(), WalError> {
    let (ctx, w) = new_testing()?;

    w.store_logs(&make_log_entries(1, 10))?;
    w.truncate_front(100)?;

    assert_eq!(0, w.first_index()?);
    assert_eq!(0, w.last_index()?);

    let mut entry = LogEntry::default();
    assert!(matches!(w.get_log(5, &mut entry), Err(WalError::NotFound)));
    assert_eq!(vec![1], ctx.storage.deleted_base_indexes());
    assert!(ctx.storage.all_deleted_closed());

    // The replacement tail is seeded at old last + 1 so a consensus
    // restore that continues from there avoids another re-create.
    let meta = ctx.storage.meta_state();
    assert_eq!(1, meta.segments.len());
    assert_eq!(11, meta.segments[0].base_index);
    assert!(!meta.segments[0].is_sealed());

    // The next append picks its own base index.
    w.store_logs(&make_log_entries(100, 1))?;
    assert_eq!(100, w.first_index()?);
    assert_eq!(100, w.last_index()?);
    w.get_log(100, &mut entry)?;
    assert_eq!(log_data(100), entry.data);

    let meta = ctx.storage.meta_state();
    assert_eq!(1, meta.segments.len());
    assert_eq!(100, meta.segments[0].base_index);
    ctx.storage.assert_valid_meta();

    Ok(())
}

#[test]
fn test_truncate_back_beyond_last_is_noop() -> Result<(), WalError> {
    let (ctx, w) = new_testing()?;

    w.store_logs(&make_log_entries(1, 10))?;
    w.truncate_back(15)?;

    assert_eq!(10, w.last_index()?);
    let meta = ctx.storage.meta_state();
    assert_eq!(1, meta.segments.len());
    assert!(!meta.segments[0].is_sealed());

    Ok(())
}

#[test]
fn test_truncate_back_below_first_is_out_of_range() -> Result<(), WalError> {
    let ctx = TestContext::new()?;
    ctx.storage.add_full_segment();
    ctx.storage.add_tail_segment(10);

    let w = ctx.open_wal()?;
    w.truncate_front(50)?;

    match w.truncate_back(30) {
        Err(WalError::OutOfRange(e)) => {
            assert_eq!(50, e.first);
            assert_eq!(110, e.last);
            assert_eq!(30, e.index);
        }
        other => panic!("expected OutOfRange, got {:?}", other),
    }

    Ok(())
}

#[test]
fn test_truncate_back_within_tail() -> Result<(), WalError> {
    let (ctx, w) = new_testing()?;

    w.store_logs(&make_log_entries(1, 10))?;
    w.truncate_back(7)?;

    assert_eq!(1, w.first_index()?);
    assert_eq!(7, w.last_index()?);

    let mut entry = LogEntry::default();
    assert!(matches!(w.get_log(8, &mut entry), Err(WalError::NotFound)));
    w.get_log(7, &mut entry)?;
    assert_eq!(log_data(7), entry.data);

    // The old tail is sealed in place at the new max and a fresh tail
    // starts after it.
    let meta = ctx.storage.meta_state();
    assert_eq!(2, meta.segments.len());
    assert!(meta.segments[0].is_sealed());
    assert_eq!(7, meta.segments[0].max_index);
    assert!(!meta.segments[1].is_sealed());
    assert_eq!(8, meta.segments[1].base_index);
    ctx.storage.assert_valid_meta();

    // A subsequent append must continue from the new last index.
    assert!(matches!(
        w.store_logs(&make_log_entries(10, 1)),
        Err(WalError::NonMonotonic(_))
    ));
    w.store_logs(&make_log_entries(8, 2))?;
    assert_eq!(9, w.last_index()?);

    Ok(())
}

#[test]
fn test_truncate_back_into_earlier_segment() -> Result<(), WalError> {
    let ctx = TestContext::new()?;
    ctx.storage.add_full_segment();
    ctx.storage.add_full_segment();
    ctx.storage.add_tail_segment(50);

    let w = ctx.open_wal()?;
    w.truncate_back(150)?;

    assert_eq!(1, w.first_index()?);
    assert_eq!(150, w.last_index()?);

    // The third segment is gone, closed before deletion.
    assert_eq!(vec![201], ctx.storage.deleted_base_indexes());
    assert!(ctx.storage.all_deleted_closed());

    let meta = ctx.storage.meta_state();
    assert_eq!(3, meta.segments.len());
    assert_eq!(100, meta.segments[0].max_index);
    // The middle segment is re-sealed at the truncation point.
    assert!(meta.segments[1].is_sealed());
    assert_eq!(150, meta.segments[1].max_index);
    // And a fresh empty tail picks up right after it.
    assert!(!meta.segments[2].is_sealed());
    assert_eq!(151, meta.segments[2].base_index);
    ctx.storage.assert_valid_meta();

    let mut entry = LogEntry::default();
    w.get_log(150, &mut entry)?;
    assert_eq!(log_data(150), entry.data);
    assert!(matches!(
        w.get_log(151, &mut entry),
        Err(WalError::NotFound)
    ));
    assert!(matches!(
        w.get_log(200, &mut entry),
        Err(WalError::NotFound)
    ));

    w.store_logs(&make_log_entries(151, 3))?;
    assert_eq!(153, w.last_index()?);

    Ok(())
}

/// Back-truncation always installs a fresh tail, even when it lands
/// exactly on the current last index.
#[test]
fn test_truncate_back_at_tail_boundary() -> Result<(), WalError> {
    let ctx = TestContext::new()?;
    ctx.storage.add_full_segment();
    ctx.storage.add_tail_segment(20);

    let w = ctx.open_wal()?;
    w.truncate_back(120)?;

    assert_eq!(120, w.last_index()?);
    assert!(ctx.storage.deleted_base_indexes().is_empty());

    let meta = ctx.storage.meta_state();
    assert_eq!(3, meta.segments.len());
    assert!(meta.segments[1].is_sealed());
    assert_eq!(120, meta.segments[1].max_index);
    assert_eq!(121, meta.segments[2].base_index);

    w.store_logs(&make_log_entries(121, 1))?;
    assert_eq!(121, w.last_index()?);

    Ok(())
}

/// Readers holding a snapshot keep reading truncated segments; files are
/// closed and deleted only after the last snapshot drops.
#[test]
fn test_readers_survive_truncation() -> Result<(), WalError> {
    let (ctx, w) = new_testing()?;

    w.store_logs(&make_log_entries(1, 10))?;

    let snapshot = w.inner.load_state();

    w.truncate_front(100)?;
    assert_eq!(0, w.first_index()?);

    // The snapshot defers the cleanup and still serves reads.
    assert!(ctx.storage.deleted_base_indexes().is_empty());
    let mut entry = LogEntry::default();
    snapshot.get_log(5, &mut entry)?;
    assert_eq!(log_data(5), entry.data);

    drop(snapshot);
    assert_eq!(1, ctx.storage.deleted_base_indexes().len());
    assert!(ctx.storage.all_deleted_closed());

    Ok(())
}
