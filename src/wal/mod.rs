//! The log-state management engine.
//!
//! All mutations of the published state run as two-phase transactions:
//! metadata is committed durably first, then segment files are mutated, then
//! the new in-memory snapshot is published atomically. Readers work against
//! immutable snapshots and never block the single writer.

pub mod metrics;
pub mod stat;

pub(crate) mod rotate_worker;
pub(crate) mod state;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc::SyncSender;
use std::time::SystemTime;

use log::error;
use log::info;
use log::warn;

use crate::api::filer::SegmentFiler;
use crate::api::log_store::LogStore;
use crate::api::meta_store::MetaStore;
use crate::api::segment::SegmentWriter;
use crate::api::types::LogEntry;
use crate::api::types::SegmentInfo;
use crate::api::types::Types;
use crate::config::Config;
use crate::errors::NonMonotonicLog;
use crate::errors::TruncateOutOfRange;
use crate::errors::UnsealedSegmentNotLast;
use crate::errors::WalError;
use crate::file_lock::FileLock;
use crate::wal::metrics::MetricsSnapshot;
use crate::wal::metrics::WalMetrics;
use crate::wal::rotate_worker::RotateSignal;
use crate::wal::rotate_worker::RotateWorker;
use crate::wal::stat::SegmentStat;
use crate::wal::stat::WalStat;
use crate::wal::state::Finalizer;
use crate::wal::state::SegmentHandle;
use crate::wal::state::SegmentState;
use crate::wal::state::State;

/// A write-ahead log of u64-indexed entries, suitable as the storage layer
/// under a replicated consensus engine.
///
/// Cloning is cheap and all clones share the same log; the handle is safe
/// to use from many threads at once, with a single writer admitted at a
/// time.
pub struct Wal<T: Types> {
    pub(crate) inner: Arc<WalInner<T>>,
}

impl<T: Types> Clone for Wal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Everything guarded by the writer lock: the rotation hand-off channels.
///
/// `await_rotate` is `Some` exactly while a rotation is in flight; the next
/// writer waits on it before touching the tail. `trigger_rotate` is dropped
/// on close, which terminates the worker loop.
pub(crate) struct WriteState {
    pub(crate) await_rotate: Option<Arc<RotateSignal>>,
    pub(crate) trigger_rotate: Option<SyncSender<u64>>,
}

pub(crate) struct WalInner<T: Types> {
    pub(crate) config: Arc<Config>,
    pub(crate) filer: Arc<T::Filer>,
    pub(crate) meta: T::Meta,

    closed: AtomicBool,

    /// The published snapshot. Readers clone the Arc out under a brief read
    /// lock; only `mutate_state` and `close` store to it.
    state: RwLock<Arc<State<T>>>,

    /// Held for every mutation of the published state and every append to
    /// the tail. Readers never take it.
    pub(crate) write: Mutex<WriteState>,

    pub(crate) metrics: WalMetrics,

    _dir_lock: FileLock,
}

/// Outputs of one state transaction, applied by `mutate_state` in order:
/// metadata commit, then `create_tail` post-commit, then publication with
/// `finalizer` attached to the replaced state.
struct TxnOutput<T: Types> {
    finalizer: Option<Finalizer<T>>,
    /// Segment whose file must be created after the metadata commit and
    /// whose writer becomes the new tail.
    create_tail: Option<SegmentInfo>,
}

impl<T: Types> Default for TxnOutput<T> {
    fn default() -> Self {
        Self {
            finalizer: None,
            create_tail: None,
        }
    }
}

impl<T: Types> Wal<T> {
    /// Open the WAL in `config.dir`, recovering from whatever state a crash
    /// left behind. The directory must already exist; an exclusive lock is
    /// taken in it for the lifetime of the returned handle.
    pub fn open(
        config: Config,
        filer: T::Filer,
        meta: T::Meta,
    ) -> Result<Self, WalError> {
        let config = Arc::new(config);
        let dir_lock = FileLock::new(config.clone())?;

        let filer = Arc::new(filer);
        let persisted = meta.load(&config.dir)?;

        let mut state = State::<T>::new(persisted.next_segment_id);

        // Everything on disk starts out as garbage; walking the persisted
        // metadata prunes the set down to actual orphans.
        let mut to_prune = filer.list()?;

        let mut recovered_tail = false;
        let last = persisted.segments.len().saturating_sub(1);
        for (i, info) in persisted.segments.iter().enumerate() {
            to_prune.remove(&info.id);

            if !info.is_sealed() {
                // An unsealed segment must be the final one.
                if i != last {
                    return Err(UnsealedSegmentNotLast::new(
                        info.base_index,
                        info.id,
                    )
                    .into());
                }

                let writer = match filer.recover_tail(info) {
                    Ok(w) => w,
                    Err(e) if e.is_not_found() => {
                        // Crashed after committing the metadata but before
                        // the file existed. The metadata is the source of
                        // truth, so just create the file now.
                        info!(
                            "segment file missing for unsealed tail \
                             base_index={} id={}, creating it",
                            info.base_index, info.id
                        );
                        filer.create(info)?
                    }
                    Err(e) => return Err(e),
                };
                state.tail = Some(writer.clone());
                state.segments.insert(info.base_index, SegmentState {
                    info: info.clone(),
                    reader: Some(SegmentHandle::Tail(writer)),
                });
                recovered_tail = true;
                break;
            }

            let reader = filer.open(info)?;
            state.segments.insert(info.base_index, SegmentState {
                info: info.clone(),
                reader: Some(SegmentHandle::Sealed(reader)),
            });
        }

        if !recovered_tail {
            // Empty log, either brand new or truncated down to nothing. The
            // base index of 1 is a placeholder; the first append replaces
            // the segment if it starts elsewhere.
            let info =
                new_segment(&config, state.next_segment_id, 1);
            state.next_segment_id += 1;
            state.segments.insert(info.base_index, SegmentState {
                info: info.clone(),
                reader: None,
            });

            // Commit before creating the file so a later failure can never
            // re-issue the same segment ID.
            meta.commit(&state.persistent())?;

            let writer = filer.create(&info)?;
            state.install_tail(info.base_index, writer);
        }

        let (trigger_tx, trigger_rx) = std::sync::mpsc::sync_channel(1);

        let inner = Arc::new(WalInner {
            config,
            filer,
            meta,
            closed: AtomicBool::new(false),
            state: RwLock::new(Arc::new(state)),
            write: Mutex::new(WriteState {
                await_rotate: None,
                trigger_rotate: Some(trigger_tx),
            }),
            metrics: WalMetrics::default(),
            _dir_lock: dir_lock,
        });

        // Anything still in the prune set is garbage from a crash before a
        // metadata commit.
        inner.delete_segments(&to_prune);

        RotateWorker::new(Arc::downgrade(&inner), trigger_rx).spawn();

        Ok(Self { inner })
    }

    /// A snapshot of the cumulative operation counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// A description of the live segment set.
    pub fn stat(&self) -> Result<WalStat, WalError> {
        self.inner.check_closed()?;
        let s = self.inner.load_state();
        Ok(WalStat {
            first_index: s.first_index(),
            last_index: s.last_index(),
            segments: s
                .segments
                .values()
                .map(|seg| SegmentStat {
                    id: seg.info.id,
                    base_index: seg.info.base_index,
                    min_index: seg.info.min_index,
                    max_index: seg.info.max_index,
                    sealed: seg.info.is_sealed(),
                })
                .collect(),
        })
    }

    /// Read a caller value stored with `set_stable`.
    pub fn get_stable(&self, key: &[u8]) -> Result<Option<Vec<u8>>, WalError> {
        self.inner.check_closed()?;
        self.inner.meta.get_stable(key)
    }

    /// Durably store a small caller value alongside the log metadata.
    pub fn set_stable(
        &self,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), WalError> {
        self.inner.check_closed()?;
        self.inner.meta.set_stable(key, value)
    }
}

impl<T: Types> LogStore for Wal<T> {
    fn first_index(&self) -> Result<u64, WalError> {
        self.inner.check_closed()?;
        let s = self.inner.load_state();
        Ok(s.first_index())
    }

    fn last_index(&self) -> Result<u64, WalError> {
        self.inner.check_closed()?;
        let s = self.inner.load_state();
        Ok(s.last_index())
    }

    fn get_log(&self, index: u64, out: &mut LogEntry) -> Result<(), WalError> {
        self.inner.check_closed()?;
        let s = self.inner.load_state();
        self.inner.metrics.entries_read.fetch_add(1, Ordering::Relaxed);

        s.get_log(index, out)?;
        out.index = index;
        self.inner
            .metrics
            .entry_bytes_read
            .fetch_add(out.data.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    fn store_logs(&self, entries: &[LogEntry]) -> Result<(), WalError> {
        self.inner.store_logs(entries)
    }

    fn truncate_front(&self, index: u64) -> Result<(), WalError> {
        let res = self.inner.truncate_front(index);
        self.inner
            .metrics
            .truncations_front
            .fetch_add(1, Ordering::Relaxed);
        res
    }

    fn truncate_back(&self, index: u64) -> Result<(), WalError> {
        let res = self.inner.truncate_back(index);
        self.inner
            .metrics
            .truncations_back
            .fetch_add(1, Ordering::Relaxed);
        res
    }

    /// Close all open segment handles and the metadata store. Safe to call
    /// more than once; concurrent operations either complete or observe
    /// `Closed` depending on sequencing.
    fn close(&self) -> Result<(), WalError> {
        self.inner.close()
    }
}

impl<T: Types> WalInner<T> {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn check_closed(&self) -> Result<(), WalError> {
        if self.is_closed() {
            return Err(WalError::Closed);
        }
        Ok(())
    }

    pub(crate) fn load_state(&self) -> Arc<State<T>> {
        self.state.read().unwrap().clone()
    }

    /// Run a state transaction under the writer lock (held by the caller).
    ///
    /// Ordering is the crux of crash safety: the transaction mutates a
    /// shallow clone, the metadata commit makes it durable, the post-commit
    /// file creation runs, and only then is the new state published with
    /// the finalizer attached to the old one. An error at any step leaves
    /// the published state untouched; a crash between commit and file
    /// creation is repaired at the next open.
    fn mutate_state<F>(&self, tx: F) -> Result<(), WalError>
    where F: FnOnce(&mut State<T>) -> Result<TxnOutput<T>, WalError> {
        let old = self.load_state();
        let mut new_state = old.clone_shallow();

        let out = tx(&mut new_state)?;

        self.meta.commit(&new_state.persistent())?;

        if let Some(info) = out.create_tail {
            let writer = self.filer.create(&info)?;
            new_state.install_tail(info.base_index, writer);
        }

        *self.state.write().unwrap() = Arc::new(new_state);
        if let Some(fin) = out.finalizer {
            old.set_finalizer(fin);
        }
        Ok(())
    }

    fn store_logs(&self, entries: &[LogEntry]) -> Result<(), WalError> {
        self.check_closed()?;
        if entries.is_empty() {
            return Ok(());
        }

        let mut write = self.write.lock().unwrap();

        if let Some(signal) = write.await_rotate.clone() {
            // We raced with the background rotation which must complete
            // first; wait without holding the lock.
            drop(write);
            signal.wait();
            write = self.write.lock().unwrap();
            // Close may have been what woke us.
            self.check_closed()?;
        }

        let mut state = self.load_state();

        let mut last_index = state.last_index();

        // An empty log accepts any starting index, but the pre-created
        // empty tail was given a guessed base index. Rather than let the
        // two diverge, replace the tail with one based at the index we are
        // about to write.
        if last_index == 0 {
            let tail_base = state
                .get_tail_info()
                .map(|t| t.info.base_index)
                .unwrap_or(0);
            if entries[0].index != tail_base {
                self.reset_empty_first_segment_base_index(entries[0].index)?;
                state = self.load_state();
            }
        }

        let mut n_bytes = 0u64;
        for entry in entries {
            if last_index > 0 && entry.index != last_index + 1 {
                return Err(
                    NonMonotonicLog::new(last_index, entry.index).into()
                );
            }
            last_index = entry.index;
            n_bytes += entry.data.len() as u64;
        }

        let tail = state.tail.clone().ok_or_else(|| {
            WalError::Invariant("no writable tail segment".to_string())
        })?;
        tail.append(entries)?;

        self.metrics.appends.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .entries_written
            .fetch_add(entries.len() as u64, Ordering::Relaxed);
        self.metrics
            .entry_bytes_written
            .fetch_add(n_bytes, Ordering::Relaxed);

        let (sealed, index_start) = tail.sealed()?;
        if sealed {
            // Rotate in the background so the caller gets on with other
            // work while we mess with files.
            self.trigger_rotate_locked(&mut write, index_start);
        }
        Ok(())
    }

    fn truncate_front(&self, new_min: u64) -> Result<(), WalError> {
        self.check_closed()?;
        let _write = self.write.lock().unwrap();

        let state = self.load_state();
        if new_min < state.first_index() {
            return Ok(());
        }
        // last_index is deliberately not checked: truncating past the end
        // is a reset that empties the log, and the next append may then
        // start anywhere.

        self.truncate_front_locked(new_min)
    }

    fn truncate_back(&self, new_max: u64) -> Result<(), WalError> {
        self.check_closed()?;
        let _write = self.write.lock().unwrap();

        let state = self.load_state();
        let (first, last) = (state.first_index(), state.last_index());
        if new_max > last {
            return Ok(());
        }
        if new_max < first {
            return Err(TruncateOutOfRange::new(first, last, new_max).into());
        }

        self.truncate_back_locked(new_max)
    }

    fn close(&self) -> Result<(), WalError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Wait for any in-flight write, then tear down under the lock.
        let mut write = self.write.lock().unwrap();

        // A writer may be parked on an in-flight rotation; wake it so it
        // re-checks the closed flag instead of hanging.
        if let Some(signal) = write.await_rotate.take() {
            signal.notify();
        }
        // Dropping the sender terminates the rotation worker loop.
        write.trigger_rotate = None;

        let old = {
            let mut slot = self.state.write().unwrap();
            std::mem::replace(&mut *slot, Arc::new(State::new(0)))
        };

        // Old state might still be in use by readers; attach closers for
        // every open segment so files are released after the last read.
        let mut to_close = Vec::new();
        for seg in old.segments.values() {
            if let Some(r) = seg.reader.clone() {
                to_close.push(r);
            }
        }
        old.set_finalizer(Finalizer {
            to_close,
            to_delete: Vec::new(),
            filer: self.filer.clone(),
        });
        drop(old);
        drop(write);

        self.meta.close()
    }

    /// Arm the rotation hand-off. Must hold the writer lock.
    ///
    /// The channel is 1-buffered and at most one rotation is armed at a
    /// time, so the send cannot block.
    fn trigger_rotate_locked(&self, write: &mut WriteState, index_start: u64) {
        if self.is_closed() {
            return;
        }
        write.await_rotate = Some(Arc::new(RotateSignal::new()));
        if let Some(tx) = &write.trigger_rotate {
            if let Err(e) = tx.try_send(index_start) {
                error!("failed to trigger rotation: {}", e);
            }
        }
    }

    /// Seal the tail at `index_start` and create its successor. Runs on
    /// the rotation worker with the writer lock held.
    pub(crate) fn rotate_segment_locked(
        &self,
        index_start: u64,
    ) -> Result<(), WalError> {
        self.metrics
            .segment_rotations
            .fetch_add(1, Ordering::Relaxed);

        self.mutate_state(|new_state| {
            let mut tail = new_state.get_tail_info().ok_or_else(|| {
                WalError::Invariant(
                    "no tail segment found during rotate".to_string(),
                )
            })?;

            let last_index = match &new_state.tail {
                Some(t) => t.last_index(),
                None => 0,
            };
            let seal_time = SystemTime::now();
            if let Ok(age) = seal_time.duration_since(tail.info.create_time) {
                self.metrics
                    .last_segment_age_ms
                    .store(age.as_millis() as u64, Ordering::Relaxed);
            }

            tail.info.seal_time = Some(seal_time);
            tail.info.max_index = last_index;
            tail.info.index_start = index_start;
            new_state.segments.insert(tail.info.base_index, tail);

            let info = self.create_next_segment(new_state);
            Ok(TxnOutput {
                finalizer: None,
                create_tail: Some(info),
            })
        })
    }

    /// Append a fresh segment record to `new_state` and return its info for
    /// post-commit file creation. All segments in the state must be sealed
    /// at this point.
    fn create_next_segment(&self, new_state: &mut State<T>) -> SegmentInfo {
        let next_base_index = match new_state.get_tail_info() {
            Some(tail) => tail.info.max_index + 1,
            None if new_state.next_base_index > 0 => new_state.next_base_index,
            None => 1,
        };

        let info =
            new_segment(&self.config, new_state.next_segment_id, next_base_index);
        new_state.next_segment_id += 1;
        new_state.segments.insert(info.base_index, SegmentState {
            info: info.clone(),
            reader: None,
        });
        info
    }

    /// Replace the empty tail with one based at `new_base_index`. Needed
    /// when the first log written has a different index from the base the
    /// tail was created with (fresh start, or first append after a reset).
    fn reset_empty_first_segment_base_index(
        &self,
        new_base_index: u64,
    ) -> Result<(), WalError> {
        self.mutate_state(|new_state| {
            if new_state.last_index() > 0 {
                return Err(WalError::Invariant(
                    "cannot reset tail base index, log is not empty"
                        .to_string(),
                ));
            }

            let mut to_close = Vec::new();
            let mut to_delete = Vec::new();

            if let Some(tail) = new_state.get_tail_info() {
                if tail.info.base_index == new_base_index {
                    return Ok(TxnOutput::default());
                }
                new_state.segments.remove(&tail.info.base_index);
                new_state.tail = None;
                if let Some(r) = tail.reader {
                    to_close.push(r);
                }
                to_delete.push((tail.info.base_index, tail.info.id));
            }

            new_state.next_base_index = new_base_index;
            let info = self.create_next_segment(new_state);

            Ok(TxnOutput {
                finalizer: Some(Finalizer {
                    to_close,
                    to_delete,
                    filer: self.filer.clone(),
                }),
                create_tail: Some(info),
            })
        })
    }

    fn truncate_front_locked(&self, new_min: u64) -> Result<(), WalError> {
        self.mutate_state(|new_state| {
            let old_last_index = new_state.last_index();

            let mut to_delete = Vec::new();
            let mut to_close = Vec::new();
            let mut head: Option<SegmentState<T>> = None;
            let mut n_truncated = 0u64;

            for seg in new_state.segments.values() {
                let mut max_index = seg.info.max_index;
                if !seg.info.is_sealed() {
                    // The live tail; its effective max is the live last
                    // index. Keep it if it retains anything at or past
                    // new_min.
                    max_index = old_last_index;
                    if max_index >= new_min {
                        head = Some(seg.clone());
                        break;
                    }
                } else if seg.info.max_index >= new_min {
                    head = Some(seg.clone());
                    break;
                }

                to_delete.push((seg.info.base_index, seg.info.id));
                if let Some(r) = seg.reader.clone() {
                    to_close.push(r);
                }
                n_truncated +=
                    (max_index + 1).saturating_sub(seg.info.min_index);
            }

            for (base_index, _) in &to_delete {
                new_state.segments.remove(base_index);
            }

            let mut create_tail = None;
            match head {
                Some(mut head) => {
                    n_truncated +=
                        new_min.saturating_sub(head.info.min_index);
                    head.info.min_index = new_min;
                    new_state.segments.insert(head.info.base_index, head);
                }
                None => {
                    // Nothing is left, not even a tail: the truncation
                    // reset the log past its end. Base the next segment at
                    // old last + 1; the next append replaces it if it
                    // starts elsewhere.
                    new_state.next_base_index = old_last_index + 1;
                    create_tail = Some(self.create_next_segment(new_state));
                }
            }

            self.metrics
                .entries_truncated_front
                .fetch_add(n_truncated, Ordering::Relaxed);

            Ok(TxnOutput {
                finalizer: Some(Finalizer {
                    to_close,
                    to_delete,
                    filer: self.filer.clone(),
                }),
                create_tail,
            })
        })
    }

    fn truncate_back_locked(&self, new_max: u64) -> Result<(), WalError> {
        self.mutate_state(|new_state| {
            let mut to_delete = Vec::new();
            let mut to_close = Vec::new();
            let mut n_truncated = 0u64;

            // Only the final segment can be unsealed, so the live last
            // index read here is its effective max.
            let live_last = new_state.last_index();
            for seg in new_state.segments.values().rev() {
                if seg.info.base_index <= new_max {
                    break;
                }
                let max_index = if seg.info.is_sealed() {
                    seg.info.max_index
                } else {
                    live_last
                };
                to_delete.push((seg.info.base_index, seg.info.id));
                if let Some(r) = seg.reader.clone() {
                    to_close.push(r);
                }
                n_truncated +=
                    (max_index + 1).saturating_sub(seg.info.min_index);
            }

            for (base_index, _) in &to_delete {
                new_state.segments.remove(base_index);
            }

            if let Some(mut tail) = new_state.get_tail_info() {
                let mut max_index = tail.info.max_index;

                // If the partial tail survived the removals above it is
                // still unsealed; seal it in place at the new max.
                if !tail.info.is_sealed() {
                    tail.info.seal_time = Some(SystemTime::now());
                    max_index = new_state.last_index();
                }

                n_truncated += max_index.saturating_sub(new_max);
                tail.info.max_index = new_max;
                new_state.segments.insert(tail.info.base_index, tail);
            }

            // A fresh writable tail starting at new_max + 1, even when the
            // truncation landed exactly on the old tail's last index.
            let info = self.create_next_segment(new_state);

            self.metrics
                .entries_truncated_back
                .fetch_add(n_truncated, Ordering::Relaxed);

            Ok(TxnOutput {
                finalizer: Some(Finalizer {
                    to_close,
                    to_delete,
                    filer: self.filer.clone(),
                }),
                create_tail: Some(info),
            })
        })
    }

    /// Best-effort deletion of segment files; failures leak files but do
    /// not affect correctness.
    fn delete_segments(&self, to_delete: &BTreeMap<u64, u64>) {
        for (id, base_index) in to_delete {
            warn!(
                "deleting orphaned segment file base_index={} id={}",
                base_index, id
            );
            if let Err(e) = self.filer.delete(*base_index, *id) {
                error!(
                    "failed to delete orphaned segment file base_index={} \
                     id={}: {}",
                    base_index, id, e
                );
            }
        }
    }

    /// Block until no rotation is in flight. Test hook.
    #[allow(dead_code)]
    pub(crate) fn wait_rotate_idle(&self) {
        loop {
            let signal = self.write.lock().unwrap().await_rotate.clone();
            match signal {
                Some(s) => s.wait(),
                None => return,
            }
        }
    }
}

/// A fresh `SegmentInfo` with the WAL's configured size limit.
fn new_segment(config: &Config, id: u64, base_index: u64) -> SegmentInfo {
    SegmentInfo {
        id,
        base_index,
        min_index: base_index,
        max_index: 0,
        index_start: 0,
        size_limit: config.segment_size(),
        create_time: SystemTime::now(),
        seal_time: None,
    }
}
