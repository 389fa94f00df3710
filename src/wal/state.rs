use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;

use log::error;

use crate::api::filer::SegmentFiler;
use crate::api::segment::SegmentReader;
use crate::api::segment::SegmentWriter;
use crate::api::types::LogEntry;
use crate::api::types::PersistentState;
use crate::api::types::SegmentInfo;
use crate::api::types::Types;
use crate::errors::WalError;

/// Read handle on one live segment.
///
/// The tail is served by its writer so that the engine never re-opens a
/// file it already has exclusive access to; sealed segments get a plain
/// reader.
pub(crate) enum SegmentHandle<T: Types> {
    Sealed(Arc<T::Reader>),
    Tail(Arc<T::Writer>),
}

impl<T: Types> Clone for SegmentHandle<T> {
    fn clone(&self) -> Self {
        match self {
            SegmentHandle::Sealed(r) => SegmentHandle::Sealed(r.clone()),
            SegmentHandle::Tail(w) => SegmentHandle::Tail(w.clone()),
        }
    }
}

impl<T: Types> SegmentHandle<T> {
    pub(crate) fn get_log(
        &self,
        index: u64,
        out: &mut LogEntry,
    ) -> Result<(), WalError> {
        match self {
            SegmentHandle::Sealed(r) => r.get_log(index, out),
            SegmentHandle::Tail(w) => w.get_log(index, out),
        }
    }

    pub(crate) fn close(&self) -> Result<(), WalError> {
        match self {
            SegmentHandle::Sealed(r) => r.close(),
            SegmentHandle::Tail(w) => w.close(),
        }
    }
}

/// One segment in a `State` snapshot: its metadata plus the open handle.
///
/// `reader` is `None` only between metadata commit and file creation
/// within a single transaction; published snapshots always carry a handle.
pub(crate) struct SegmentState<T: Types> {
    pub(crate) info: SegmentInfo,
    pub(crate) reader: Option<SegmentHandle<T>>,
}

impl<T: Types> Clone for SegmentState<T> {
    fn clone(&self) -> Self {
        Self {
            info: self.info.clone(),
            reader: self.reader.clone(),
        }
    }
}

/// Deferred cleanup attached to a retired state. Runs exactly once, when
/// the last holder of the snapshot drops it, so in-flight readers can keep
/// using truncated segments until they release.
pub(crate) struct Finalizer<T: Types> {
    pub(crate) to_close: Vec<SegmentHandle<T>>,
    /// `(base_index, id)` pairs of segment files to unlink.
    pub(crate) to_delete: Vec<(u64, u64)>,
    pub(crate) filer: Arc<T::Filer>,
}

impl<T: Types> Finalizer<T> {
    fn run(self) {
        for handle in self.to_close {
            if let Err(e) = handle.close() {
                error!("error closing retired segment file: {}", e);
            }
        }
        for (base_index, id) in self.to_delete {
            if let Err(e) = self.filer.delete(base_index, id) {
                // Non-fatal. The file is leaked until manual cleanup but
                // correctness holds.
                error!(
                    "failed to delete retired segment base_index={} id={}: {}",
                    base_index, id, e
                );
            }
        }
    }
}

/// Immutable snapshot of all live segments plus the tail handle.
///
/// Readers clone the `Arc<State>` out of the published slot and use it
/// without any lock; writers build a mutated shallow copy and publish it
/// atomically. A finalizer attached by the replacing transaction runs when
/// the last clone drops.
pub(crate) struct State<T: Types> {
    /// Live segments keyed by `base_index`, iterated ascending.
    pub(crate) segments: BTreeMap<u64, SegmentState<T>>,

    /// The currently writable segment. `None` only transiently inside a
    /// transaction.
    pub(crate) tail: Option<Arc<T::Writer>>,

    pub(crate) next_segment_id: u64,

    /// Base index to force on the next created segment; 0 means unset.
    /// Set when rewriting an empty tail and after a truncation that erases
    /// all data.
    pub(crate) next_base_index: u64,

    finalizer: Mutex<Option<Finalizer<T>>>,
}

impl<T: Types> State<T> {
    pub(crate) fn new(next_segment_id: u64) -> Self {
        Self {
            segments: BTreeMap::new(),
            tail: None,
            next_segment_id,
            next_base_index: 0,
            finalizer: Mutex::new(None),
        }
    }

    /// Shallow copy for mutation inside a transaction. Segment handles are
    /// shared with the original; the finalizer slot starts empty.
    pub(crate) fn clone_shallow(&self) -> Self {
        Self {
            segments: self.segments.clone(),
            tail: self.tail.clone(),
            next_segment_id: self.next_segment_id,
            next_base_index: self.next_base_index,
            finalizer: Mutex::new(None),
        }
    }

    /// Attach the deferred cleanup for segments this snapshot was the last
    /// state to reference.
    pub(crate) fn set_finalizer(&self, fin: Finalizer<T>) {
        let mut slot = self.finalizer.lock().unwrap();
        debug_assert!(slot.is_none(), "finalizer attached twice");
        *slot = Some(fin);
    }

    /// The durable projection of this snapshot.
    pub(crate) fn persistent(&self) -> PersistentState {
        PersistentState {
            next_segment_id: self.next_segment_id,
            segments: self.segments.values().map(|s| s.info.clone()).collect(),
        }
    }

    /// A copy of the last segment's entry.
    ///
    /// Returning a copy is load-bearing: transactions mutate it and
    /// re-insert it into their cloned state without touching the published
    /// snapshot.
    pub(crate) fn get_tail_info(&self) -> Option<SegmentState<T>> {
        self.segments.values().next_back().cloned()
    }

    /// Install `writer` as the live tail and as the read handle of the
    /// segment it backs. Runs post-commit, before the state is published.
    pub(crate) fn install_tail(
        &mut self,
        base_index: u64,
        writer: Arc<T::Writer>,
    ) {
        self.tail = Some(writer.clone());
        if let Some(seg) = self.segments.get_mut(&base_index) {
            seg.reader = Some(SegmentHandle::Tail(writer));
        }
    }

    pub(crate) fn first_index(&self) -> u64 {
        let Some(seg) = self.segments.values().next() else {
            return 0;
        };
        if !seg.info.is_sealed() {
            // The first segment is also the unsealed tail. An empty tail
            // means an empty log regardless of its base index.
            let empty = match &self.tail {
                Some(tail) => tail.last_index() == 0,
                None => true,
            };
            if empty {
                return 0;
            }
        }
        seg.info.min_index
    }

    pub(crate) fn last_index(&self) -> u64 {
        if let Some(tail) = &self.tail {
            let last = tail.last_index();
            if last > 0 {
                return last;
            }
        }
        // The tail is empty. The highest sealed max_index has the answer:
        // either the last segment itself (sealed transiently during
        // rotation or back-truncation) or the one before the empty tail.
        let mut it = self.segments.values().rev();
        let Some(seg) = it.next() else {
            return 0;
        };
        if seg.info.is_sealed() {
            return seg.info.max_index;
        }
        match it.next() {
            Some(prev) => prev.info.max_index,
            None => 0,
        }
    }

    pub(crate) fn get_log(
        &self,
        index: u64,
        out: &mut LogEntry,
    ) -> Result<(), WalError> {
        // The owning segment is the one with the greatest base_index <= index.
        let seg = self
            .segments
            .range(..=index)
            .next_back()
            .map(|(_, s)| s)
            .ok_or(WalError::NotFound)?;

        if index < seg.info.min_index {
            // Front-truncated away.
            return Err(WalError::NotFound);
        }
        if seg.info.is_sealed() && index > seg.info.max_index {
            return Err(WalError::NotFound);
        }
        match &seg.reader {
            Some(r) => r.get_log(index, out),
            None => Err(WalError::NotFound),
        }
    }
}

impl<T: Types> Drop for State<T> {
    fn drop(&mut self) {
        let fin = self
            .finalizer
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(fin) = fin {
            fin.run();
        }
    }
}
