//! In-memory storage doubles for exercising the engine without touching
//! disk: a combined segment filer + metadata store, and an entry-counting
//! segment that stands in for a real file.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::time::SystemTime;

use byteorder::ByteOrder;
use byteorder::LittleEndian;

use crate::api::filer::SegmentFiler;
use crate::api::meta_store::MetaStore;
use crate::api::segment::SegmentReader;
use crate::api::segment::SegmentWriter;
use crate::api::types::LogEntry;
use crate::api::types::PersistentState;
use crate::api::types::SegmentInfo;
use crate::api::types::Types;
use crate::errors::WalError;

/// Type bundle wiring the engine to the in-memory doubles.
#[allow(dead_code)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TestTypes;

impl Types for TestTypes {
    type Writer = TestSegment;
    type Reader = TestSegment;
    type Filer = TestStorage;
    type Meta = TestStorage;
}

/// Entries per test segment before it reports sealed. Stands in for a byte
/// size limit.
pub(crate) const TEST_SEGMENT_LIMIT: usize = 100;

/// The index-block offset every test segment reports at seal time.
pub(crate) const TEST_INDEX_START: u64 = 12345;

#[allow(dead_code)]
pub(crate) fn log_data(index: u64) -> Vec<u8> {
    format!("entry-{}", index).into_bytes()
}

#[allow(dead_code)]
pub(crate) fn make_log_entries(start: u64, num: usize) -> Vec<LogEntry> {
    (0..num as u64)
        .map(|i| LogEntry::new(start + i, log_data(start + i)))
        .collect()
}

/// Little-endian u64 helpers for stable-KV values.
#[allow(dead_code)]
pub(crate) fn stable_u64(v: u64) -> Vec<u8> {
    let mut buf = [0u8; 8];
    LittleEndian::write_u64(&mut buf, v);
    buf.to_vec()
}

#[allow(dead_code)]
pub(crate) fn read_stable_u64(b: &[u8]) -> u64 {
    LittleEndian::read_u64(b)
}

fn test_segment_info(base_index: u64) -> SegmentInfo {
    SegmentInfo {
        // 1:1 id and base_index keeps setup helpers easy to follow.
        id: base_index,
        base_index,
        min_index: base_index,
        max_index: 0,
        index_start: 0,
        size_limit: TEST_SEGMENT_LIMIT as u32,
        create_time: SystemTime::now(),
        seal_time: None,
    }
}

/// An in-memory segment. Implements both the reader and writer contracts;
/// the "file" contents are a sorted map of entries.
pub(crate) struct TestSegment {
    limit: usize,
    state: RwLock<TestSegmentState>,
}

struct TestSegmentState {
    info: SegmentInfo,
    logs: BTreeMap<u64, LogEntry>,
    closed: bool,
}

impl TestSegment {
    fn new(info: SegmentInfo, limit: usize) -> Self {
        Self {
            limit,
            state: RwLock::new(TestSegmentState {
                info,
                logs: BTreeMap::new(),
                closed: false,
            }),
        }
    }

    pub(crate) fn info(&self) -> SegmentInfo {
        self.state.read().unwrap().info.clone()
    }

    fn set_info(&self, info: SegmentInfo) {
        self.state.write().unwrap().info = info;
    }

    #[allow(dead_code)]
    pub(crate) fn num_logs(&self) -> usize {
        self.state.read().unwrap().logs.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.read().unwrap().closed
    }
}

impl SegmentReader for TestSegment {
    fn get_log(&self, index: u64, out: &mut LogEntry) -> Result<(), WalError> {
        let state = self.state.read().unwrap();
        if state.closed {
            return Err(io::Error::other("read from closed segment").into());
        }
        if index < state.info.min_index
            || (state.info.max_index > 0 && index > state.info.max_index)
        {
            return Err(WalError::NotFound);
        }
        match state.logs.get(&index) {
            Some(entry) => {
                out.index = entry.index;
                out.data = entry.data.clone();
                Ok(())
            }
            None => Err(WalError::NotFound),
        }
    }

    fn close(&self) -> Result<(), WalError> {
        self.state.write().unwrap().closed = true;
        Ok(())
    }
}

impl SegmentWriter for TestSegment {
    fn append(&self, entries: &[LogEntry]) -> Result<(), WalError> {
        let (sealed, _) = self.sealed()?;
        if sealed {
            return Err(WalError::Sealed);
        }
        let mut state = self.state.write().unwrap();
        if state.closed {
            return Err(io::Error::other("append to closed segment").into());
        }
        for entry in entries {
            let expect = state.info.base_index + state.logs.len() as u64;
            if entry.index != expect {
                return Err(WalError::Invariant(format!(
                    "segment append out of order: base_index={} len={} \
                     appended={}",
                    state.info.base_index,
                    state.logs.len(),
                    entry.index
                )));
            }
            state.logs.insert(entry.index, entry.clone());
        }
        Ok(())
    }

    fn sealed(&self) -> Result<(bool, u64), WalError> {
        let state = self.state.read().unwrap();
        if state.closed {
            return Err(io::Error::other("sealed on closed segment").into());
        }
        Ok((state.logs.len() >= self.limit, TEST_INDEX_START))
    }

    fn last_index(&self) -> u64 {
        let state = self.state.read().unwrap();
        state.logs.keys().next_back().copied().unwrap_or(0)
    }
}

/// Combined in-memory `SegmentFiler` + `MetaStore`. Clones share storage,
/// so a test hands the same instance to both `Wal::open` parameters and
/// keeps a third handle for assertions.
#[derive(Clone, Default)]
pub(crate) struct TestStorage {
    inner: Arc<Mutex<TestStorageInner>>,
}

struct TestStorageInner {
    segments: HashMap<u64, Arc<TestSegment>>,
    deleted: Vec<Arc<TestSegment>>,
    calls: HashMap<&'static str, usize>,

    meta_state: PersistentState,
    stable: HashMap<Vec<u8>, Vec<u8>>,
    last_dir: String,

    /// Next base index used by the `add_*_segment` setup helpers.
    setup_next_index: u64,

    fail_next_create: bool,
    fail_next_commit: bool,
}

impl Default for TestStorageInner {
    fn default() -> Self {
        Self {
            segments: HashMap::new(),
            deleted: Vec::new(),
            calls: HashMap::new(),
            meta_state: PersistentState::default(),
            stable: HashMap::new(),
            last_dir: String::new(),
            // Start from index 1 like a fresh consensus log.
            setup_next_index: 1,
            fail_next_create: false,
            fail_next_commit: false,
        }
    }
}

impl TestStorageInner {
    fn record_call(&mut self, name: &'static str) {
        *self.calls.entry(name).or_insert(0) += 1;
    }
}

#[allow(dead_code)]
impl TestStorage {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Seed a sealed segment holding `TEST_SEGMENT_LIMIT` entries starting
    /// where the previous seeded segment left off, and reflect it in the
    /// committed metadata.
    pub(crate) fn add_full_segment(&self) {
        let mut inner = self.inner.lock().unwrap();
        let base = inner.setup_next_index;
        let mut info = test_segment_info(base);
        let seg = Arc::new(TestSegment::new(info.clone(), TEST_SEGMENT_LIMIT));
        seg.append(&make_log_entries(base, TEST_SEGMENT_LIMIT))
            .expect("seeding full segment");

        info.seal_time = Some(SystemTime::now());
        info.max_index = base + TEST_SEGMENT_LIMIT as u64 - 1;
        info.index_start = TEST_INDEX_START;
        seg.set_info(info.clone());

        inner.setup_next_index += TEST_SEGMENT_LIMIT as u64;
        inner.segments.insert(info.id, seg);
        inner.meta_state.next_segment_id = info.id + 1;
        inner.meta_state.segments.push(info);
    }

    /// Seed an unsealed tail segment with `num` entries.
    pub(crate) fn add_tail_segment(&self, num: usize) {
        let mut inner = self.inner.lock().unwrap();
        let base = inner.setup_next_index;
        let info = test_segment_info(base);
        let seg = Arc::new(TestSegment::new(info.clone(), TEST_SEGMENT_LIMIT));
        seg.append(&make_log_entries(base, num))
            .expect("seeding tail segment");

        inner.setup_next_index += num as u64;
        inner.segments.insert(info.id, seg);
        inner.meta_state.next_segment_id = info.id + 1;
        inner.meta_state.segments.push(info);
    }

    /// Seed committed metadata for an unsealed tail whose file was never
    /// created, as left behind by a crash between the metadata commit and
    /// the file creation.
    pub(crate) fn add_meta_only_tail(&self) -> SegmentInfo {
        let mut inner = self.inner.lock().unwrap();
        let base = inner.setup_next_index;
        let info = test_segment_info(base);
        inner.meta_state.next_segment_id = info.id + 1;
        inner.meta_state.segments.push(info.clone());
        info
    }

    /// Seed a segment file that no committed metadata references, as left
    /// behind by a crash before a metadata commit.
    pub(crate) fn add_orphan_segment(&self, base_index: u64, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        let mut info = test_segment_info(base_index);
        info.id = id;
        let seg = Arc::new(TestSegment::new(info, TEST_SEGMENT_LIMIT));
        seg.append(&make_log_entries(base_index, 3))
            .expect("seeding orphan segment");
        inner.segments.insert(id, seg);
    }

    pub(crate) fn meta_state(&self) -> PersistentState {
        self.inner.lock().unwrap().meta_state.clone()
    }

    pub(crate) fn live_segment_count(&self) -> usize {
        self.inner.lock().unwrap().segments.len()
    }

    pub(crate) fn calls(&self, name: &'static str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn last_dir(&self) -> String {
        self.inner.lock().unwrap().last_dir.clone()
    }

    pub(crate) fn set_fail_next_create(&self) {
        self.inner.lock().unwrap().fail_next_create = true;
    }

    pub(crate) fn set_fail_next_commit(&self) {
        self.inner.lock().unwrap().fail_next_commit = true;
    }

    /// Base indexes of segments that have been deleted, in deletion order.
    pub(crate) fn deleted_base_indexes(&self) -> Vec<u64> {
        let inner = self.inner.lock().unwrap();
        inner.deleted.iter().map(|s| s.info().base_index).collect()
    }

    /// True when every deleted segment was also closed first.
    pub(crate) fn all_deleted_closed(&self) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.deleted.iter().all(|s| s.is_closed())
    }

    /// Panics unless the committed metadata satisfies the durable
    /// invariants: ascending contiguous base indexes, all but the last
    /// segment sealed.
    pub(crate) fn assert_valid_meta(&self) {
        let inner = self.inner.lock().unwrap();
        let segs = &inner.meta_state.segments;
        let n = segs.len();
        for (i, seg) in segs.iter().enumerate() {
            let is_tail = i == n - 1;
            assert!(
                is_tail || seg.is_sealed(),
                "unsealed segment not at tail in committed state: \
                 base_index={}",
                seg.base_index
            );
            assert!(
                seg.min_index >= seg.base_index,
                "min_index below base_index: base_index={} min_index={}",
                seg.base_index,
                seg.min_index
            );
            assert!(
                seg.id < inner.meta_state.next_segment_id,
                "next_segment_id not above live id {}",
                seg.id
            );
            if i > 0 && segs[i - 1].is_sealed() {
                assert_eq!(
                    segs[i - 1].max_index + 1,
                    seg.base_index,
                    "segments not contiguous at base_index={}",
                    seg.base_index
                );
            }
        }
    }
}

impl SegmentFiler<TestTypes> for TestStorage {
    fn create(
        &self,
        info: &SegmentInfo,
    ) -> Result<Arc<TestSegment>, WalError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record_call("create");
        if inner.fail_next_create {
            inner.fail_next_create = false;
            return Err(io::Error::other("injected create failure").into());
        }
        if inner.segments.contains_key(&info.id) {
            return Err(WalError::Invariant(format!(
                "segment id {} already exists",
                info.id
            )));
        }
        let seg =
            Arc::new(TestSegment::new(info.clone(), TEST_SEGMENT_LIMIT));
        inner.segments.insert(info.id, seg.clone());
        Ok(seg)
    }

    fn recover_tail(
        &self,
        info: &SegmentInfo,
    ) -> Result<Arc<TestSegment>, WalError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record_call("recover_tail");
        match inner.segments.get(&info.id) {
            Some(seg) => Ok(seg.clone()),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no segment file with id {}", info.id),
            )
            .into()),
        }
    }

    fn open(&self, info: &SegmentInfo) -> Result<Arc<TestSegment>, WalError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record_call("open");
        match inner.segments.get(&info.id) {
            Some(seg) => Ok(seg.clone()),
            None => Err(WalError::Corrupt(format!(
                "sealed segment file missing: id {}",
                info.id
            ))),
        }
    }

    fn list(&self) -> Result<BTreeMap<u64, u64>, WalError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record_call("list");
        Ok(inner
            .segments
            .iter()
            .map(|(id, seg)| (*id, seg.info().base_index))
            .collect())
    }

    fn delete(&self, _base_index: u64, id: u64) -> Result<(), WalError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record_call("delete");
        if let Some(seg) = inner.segments.remove(&id) {
            inner.deleted.push(seg);
        }
        Ok(())
    }
}

impl MetaStore for TestStorage {
    fn load(&self, dir: &str) -> Result<PersistentState, WalError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record_call("load");
        inner.last_dir = dir.to_string();
        Ok(inner.meta_state.clone())
    }

    fn commit(&self, state: &PersistentState) -> Result<(), WalError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record_call("commit");
        if inner.fail_next_commit {
            inner.fail_next_commit = false;
            return Err(io::Error::other("injected commit failure").into());
        }
        inner.meta_state = state.clone();

        // Push committed infos down into the live segments so their
        // min/max/seal bookkeeping matches what a real file would have
        // after truncation or sealing.
        for info in &state.segments {
            if let Some(seg) = inner.segments.get(&info.id) {
                seg.set_info(info.clone());
            }
        }
        Ok(())
    }

    fn get_stable(&self, key: &[u8]) -> Result<Option<Vec<u8>>, WalError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record_call("get_stable");
        Ok(inner.stable.get(key).cloned())
    }

    fn set_stable(&self, key: &[u8], value: &[u8]) -> Result<(), WalError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record_call("set_stable");
        inner.stable.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn close(&self) -> Result<(), WalError> {
        Ok(())
    }
}
