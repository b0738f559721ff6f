//! Shared test collaborators: a synthetic redo log built block by block
//! with real headers and checksums, a fixed-format record parser, and
//! recording stubs for the external interfaces.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use tempfile::TempDir;

use super::LogTracker;
use crate::bitmap::{file, BitmapIterator};
use crate::config::TrackerConfig;
use crate::error::Result;
use crate::redo::block::{
    self, LOG_BLOCK_HDR_SIZE, LOG_BLOCK_SIZE, LOG_BLOCK_TRL_SIZE, MIN_TRACKED_LSN,
};
use crate::redo::{
    ParseOutcome, ParsedRecord, RecordParser, RecordType, RedoLog, SpaceRegistry, TrackedLsnSink,
};
use crate::Lsn;

/// A 1-byte padding record, like the real log's dummy records.
pub const REC_FILLER: u8 = 0;
pub const REC_PAGE_WRITE: u8 = 1;
pub const REC_INDEX_LOAD: u8 = 2;
pub const REC_DUMMY: u8 = 3;
pub const REC_MULTI_REC_END: u8 = 4;
pub const REC_CHECKPOINT: u8 = 5;
pub const REC_TRUNCATE: u8 = 6;

/// Non-filler test records are one type byte plus big-endian space and
/// page ids.
const REC_LEN: usize = 9;

const DATA_END: usize = LOG_BLOCK_SIZE - LOG_BLOCK_TRL_SIZE;

pub struct TestParser;

impl RecordParser for TestParser {
    fn parse(&self, buf: &[u8]) -> ParseOutcome {
        let Some(&type_byte) = buf.first() else {
            return ParseOutcome::Incomplete;
        };
        if type_byte == REC_FILLER {
            return ParseOutcome::Record(ParsedRecord {
                rec_type: RecordType::Dummy,
                space_id: 0,
                page_no: 0,
                len: 1,
            });
        }
        if buf.len() < REC_LEN {
            return ParseOutcome::Incomplete;
        }
        let rec_type = match type_byte {
            REC_PAGE_WRITE => RecordType::PageWrite,
            REC_INDEX_LOAD => RecordType::IndexLoad,
            REC_DUMMY => RecordType::Dummy,
            REC_MULTI_REC_END => RecordType::MultiRecEnd,
            REC_CHECKPOINT => RecordType::Checkpoint,
            REC_TRUNCATE => RecordType::Truncate,
            other => panic!("unknown test record type {other}"),
        };
        ParseOutcome::Record(ParsedRecord {
            rec_type,
            space_id: BigEndian::read_u32(&buf[1..5]),
            page_no: BigEndian::read_u32(&buf[5..9]),
            len: REC_LEN,
        })
    }
}

/// Builds a redo log image one record at a time, maintaining block
/// headers, data lengths, and trailer checksums.
pub struct LogBuilder {
    base_lsn: Lsn,
    blocks: Vec<[u8; LOG_BLOCK_SIZE]>,
    /// Fill offset within the last block, in `[HDR, DATA_END]`.
    fill: usize,
    corrupt: HashSet<usize>,
}

impl LogBuilder {
    pub fn new(base_lsn: Lsn) -> Self {
        assert_eq!(base_lsn % LOG_BLOCK_SIZE as Lsn, 0);
        Self {
            base_lsn,
            blocks: Vec::new(),
            fill: DATA_END,
            corrupt: HashSet::new(),
        }
    }

    fn push_byte(&mut self, byte: u8) {
        if self.fill == DATA_END {
            self.blocks.push([0u8; LOG_BLOCK_SIZE]);
            self.fill = LOG_BLOCK_HDR_SIZE;
        }
        let last = self.blocks.len() - 1;
        self.blocks[last][self.fill] = byte;
        self.fill += 1;
    }

    pub fn append_rec(&mut self, rec_type: u8, space_id: u32, page_no: u32) {
        assert_ne!(rec_type, REC_FILLER);
        let mut rec = [0u8; REC_LEN];
        rec[0] = rec_type;
        BigEndian::write_u32(&mut rec[1..5], space_id);
        BigEndian::write_u32(&mut rec[5..9], page_no);
        for &byte in &rec {
            self.push_byte(byte);
        }
    }

    /// Fill the rest of the current block with 1-byte filler records, so
    /// the next record starts a new block.
    pub fn pad_to_next_block(&mut self) {
        while !self.blocks.is_empty() && self.fill < DATA_END {
            self.push_byte(REC_FILLER);
        }
    }

    /// Make block `index` fail checksum validation in every snapshot.
    pub fn corrupt_block(&mut self, index: usize) {
        assert!(index < self.blocks.len());
        self.corrupt.insert(index);
    }

    /// LSN of the next record byte to be written; used as the checkpoint
    /// once all appended records should be visible.
    pub fn end_lsn(&self) -> Lsn {
        if self.blocks.is_empty() {
            return self.base_lsn;
        }
        let raw = self.base_lsn
            + ((self.blocks.len() - 1) * LOG_BLOCK_SIZE + self.fill) as Lsn;
        block::nearest_data_lsn(raw)
    }

    /// Seal every block into a raw log image.
    pub fn snapshot(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.blocks.len() * LOG_BLOCK_SIZE);
        for (i, payload) in self.blocks.iter().enumerate() {
            let mut raw = *payload;
            let full = i + 1 < self.blocks.len() || self.fill == DATA_END;
            let data_len = if full { LOG_BLOCK_SIZE } else { self.fill };
            block::write_header(
                &mut raw,
                self.base_lsn + (i * LOG_BLOCK_SIZE) as Lsn,
                data_len as u16,
                0,
            );
            block::seal(&mut raw);
            if self.corrupt.contains(&i) {
                raw[LOG_BLOCK_HDR_SIZE + 2] ^= 0xFF;
            }
            out.extend_from_slice(&raw);
        }
        out
    }

    pub fn snapshot_into(&self, redo: &TestRedoLog) {
        redo.set_image(self.snapshot());
    }
}

/// In-memory redo log; reads past the written image return zero blocks,
/// exactly like the unwritten tail of a resized log file.
pub struct TestRedoLog {
    base_lsn: Lsn,
    image: Mutex<Vec<u8>>,
    checkpoint: AtomicU64,
    capacity: u64,
}

impl TestRedoLog {
    pub fn new(base_lsn: Lsn, capacity: u64) -> Self {
        Self {
            base_lsn,
            image: Mutex::new(Vec::new()),
            checkpoint: AtomicU64::new(0),
            capacity,
        }
    }

    pub fn set_checkpoint(&self, lsn: Lsn) {
        self.checkpoint.store(lsn, Ordering::SeqCst);
    }

    pub fn checkpoint(&self) -> Lsn {
        self.checkpoint.load(Ordering::SeqCst)
    }

    pub fn set_image(&self, image: Vec<u8>) {
        *self.image.lock().unwrap() = image;
    }
}

impl RedoLog for TestRedoLog {
    fn read_segment(&self, buf: &mut [u8], start_lsn: Lsn, end_lsn: Lsn) -> Result<()> {
        assert_eq!(start_lsn % LOG_BLOCK_SIZE as Lsn, 0);
        assert_eq!(buf.len() as Lsn, end_lsn - start_lsn);
        assert!(start_lsn >= self.base_lsn);

        let image = self.image.lock().unwrap();
        let offset = (start_lsn - self.base_lsn) as usize;
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = image.get(offset + i).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn last_checkpoint_lsn(&self) -> Lsn {
        self.checkpoint.load(Ordering::SeqCst)
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }
}

pub struct TestSpaces {
    counts: Mutex<HashMap<u32, u32>>,
}

impl TestSpaces {
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_page_count(&self, space_id: u32, pages: u32) {
        self.counts.lock().unwrap().insert(space_id, pages);
    }
}

impl SpaceRegistry for TestSpaces {
    fn page_count(&self, space_id: u32) -> u32 {
        self.counts.lock().unwrap().get(&space_id).copied().unwrap_or(0)
    }
}

pub struct TestSink {
    history: Mutex<Vec<Lsn>>,
}

impl TestSink {
    pub fn new() -> Self {
        Self {
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn history(&self) -> Vec<Lsn> {
        self.history.lock().unwrap().clone()
    }

    pub fn last(&self) -> Lsn {
        self.history.lock().unwrap().last().copied().unwrap_or(0)
    }
}

impl TrackedLsnSink for TestSink {
    fn set_tracked_lsn(&self, lsn: Lsn) {
        self.history.lock().unwrap().push(lsn);
    }
}

/// A tracker wired to the synthetic collaborators over a scratch
/// directory.
pub struct TrackerFixture {
    pub dir: TempDir,
    pub tracker: Arc<LogTracker>,
    pub log: LogBuilder,
    pub redo: Arc<TestRedoLog>,
    pub spaces: Arc<TestSpaces>,
    pub sink: Arc<TestSink>,
}

pub struct FixtureBuilder {
    dir: TempDir,
    checkpoint: Option<Lsn>,
    checkpoint_at_log_end: bool,
    capacity: u64,
    max_file_size: u64,
    log: Option<LogBuilder>,
}

impl TrackerFixture {
    pub fn open(checkpoint: Lsn) -> Self {
        Self::builder(tempfile::tempdir().unwrap())
            .checkpoint(checkpoint)
            .open()
    }

    pub fn open_in(dir: TempDir, checkpoint: Lsn) -> Self {
        Self::builder(dir).checkpoint(checkpoint).open()
    }

    pub fn open_with_max_file_size(checkpoint: Lsn, max_file_size: u64) -> Self {
        Self::builder(tempfile::tempdir().unwrap())
            .checkpoint(checkpoint)
            .max_file_size(max_file_size)
            .open()
    }

    pub fn builder(dir: TempDir) -> FixtureBuilder {
        FixtureBuilder {
            dir,
            checkpoint: None,
            checkpoint_at_log_end: false,
            capacity: 1 << 40,
            max_file_size: 100 * 1024 * 1024,
            log: None,
        }
    }

    pub fn tracker_arc(&self) -> Arc<LogTracker> {
        self.tracker.clone()
    }

    /// Publish the current log image to the redo reader.
    pub fn publish_log(&self) {
        self.log.snapshot_into(&self.redo);
    }

    /// Publish the log, move the checkpoint to its end, and run one
    /// follow cycle. Returns the checkpoint on success.
    pub fn checkpoint_and_follow(&mut self) -> Result<Lsn> {
        self.publish_log();
        let checkpoint = self.log.end_lsn();
        self.redo.set_checkpoint(checkpoint);
        self.tracker.follow_redo_log()?;
        Ok(checkpoint)
    }

    /// Changed `(space, page)` pairs recorded for `[min_lsn, max_lsn)`.
    pub fn changed_pages(&self, min_lsn: Lsn, max_lsn: Lsn) -> Vec<(u32, u32)> {
        BitmapIterator::new(self.dir.path(), min_lsn, max_lsn)
            .unwrap()
            .map(|bit| bit.unwrap())
            .filter(|bit| bit.changed)
            .map(|bit| (bit.space_id, bit.page_no))
            .collect()
    }

    pub fn file_path(&self, seq: u64, start_lsn: Lsn) -> PathBuf {
        self.dir.path().join(file::file_name(seq, start_lsn))
    }

    pub fn file_size(&self, seq: u64, start_lsn: Lsn) -> u64 {
        std::fs::metadata(self.file_path(seq, start_lsn)).unwrap().len()
    }

    /// Bitmap file names in the directory, ordered by sequence number.
    pub fn bitmap_file_names(&self) -> Vec<String> {
        let mut names: Vec<(u64, String)> = std::fs::read_dir(self.dir.path())
            .unwrap()
            .filter_map(|entry| {
                let name = entry.unwrap().file_name().to_str()?.to_string();
                let (seq, _) = file::parse_file_name(&name)?;
                Some((seq, name))
            })
            .collect();
        names.sort();
        names.into_iter().map(|(_, name)| name).collect()
    }

    /// Take the log builder out, to continue it into a reopened fixture.
    pub fn take_log(&mut self) -> LogBuilder {
        std::mem::replace(&mut self.log, LogBuilder::new(MIN_TRACKED_LSN))
    }

    /// Drop the tracker and keep the directory for a reopen.
    pub fn into_dir(self) -> TempDir {
        self.dir
    }
}

impl FixtureBuilder {
    pub fn checkpoint(mut self, lsn: Lsn) -> Self {
        self.checkpoint = Some(lsn);
        self
    }

    pub fn checkpoint_at_log_end(mut self) -> Self {
        self.checkpoint_at_log_end = true;
        self
    }

    pub fn capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn log(mut self, log: LogBuilder) -> Self {
        self.log = Some(log);
        self
    }

    pub fn open(self) -> TrackerFixture {
        let log = self
            .log
            .unwrap_or_else(|| LogBuilder::new(MIN_TRACKED_LSN));
        let checkpoint = if self.checkpoint_at_log_end {
            log.end_lsn()
        } else {
            self.checkpoint.unwrap_or(MIN_TRACKED_LSN)
        };

        let redo = Arc::new(TestRedoLog::new(MIN_TRACKED_LSN, self.capacity));
        redo.set_checkpoint(checkpoint);
        log.snapshot_into(&redo);

        let spaces = Arc::new(TestSpaces::new());
        let sink = Arc::new(TestSink::new());
        let config = TrackerConfig::new(self.dir.path())
            .max_file_size(self.max_file_size)
            .follow_interval(Duration::from_millis(25));

        let tracker = Arc::new(
            LogTracker::open(
                config,
                redo.clone(),
                Arc::new(TestParser),
                spaces.clone(),
                sink.clone(),
            )
            .expect("failed to open tracker"),
        );

        TrackerFixture {
            dir: self.dir,
            tracker,
            log,
            redo,
            spaces,
            sink,
        }
    }
}
