//! The changed-page tracker.
//!
//! The tracker follows the database's redo log checkpoint by checkpoint,
//! records which `(space, page)` pairs each interval modified, and persists
//! that as a sequence of bitmap files that incremental backup tools read
//! later.
//!
//! ```text
//!  redo log ──► follow cycle ──► record classifier ──► modified-page set
//!                                                            │
//!  file range ◄── purge/query ◄── file reader ◄── bitmap writer (flush)
//! ```
//!
//! One `LogTracker` instance owns the bitmap directory. All mutable state
//! lives behind a single mutex held for whole operations; follow cycles
//! are checkpoint-driven and infrequent. Readers (the bitmap iterator)
//! never take the lock; they open their own read-only handles on files
//! the writer has already synced.

mod follow;
mod purge;
mod recovery;
pub mod tasks;

#[cfg(test)]
pub(crate) mod testutil;

use std::sync::{Arc, Mutex};

use crate::bitmap::{BitmapIterator, BitmapWriter, ModifiedPageSet};
use crate::config::TrackerConfig;
use crate::error::Result;
use crate::redo::{RecordParser, RedoLog, SpaceRegistry, TrackedLsnSink};
use crate::Lsn;

/// Mutable tracker state, guarded by `LogTracker::state`.
struct TrackerState {
    /// Cleared on shutdown or after an unrecoverable write failure;
    /// follow cycles observe it and return immediately.
    enabled: bool,
    /// LSN of the next unparsed record, start of the next interval.
    start_lsn: Lsn,
    /// End of the interval being parsed: the checkpoint LSN snapshotted
    /// when the current follow cycle began.
    end_lsn: Lsn,
    /// Parse position within the current follow cycle.
    next_parse_lsn: Lsn,
    /// Unparsed record bytes carried between log blocks.
    parse_buf: Vec<u8>,
    /// Reusable chunk buffer for raw log blocks.
    read_buf: Vec<u8>,
    /// Pages modified since the last flush.
    modified_pages: ModifiedPageSet,
    /// The current output file.
    out: BitmapWriter,
}

/// Follows the redo log and maintains the on-disk changed-page bitmaps.
pub struct LogTracker {
    config: TrackerConfig,
    redo: Arc<dyn RedoLog>,
    parser: Arc<dyn RecordParser>,
    spaces: Arc<dyn SpaceRegistry>,
    sink: Arc<dyn TrackedLsnSink>,
    state: Mutex<TrackerState>,
}

impl LogTracker {
    /// Open the tracker over `config.dir`, recovering from whatever bitmap
    /// files a previous incarnation left behind. May run one synchronous
    /// follow cycle to close a tracking gap; see the recovery module.
    pub fn open(
        config: TrackerConfig,
        redo: Arc<dyn RedoLog>,
        parser: Arc<dyn RecordParser>,
        spaces: Arc<dyn SpaceRegistry>,
        sink: Arc<dyn TrackedLsnSink>,
    ) -> Result<Self> {
        recovery::open(config, redo, parser, spaces, sink)
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// LSN up to which modifications are durably tracked.
    pub fn start_lsn(&self) -> Result<Lsn> {
        Ok(self.state.lock()?.start_lsn)
    }

    pub fn is_enabled(&self) -> Result<bool> {
        Ok(self.state.lock()?.enabled)
    }

    /// Iterate the recorded bits for `[min_lsn, max_lsn)`. Operates purely
    /// on the bitmap files; does not take the tracker lock.
    pub fn iter_range(&self, min_lsn: Lsn, max_lsn: Lsn) -> Result<BitmapIterator> {
        BitmapIterator::new(&self.config.dir, min_lsn, max_lsn)
    }

    /// Stop tracking and close the output file. A follow cycle already
    /// holding the lock finishes first; later cycles become no-ops.
    pub fn close(&self) -> Result<()> {
        let mut st = self.state.lock()?;
        st.enabled = false;
        st.out.close();
        Ok(())
    }
}

impl std::fmt::Debug for LogTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogTracker")
            .field("dir", &self.config.dir)
            .finish()
    }
}
