//! Startup recovery: find the last durable bitmap block, repair the file
//! tail, and close or skip any tracking gap left by a crash.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::follow::{FOLLOW_CHUNK_SIZE, PARSE_BUF_SIZE};
use super::{LogTracker, TrackerState};
use crate::bitmap::block::{BitmapBlock, BLOCK_SIZE};
use crate::bitmap::{file, BitmapWriter, ModifiedPageSet};
use crate::config::TrackerConfig;
use crate::error::Result;
use crate::redo::block::MIN_TRACKED_LSN;
use crate::redo::{RecordParser, RedoLog, SpaceRegistry, TrackedLsnSink};
use crate::Lsn;

/// What dynamic init decided to do about the interval between the last
/// durably tracked LSN and the current checkpoint.
enum StartPlan {
    /// Nothing missing; track from `tracking_start`.
    InSync,
    /// A gap that fits in the redo log: re-read it before going online.
    RecoverGap { from: Lsn },
    /// A gap too old to re-read: warn and track from `tracking_start`.
    SkipGap,
}

pub(super) fn open(
    config: TrackerConfig,
    redo: Arc<dyn RedoLog>,
    parser: Arc<dyn RecordParser>,
    spaces: Arc<dyn SpaceRegistry>,
    sink: Arc<dyn TrackedLsnSink>,
) -> Result<LogTracker> {
    fs::create_dir_all(&config.dir)?;

    let tracking_start = redo.last_checkpoint_lsn().max(MIN_TRACKED_LSN);

    let (out, plan) = match find_last_nonempty_file(&config.dir)? {
        None => {
            // Nothing on disk: track from scratch.
            let out = BitmapWriter::create(&config.dir, 1, 0)?;
            (out, StartPlan::InSync)
        }
        Some(last_file) => prepare_existing(&config, &redo, last_file, tracking_start)?,
    };

    let state = TrackerState {
        enabled: true,
        start_lsn: tracking_start,
        end_lsn: tracking_start,
        next_parse_lsn: 0,
        parse_buf: Vec::with_capacity(PARSE_BUF_SIZE),
        read_buf: vec![0u8; FOLLOW_CHUNK_SIZE],
        modified_pages: ModifiedPageSet::new(),
        out,
    };
    let tracker = LogTracker {
        config,
        redo,
        parser,
        spaces,
        sink,
        state: Mutex::new(state),
    };

    match plan {
        StartPlan::InSync | StartPlan::SkipGap => {
            tracker.sink.set_tracked_lsn(tracking_start);
            tracing::info!(
                lsn = tracking_start,
                "Starting tracking changed pages"
            );
        }
        StartPlan::RecoverGap { from } => {
            tracing::info!("Reading the redo log to advance the last tracked LSN");
            {
                let mut st = tracker.state.lock()?;
                st.start_lsn = from;
                st.end_lsn = from;
            }
            tracker.sink.set_tracked_lsn(from);
            // Startup cannot proceed with an unclosed gap.
            tracker.follow_redo_log()?;
            let caught_up = tracker.start_lsn()?;
            debug_assert!(caught_up >= tracking_start);
            tracing::info!(
                lsn = caught_up,
                "Continuing tracking changed pages"
            );
        }
    }

    Ok(tracker)
}

struct LastFile {
    seq: u64,
    start_lsn: Lsn,
    path: PathBuf,
}

/// Open the newest bitmap file, repair its tail, and decide where to
/// continue from.
fn prepare_existing(
    config: &TrackerConfig,
    redo: &Arc<dyn RedoLog>,
    last_file: LastFile,
    tracking_start: Lsn,
) -> Result<(BitmapWriter, StartPlan)> {
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&last_file.path)?;
    let size = file.metadata()?.len();

    let (last_tracked, durable_len) = read_last_tracked_lsn(&mut file, &last_file.path, size)?;
    if durable_len != size {
        file.set_len(durable_len)?;
    }

    // A file with no durable batch is reused in place; its name supplies
    // the only LSN information we have about it.
    let need_rotate = last_tracked != 0;
    let last_tracked = if last_tracked == 0 {
        last_file.start_lsn
    } else {
        last_tracked
    };

    let recoverable = can_track_missing(last_tracked, tracking_start, redo.capacity());

    let mut out = BitmapWriter::resume(
        &config.dir,
        last_file.seq,
        last_file.path,
        file,
        durable_len,
    );
    if need_rotate {
        let next_file_lsn = if recoverable {
            last_tracked
        } else {
            tracking_start
        };
        out.rotate(next_file_lsn)?;
    }

    if last_tracked < tracking_start {
        tracing::warn!(
            last_tracked_lsn = last_tracked,
            checkpoint_lsn = tracking_start,
            "Tracked LSN is behind the last checkpoint; this might be due \
             to a server crash or a very fast shutdown"
        );

        if recoverable {
            return Ok((
                out,
                StartPlan::RecoverGap {
                    from: last_tracked.max(MIN_TRACKED_LSN),
                },
            ));
        }

        tracing::warn!(
            "The age of the last tracked LSN exceeds the redo log capacity; \
             tracking-based incremental backups will work only from the \
             current checkpoint onwards"
        );
        return Ok((out, StartPlan::SkipGap));
    }

    if last_tracked > tracking_start {
        tracing::warn!(
            last_tracked_lsn = last_tracked,
            checkpoint_lsn = tracking_start,
            "Tracked LSN is ahead of the last checkpoint; incremental \
             backups will work only from the tracked LSN onwards"
        );
    }

    Ok((out, StartPlan::InSync))
}

/// Whether the interval `[last_tracked, tracking_start)` can still be read
/// back out of the redo log.
fn can_track_missing(last_tracked: Lsn, tracking_start: Lsn, capacity: u64) -> bool {
    // An empty or fresh bitmap file can report an LSN below the minimum.
    let last_tracked = last_tracked.max(MIN_TRACKED_LSN);
    last_tracked >= tracking_start || tracking_start - last_tracked <= capacity
}

/// Scan the newest file backwards for the last block that both passes its
/// checksum and closes a write batch. Returns that block's `end_lsn` (zero
/// if the file holds no such block) and the length the file must be
/// truncated to so the next append lands right after durable data.
fn read_last_tracked_lsn(
    file: &mut fs::File,
    path: &Path,
    size: u64,
) -> Result<(Lsn, u64)> {
    let mut offset = size - size % BLOCK_SIZE as u64;
    if offset != size {
        tracing::warn!(
            file = %path.display(),
            offset,
            "Truncated block detected in changed page bitmap file"
        );
    }

    let mut buf = [0u8; BLOCK_SIZE];
    while offset > 0 {
        offset -= BLOCK_SIZE as u64;

        file.seek(SeekFrom::Start(offset))?;
        if let Err(e) = file.read_exact(&mut buf) {
            tracing::warn!(
                file = %path.display(),
                offset,
                error = %e,
                "Failed reading changed page bitmap file"
            );
            return Ok((0, offset));
        }

        let block = BitmapBlock::from_bytes(buf);
        if !block.verify() {
            tracing::warn!(
                file = %path.display(),
                offset,
                "Corruption detected in changed page bitmap file"
            );
            continue;
        }
        if block.is_last_in_batch() {
            return Ok((block.end_lsn(), offset + BLOCK_SIZE as u64));
        }
    }

    Ok((0, 0))
}

/// The bitmap file with the highest sequence number and actual content.
fn find_last_nonempty_file(dir: &Path) -> Result<Option<LastFile>> {
    let mut best: Option<LastFile> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some((seq, start_lsn)) = file::parse_file_name(name) else {
            continue;
        };
        if entry.metadata()?.len() == 0 {
            continue;
        }
        if best.as_ref().map_or(true, |b| seq > b.seq) {
            best = Some(LastFile {
                seq,
                start_lsn,
                path: entry.path(),
            });
        }
    }
    Ok(best)
}
