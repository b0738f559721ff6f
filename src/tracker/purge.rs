//! Deletion of bitmap files whose coverage is no longer needed.

use std::fs;

use super::LogTracker;
use crate::bitmap::BitmapFileRange;
use crate::error::Result;
use crate::{Lsn, LSN_MAX};

impl LogTracker {
    /// Delete every bitmap file whose whole coverage lies at or below
    /// `lsn`. A file is only removed when a successor file proves where
    /// its coverage ends; the file containing `lsn` itself survives.
    ///
    /// `0` and `LSN_MAX` both mean "purge everything and restart the file
    /// sequence". Callable whether tracking is enabled or disabled.
    pub fn purge(&self, lsn: Lsn) -> Result<()> {
        let lsn = if lsn == 0 { LSN_MAX } else { lsn };

        let mut st = self.state.lock()?;

        let range = BitmapFileRange::resolve(&self.config.dir, 0, LSN_MAX)?;

        // Deleting past the tracked position takes the current output
        // file with it; close it now and rotate a fresh one afterwards.
        let reopen = st.enabled && lsn > st.end_lsn;
        if reopen {
            st.out.close();
        }

        let mut result = Ok(());
        for i in 0..range.files.len() {
            if lsn != LSN_MAX {
                // The end of file i's coverage is file i+1's start; without
                // a successor (or across a gap) it cannot be proven to end
                // at or below the purge LSN.
                let next_start = range
                    .files
                    .get(i + 1)
                    .and_then(|slot| slot.as_ref())
                    .map(|entry| entry.start_lsn);
                match next_start {
                    Some(next_start) if next_start <= lsn => {}
                    _ => break,
                }
            }

            let Some(entry) = &range.files[i] else {
                continue;
            };
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    tracing::info!(
                        file = %entry.path.display(),
                        "Deleted changed page bitmap file"
                    );
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    result = Err(e.into());
                    break;
                }
            }
        }

        if reopen {
            let next_file_lsn = if lsn == LSN_MAX {
                st.out.reset_seq();
                0
            } else {
                st.end_lsn
            };
            if let Err(e) = st.out.rotate(next_file_lsn) {
                st.enabled = false;
                tracing::warn!(
                    error = %e,
                    "Disabling changed page tracking: cannot start a bitmap \
                     file after purge"
                );
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use crate::bitmap::block::{BitmapBlock, BLOCK_SIZE};
    use crate::bitmap::file;
    use crate::{Lsn, LSN_MAX};
    use std::fs;
    use std::path::Path;

    /// Seed files 1..=4 covering [0, 1000), [1000, 2000), [2000, 3000),
    /// [3000, 8192) and open a tracker over them (which rotates file 5 in).
    fn purge_fixture() -> TrackerFixture {
        let dir = tempfile::tempdir().unwrap();
        let coverage: [(u64, Lsn, Lsn); 4] =
            [(1, 0, 1000), (2, 1000, 2000), (3, 2000, 3000), (4, 3000, 8192)];
        for &(seq, start_lsn, end_lsn) in &coverage {
            seed_single_block_file(dir.path(), seq, start_lsn, end_lsn);
        }
        TrackerFixture::open_in(dir, 8192)
    }

    fn seed_single_block_file(dir: &Path, seq: u64, start_lsn: Lsn, end_lsn: Lsn) {
        let mut block = BitmapBlock::zeroed();
        block.set_key(1, 0);
        block.set_interval(start_lsn, end_lsn);
        block.set_last_in_batch(true);
        block.seal();
        fs::write(dir.join(file::file_name(seq, start_lsn)), block.bytes()).unwrap();
    }

    #[test]
    fn test_purge_mid_range_keeps_boundary_file() {
        let fixture = purge_fixture();
        fixture.tracker.purge(1500).unwrap();

        // File 1 ([0, 1000)) is wholly below 1500. File 2 covers
        // [1000, 2000), which straddles 1500, so it must survive.
        assert_eq!(
            fixture.bitmap_file_names(),
            vec![
                "ib_modified_log_2_1000.xdb",
                "ib_modified_log_3_2000.xdb",
                "ib_modified_log_4_3000.xdb",
                "ib_modified_log_5_8192.xdb",
            ]
        );
    }

    #[test]
    fn test_purge_below_tracked_position_leaves_output_file() {
        let fixture = purge_fixture();
        fixture.tracker.purge(5000).unwrap();

        assert_eq!(
            fixture.bitmap_file_names(),
            vec![
                "ib_modified_log_4_3000.xdb",
                "ib_modified_log_5_8192.xdb",
            ]
        );
        assert!(fixture.tracker.is_enabled().unwrap());
    }

    #[test]
    fn test_purge_all_resets_the_sequence() {
        let mut fixture = purge_fixture();
        fixture.tracker.purge(LSN_MAX).unwrap();

        // Everything deleted, sequence restarted at 1 with LSN 0.
        assert_eq!(fixture.bitmap_file_names(), vec!["ib_modified_log_1_0.xdb"]);

        // Tracking still works into the fresh file.
        fixture.log.append_rec(REC_PAGE_WRITE, 1, 1);
        fixture.checkpoint_and_follow().unwrap();
        assert_eq!(fixture.file_size(1, 0), BLOCK_SIZE as u64);
    }

    #[test]
    fn test_purge_zero_means_purge_all() {
        let fixture = purge_fixture();
        fixture.tracker.purge(0).unwrap();

        assert_eq!(fixture.bitmap_file_names(), vec!["ib_modified_log_1_0.xdb"]);
    }

    #[test]
    fn test_purge_with_tracking_disabled() {
        let fixture = purge_fixture();
        fixture.tracker.close().unwrap();
        fixture.tracker.purge(1500).unwrap();

        assert_eq!(
            fixture.bitmap_file_names(),
            vec![
                "ib_modified_log_2_1000.xdb",
                "ib_modified_log_3_2000.xdb",
                "ib_modified_log_4_3000.xdb",
                "ib_modified_log_5_8192.xdb",
            ]
        );
    }
}
