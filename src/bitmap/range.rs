//! Resolves which bitmap files cover an LSN range.

use std::fs;
use std::path::{Path, PathBuf};

use super::file;
use crate::error::{Error, Result};
use crate::Lsn;

/// One bitmap file selected into a range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitmapFileEntry {
    pub seq: u64,
    pub start_lsn: Lsn,
    pub path: PathBuf,
}

/// An ordered subset of a directory's bitmap files bracketing an LSN range.
/// Slots are indexed by sequence number relative to the first selected
/// file; a `None` slot is a gap in the on-disk sequence, which is legal but
/// must be visible to callers.
#[derive(Debug, Default)]
pub struct BitmapFileRange {
    pub files: Vec<Option<BitmapFileEntry>>,
}

impl BitmapFileRange {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Select the files in `dir` whose coverage intersects `[lo_lsn, hi_lsn)`.
    ///
    /// The range starts with the file having the greatest `start_lsn` at or
    /// below `lo_lsn` (a range start can fall mid-file) and extends through
    /// every file starting below `hi_lsn`. The directory is enumerated
    /// twice, once to size the slot array and once to fill it; if the two
    /// passes disagree the partially built range is discarded.
    pub fn resolve(dir: &Path, lo_lsn: Lsn, hi_lsn: Lsn) -> Result<Self> {
        debug_assert!(hi_lsn >= lo_lsn);

        // 1st pass: find the bracketing sequence numbers.
        let mut boundary: Option<(Lsn, u64)> = None; // greatest start below lo
        let mut min_in_range: Option<(Lsn, u64)> = None;
        let mut max_seq: Option<u64> = None;

        for (seq, start_lsn, _) in list_bitmap_files(dir, hi_lsn)? {
            max_seq = Some(max_seq.map_or(seq, |m: u64| m.max(seq)));

            if start_lsn >= lo_lsn {
                min_in_range = Some(match min_in_range {
                    Some((s, q)) => (s.min(start_lsn), q.min(seq)),
                    None => (start_lsn, seq),
                });
            } else {
                boundary = Some(match boundary {
                    Some((s, _)) if start_lsn > s => (start_lsn, seq),
                    Some((s, q)) if start_lsn == s => (s, q.min(seq)),
                    Some(best) => best,
                    None => (start_lsn, seq),
                });
            }
        }

        let Some(max_seq) = max_seq else {
            return Ok(Self::default());
        };

        // The boundary file, when present, precedes every in-range file.
        let (first_start_lsn, first_seq) = match (boundary, min_in_range) {
            (Some((s, q)), _) => (s, q),
            (None, Some((s, q))) => (s, q),
            (None, None) => unreachable!("max_seq implies at least one candidate"),
        };

        if max_seq < first_seq {
            return Err(inconsistent(dir));
        }

        let mut files: Vec<Option<BitmapFileEntry>> =
            vec![None; (max_seq - first_seq + 1) as usize];

        // 2nd pass: place each eligible file at its sequence slot. The
        // directory may have changed since the first pass; any entry that
        // no longer fits the computed bracket makes the range unusable.
        for (seq, start_lsn, path) in list_bitmap_files(dir, hi_lsn)? {
            if start_lsn < first_start_lsn {
                continue;
            }
            let Some(slot) = seq
                .checked_sub(first_seq)
                .and_then(|pos| files.get_mut(pos as usize))
            else {
                return Err(inconsistent(dir));
            };
            *slot = Some(BitmapFileEntry {
                seq,
                start_lsn,
                path,
            });
        }

        match files[0].as_ref() {
            Some(first) if first.seq == first_seq => {}
            _ => return Err(inconsistent(dir)),
        }

        for i in 1..files.len() {
            let Some(entry) = files[i].as_ref() else {
                // A gap; later slots are left as found.
                break;
            };
            let prev = files[i - 1].as_ref().expect("checked before the gap");
            if entry.seq <= prev.seq || entry.start_lsn < prev.start_lsn {
                return Err(inconsistent(dir));
            }
        }

        Ok(Self { files })
    }
}

fn inconsistent(dir: &Path) -> Error {
    tracing::warn!(dir = %dir.display(), "Inconsistent bitmap file directory");
    Error::InconsistentDirectory(dir.display().to_string())
}

/// Enumerate bitmap files in `dir` whose name LSN is below `hi_lsn`.
fn list_bitmap_files(dir: &Path, hi_lsn: Lsn) -> Result<Vec<(u64, Lsn, PathBuf)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some((seq, start_lsn)) = file::parse_file_name(name) else {
            continue;
        };
        if start_lsn >= hi_lsn {
            continue;
        }
        out.push((seq, start_lsn, entry.path()));
    }
    Ok(out)
}
