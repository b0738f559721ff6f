//! Forward iteration over the bits of a bitmap file range.

use std::path::Path;

use super::block::{BitmapBlock, BITMAP_BITS, BLOCK_SIZE};
use super::range::{BitmapFileEntry, BitmapFileRange};
use super::reader::BitmapReader;
use crate::error::{Error, Result};
use crate::Lsn;

/// One bit position reported by the iterator. Bits are reported at block
/// granularity: every bit of a block shares the block's LSN interval, and
/// the exact LSN of an individual page write within it is not recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageBit {
    pub start_lsn: Lsn,
    pub end_lsn: Lsn,
    pub space_id: u32,
    pub page_no: u32,
    /// Whether the page was modified in the interval.
    pub changed: bool,
}

/// Iterates bits across every block of the files covering an LSN range,
/// in file, block, bit order. Blocks failing their checksum are skipped
/// with a warning. Because `min_lsn` only selects the starting file, bits
/// with `start_lsn < min_lsn` may be reported; callers filter if they care.
pub struct BitmapIterator {
    files: Vec<Option<BitmapFileEntry>>,
    max_lsn: Lsn,
    /// Index of the next file to open.
    next_file: usize,
    reader: Option<BitmapReader>,
    current: Option<BitmapBlock>,
    next_bit: usize,
    last_in_batch: bool,
    end_lsn: Lsn,
    done: bool,
}

impl BitmapIterator {
    /// Resolve the file range for `[min_lsn, max_lsn)` in `dir` and open
    /// its first file.
    pub fn new(dir: &Path, min_lsn: Lsn, max_lsn: Lsn) -> Result<Self> {
        let mut iter = Self {
            files: Vec::new(),
            max_lsn,
            next_file: 0,
            reader: None,
            current: None,
            next_bit: 0,
            last_in_batch: true,
            end_lsn: 0,
            done: false,
        };

        if min_lsn > max_lsn {
            // Empty range.
            iter.done = true;
            return Ok(iter);
        }

        let range = BitmapFileRange::resolve(dir, min_lsn, max_lsn)?;
        if range.is_empty() {
            iter.done = true;
            return Ok(iter);
        }

        iter.files = range.files;
        iter.open_next_file()?;
        Ok(iter)
    }

    fn open_next_file(&mut self) -> Result<()> {
        let Some(slot) = self.files.get(self.next_file) else {
            return Ok(()); // past the last file; next() terminates
        };
        let Some(entry) = slot.as_ref() else {
            return Err(Error::InvalidData(format!(
                "gap in bitmap file sequence at slot {}",
                self.next_file
            )));
        };
        self.reader = Some(BitmapReader::open(&entry.path)?);
        self.next_file += 1;
        Ok(())
    }

    /// Load the next checksum-valid block, advancing across files.
    /// `Ok(false)` means the range is exhausted.
    fn load_next_block(&mut self) -> Result<bool> {
        loop {
            while self.reader.as_ref().map_or(true, |r| !r.has_full_block()) {
                if let Some(reader) = self.reader.take() {
                    if !reader.diagnose_eof(self.last_in_batch) {
                        return Err(Error::InvalidData(format!(
                            "incomplete write batch at the end of {}",
                            reader.path().display()
                        )));
                    }
                }

                if self.next_file >= self.files.len() {
                    return Ok(false);
                }
                self.open_next_file()?;
            }

            let reader = self.reader.as_mut().expect("reader opened above");
            let (block, checksum_ok) = reader.read_block()?;
            if !checksum_ok {
                tracing::warn!(
                    file = %reader.path().display(),
                    offset = reader.offset() - BLOCK_SIZE as u64,
                    "Skipping changed page bitmap block with invalid checksum"
                );
                continue;
            }

            self.end_lsn = block.end_lsn();
            self.last_in_batch = block.is_last_in_batch();
            self.current = Some(block);
            self.next_bit = 0;
            return Ok(true);
        }
    }
}

impl Iterator for BitmapIterator {
    type Item = Result<PageBit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.current.is_none() || self.next_bit >= BITMAP_BITS {
            // The current block is exhausted. Once past the range end and
            // at a batch boundary there is nothing left to report.
            if self.current.is_some() && self.end_lsn >= self.max_lsn && self.last_in_batch {
                self.done = true;
                return None;
            }

            match self.load_next_block() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }

        let block = self.current.as_ref().expect("block loaded above");
        let bit = self.next_bit;
        self.next_bit += 1;
        Some(Ok(PageBit {
            start_lsn: block.start_lsn(),
            end_lsn: block.end_lsn(),
            space_id: block.space_id(),
            page_no: block.first_page_id() + bit as u32,
            changed: block.bit(bit),
        }))
    }
}
