//! Read-only access to one bitmap file.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::block::{BitmapBlock, BLOCK_SIZE};
use crate::error::Result;

/// Sequential block reader over a single bitmap file. Readers never share
/// state with the writer; closed files are immutable, and the current
/// output file is only ever read through an independent handle like this
/// one.
pub struct BitmapReader {
    file: File,
    path: PathBuf,
    size: u64,
    offset: u64,
}

impl BitmapReader {
    /// Open `path` read-only and advise the kernel about the sequential
    /// single-pass access pattern.
    pub fn open(path: &Path) -> Result<Self> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(
                    file = %path.display(),
                    error = %e,
                    "Error opening the changed page bitmap"
                );
                return Err(e.into());
            }
        };
        let size = file.metadata()?.len();

        #[cfg(target_os = "linux")]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_SEQUENTIAL);
                libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_NOREUSE);
            }
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            size,
            offset: 0,
        })
    }

    /// Whether a full block remains at the current offset.
    pub fn has_full_block(&self) -> bool {
        self.size >= BLOCK_SIZE as u64 && self.offset <= self.size - BLOCK_SIZE as u64
    }

    /// Read the block at the current offset and advance. Returns the block
    /// and whether its checksum verified; a checksum mismatch is not an
    /// error at this layer, recovery and iteration decide what to do
    /// with it.
    pub fn read_block(&mut self) -> Result<(BitmapBlock, bool)> {
        debug_assert!(self.has_full_block());
        debug_assert!(self.offset % BLOCK_SIZE as u64 == 0);

        let mut buf = [0u8; BLOCK_SIZE];
        self.file.seek(SeekFrom::Start(self.offset))?;
        if let Err(e) = self.file.read_exact(&mut buf) {
            tracing::warn!(
                file = %self.path.display(),
                offset = self.offset,
                error = %e,
                "Failed reading changed page bitmap file"
            );
            return Err(e.into());
        }
        self.offset += BLOCK_SIZE as u64;

        let block = BitmapBlock::from_bytes(buf);
        let checksum_ok = block.verify();
        Ok((block, checksum_ok))
    }

    /// Reposition the reader to a block-aligned offset.
    pub fn seek_block(&mut self, offset: u64) {
        debug_assert!(offset % BLOCK_SIZE as u64 == 0);
        self.offset = offset;
    }

    /// Diagnose the end of the file once no full block remains:
    /// a sub-block remainder is junk worth a warning, and reaching EOF
    /// while the last read block did not finish a batch means the file is
    /// missing its tail.
    ///
    /// Returns `false` for the incomplete-batch case.
    pub fn diagnose_eof(&self, last_block_in_batch: bool) -> bool {
        if self.size < BLOCK_SIZE as u64 || self.offset > self.size - BLOCK_SIZE as u64 {
            if self.offset != self.size {
                tracing::warn!(
                    file = %self.path.display(),
                    "Junk at the end of changed page bitmap file"
                );
            }

            if !last_block_in_batch {
                tracing::warn!(
                    file = %self.path.display(),
                    size = self.size,
                    offset = self.offset,
                    "Changed page bitmap file does not contain a complete write batch"
                );
                return false;
            }
        }
        true
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
