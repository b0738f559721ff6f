//! Append-only writer for the current bitmap file.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::block::BLOCK_SIZE;
use super::file;
use crate::error::{Error, Result};
use crate::Lsn;

/// Writes bitmap blocks to a sequence of rotated files. Owns the output
/// file handle and the append offset; every append is synced before it is
/// considered durable.
pub struct BitmapWriter {
    dir: PathBuf,
    seq: u64,
    path: PathBuf,
    file: Option<File>,
    offset: u64,
}

impl BitmapWriter {
    /// Create a fresh writer on a new file numbered `seq` and named with
    /// `start_lsn`.
    pub fn create(dir: &Path, seq: u64, start_lsn: Lsn) -> Result<Self> {
        let mut writer = Self {
            dir: dir.to_path_buf(),
            seq,
            path: PathBuf::new(),
            file: None,
            offset: 0,
        };
        writer.open(start_lsn)?;
        Ok(writer)
    }

    /// Resume writing an existing file at `offset`, as recovery does after
    /// locating the last durable block.
    pub fn resume(dir: &Path, seq: u64, path: PathBuf, file: File, offset: u64) -> Self {
        debug_assert!(offset % BLOCK_SIZE as u64 == 0);
        Self {
            dir: dir.to_path_buf(),
            seq,
            path,
            file: Some(file),
            offset,
        }
    }

    /// Create and switch to a new empty output file at the current sequence
    /// number. A leftover zero-length file with the same name is
    /// overwritten; a non-empty one is an error, never silently clobbered.
    fn open(&mut self, start_lsn: Lsn) -> Result<()> {
        let path = self.dir.join(file::file_name(self.seq, start_lsn));

        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() && meta.len() == 0 => fs::remove_file(&path)?,
            Ok(_) => {
                return Err(Error::IO(format!(
                    "bitmap file {} already exists and is not empty",
                    path.display()
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| Error::IO(format!("cannot create {}: {e}", path.display())))?;

        self.path = path;
        self.file = Some(file);
        self.offset = 0;
        Ok(())
    }

    /// Close the current file and start the next one in the sequence,
    /// named with `next_start_lsn`.
    pub fn rotate(&mut self, next_start_lsn: Lsn) -> Result<()> {
        self.close();
        self.seq += 1;
        self.open(next_start_lsn)
    }

    /// Append one block at the current offset and sync it to disk.
    pub fn append(&mut self, block: &[u8; BLOCK_SIZE]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::IO("bitmap writer has no open file".to_string()))?;

        file.seek(SeekFrom::Start(self.offset))?;
        if let Err(e) = file.write_all(block) {
            tracing::error!(
                file = %self.path.display(),
                offset = self.offset,
                error = %e,
                "Failed writing changed page bitmap file"
            );
            return Err(e.into());
        }
        if let Err(e) = file.sync_all() {
            tracing::error!(
                file = %self.path.display(),
                error = %e,
                "Failed flushing changed page bitmap file"
            );
            return Err(e.into());
        }

        // The written range will not be read back by this process.
        #[cfg(target_os = "linux")]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::posix_fadvise(
                    file.as_raw_fd(),
                    self.offset as libc::off_t,
                    BLOCK_SIZE as libc::off_t,
                    libc::POSIX_FADV_DONTNEED,
                );
            }
        }

        self.offset += BLOCK_SIZE as u64;
        Ok(())
    }

    /// Close the current output file, if open.
    pub fn close(&mut self) {
        self.file = None;
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Append offset, equal to the current file size.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Restart the file sequence; the next rotation creates file 1.
    pub fn reset_seq(&mut self) {
        self.seq = 0;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for BitmapWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitmapWriter")
            .field("path", &self.path)
            .field("seq", &self.seq)
            .field("offset", &self.offset)
            .finish()
    }
}
