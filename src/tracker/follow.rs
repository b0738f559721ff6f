//! One follow cycle: read the redo log up to the checkpoint, collect the
//! modified pages, flush them as a bitmap write batch.

use super::{LogTracker, TrackerState};
use crate::errdata;
use crate::error::Result;
use crate::redo::block::{
    self, LOG_BLOCK_HDR_SIZE, LOG_BLOCK_SIZE, LOG_BLOCK_TRL_SIZE,
};
use crate::redo::{ParseOutcome, RecordType};
use crate::Lsn;

/// Largest data page the enclosing database supports.
const MAX_PAGE_SIZE: usize = 64 * 1024;

/// The redo log is scanned in chunks of four maximum-size pages.
pub(super) const FOLLOW_CHUNK_SIZE: usize = 4 * MAX_PAGE_SIZE;

/// Upper bound on buffered unparsed record bytes.
pub(super) const PARSE_BUF_SIZE: usize = 2 * 1024 * 1024;

impl LogTracker {
    /// Follow the redo log from the last tracked position up to the most
    /// recent checkpoint, then flush the collected modified-page set as one
    /// write batch.
    ///
    /// On success the tracked position advances to the checkpoint and is
    /// published. On any failure the position is unchanged, so the next
    /// invocation retries the same interval; a bitmap write failure
    /// additionally disables tracking, since the on-disk sequence can no
    /// longer be extended reliably.
    pub fn follow_redo_log(&self) -> Result<()> {
        let mut st = self.state.lock()?;

        if !st.enabled {
            return Ok(());
        }

        st.end_lsn = self.redo.last_checkpoint_lsn();
        if st.end_lsn == st.start_lsn {
            return Ok(());
        }

        // Reads start at a block boundary even though the parse position
        // sits mid-block; already-parsed bytes are skipped per block.
        let contiguous_start = block::align_down(st.start_lsn);
        self.scan_interval(&mut st, contiguous_start)?;

        if let Err(e) = self.flush_modified_pages(&mut st) {
            st.enabled = false;
            tracing::warn!(
                error = %e,
                "Disabling changed page tracking after a bitmap write failure"
            );
            return Err(e);
        }

        st.start_lsn = st.end_lsn;
        self.sink.set_tracked_lsn(st.start_lsn);
        Ok(())
    }

    /// Scan `[contiguous_start, end_lsn)` chunk by chunk, feeding records
    /// into the modified-page set.
    fn scan_interval(&self, st: &mut TrackerState, contiguous_start: Lsn) -> Result<()> {
        st.next_parse_lsn = block::nearest_data_lsn(st.start_lsn);
        st.parse_buf.clear();

        let read_end = block::align_up(st.end_lsn);
        let mut read_buf = std::mem::take(&mut st.read_buf);
        let result = self.scan_chunks(st, &mut read_buf, contiguous_start, read_end);
        st.read_buf = read_buf;
        result?;

        // The checkpoint is a record boundary; a leftover partial record
        // here means the log and the checkpoint disagree.
        if !st.parse_buf.is_empty() {
            return errdata!(
                "{} unparsed redo bytes left at checkpoint {}",
                st.parse_buf.len(),
                st.end_lsn
            );
        }
        Ok(())
    }

    fn scan_chunks(
        &self,
        st: &mut TrackerState,
        read_buf: &mut [u8],
        mut chunk_start: Lsn,
        read_end: Lsn,
    ) -> Result<()> {
        loop {
            let chunk_end = (chunk_start + FOLLOW_CHUNK_SIZE as Lsn).min(read_end);
            self.scan_chunk(st, read_buf, chunk_start, chunk_end)?;

            // The parse position may run ahead of the read position only
            // when a record ends exactly at a block boundary, bumping it
            // to the data area of the next, unread block.
            debug_assert!(
                st.next_parse_lsn
                    <= chunk_end + (LOG_BLOCK_HDR_SIZE + LOG_BLOCK_TRL_SIZE) as Lsn
            );

            chunk_start = chunk_end;
            if chunk_end >= st.end_lsn {
                return Ok(());
            }
        }
    }

    /// Read one chunk of raw log blocks and parse them.
    fn scan_chunk(
        &self,
        st: &mut TrackerState,
        read_buf: &mut [u8],
        chunk_start: Lsn,
        chunk_end: Lsn,
    ) -> Result<()> {
        let len = (chunk_end - chunk_start) as usize;
        if len == 0 {
            return Ok(());
        }

        let buf = &mut read_buf[..len];
        self.redo.read_segment(buf, chunk_start, chunk_end)?;

        let mut block_start = chunk_start;
        let mut offset = 0;
        while offset < len && st.next_parse_lsn < st.end_lsn {
            let log_block = &buf[offset..offset + LOG_BLOCK_SIZE];
            block::validate(log_block, block_start)?;

            // Bytes of this block already parsed in a previous pass,
            // because reads are rounded down to block boundaries.
            let skip = if block_start <= st.next_parse_lsn
                && st.next_parse_lsn < block_start + LOG_BLOCK_SIZE as Lsn
            {
                (st.next_parse_lsn - block_start) as usize
            } else {
                // A pending incomplete record keeps the parse position in
                // an earlier block.
                debug_assert!(block_start > st.next_parse_lsn);
                0
            };

            append_to_parse_buf(&mut st.parse_buf, log_block, skip);
            self.parse_records(st);

            offset += LOG_BLOCK_SIZE;
            block_start += LOG_BLOCK_SIZE as Lsn;
        }

        Ok(())
    }

    /// Drain complete records from the parse buffer into the modified-page
    /// set. An incomplete trailing record is shifted to the front of the
    /// buffer to be completed by the next block.
    fn parse_records(&self, st: &mut TrackerState) {
        let mut pos = 0;
        let mut ended_on_record = false;

        while pos < st.parse_buf.len() && st.next_parse_lsn < st.end_lsn {
            match self.parser.parse(&st.parse_buf[pos..]) {
                ParseOutcome::Record(rec) => {
                    if rec.rec_type.has_page() {
                        st.modified_pages.set_bit(rec.space_id, rec.page_no);
                        if rec.rec_type == RecordType::IndexLoad {
                            // A bulk load touches the whole tablespace.
                            let pages = self.spaces.page_count(rec.space_id);
                            for page_no in 0..pages {
                                st.modified_pages.set_bit(rec.space_id, page_no);
                            }
                        }
                    }

                    pos += rec.len;
                    debug_assert!(pos <= st.parse_buf.len());
                    st.next_parse_lsn = block::lsn_on_data_add(st.next_parse_lsn, rec.len as u64);
                    ended_on_record = true;
                }
                ParseOutcome::Incomplete => {
                    st.parse_buf.drain(..pos);
                    return;
                }
            }
        }

        if ended_on_record {
            // Everything up to the checkpoint is consumed; bytes past it,
            // if any, are re-read by the next cycle.
            st.parse_buf.clear();
        }
    }

    /// Write the modified-page set as one batch, recycling every block
    /// buffer whether or not the writes succeed.
    fn flush_modified_pages(&self, st: &mut TrackerState) -> Result<()> {
        if st.out.offset() >= self.config.max_file_size {
            st.out.rotate(st.start_lsn)?;
        }

        let blocks = st.modified_pages.drain();
        if blocks.is_empty() {
            return Ok(());
        }

        let last_index = blocks.len() - 1;
        let mut result = Ok(());
        for (i, mut block) in blocks.into_iter().enumerate() {
            if result.is_ok() {
                block.set_last_in_batch(i == last_index);
                block.set_interval(st.start_lsn, st.end_lsn);
                block.seal();
                result = st.out.append(block.bytes());
            }
            st.modified_pages.recycle(block);
        }
        result
    }
}

/// Copy one log block's record bytes into the parse buffer, skipping the
/// header, the trailer of a full block, and `skip` already-parsed bytes.
fn append_to_parse_buf(parse_buf: &mut Vec<u8>, log_block: &[u8], skip: usize) {
    let data_len = block::data_len(log_block);
    let start = if skip > 0 { skip } else { LOG_BLOCK_HDR_SIZE };
    let end = if data_len == LOG_BLOCK_SIZE {
        LOG_BLOCK_SIZE - LOG_BLOCK_TRL_SIZE
    } else {
        data_len
    };

    if end > start {
        parse_buf.extend_from_slice(&log_block[start..end]);
    }
    debug_assert!(parse_buf.len() <= PARSE_BUF_SIZE);
}
