//! Redo log block layout and LSN arithmetic.
//!
//! The tracker consumes the database's redo log as a stream of fixed
//! 512-byte blocks. Each block carries a 12-byte header and a 4-byte
//! trailing checksum; record bytes live in between.
//!
//! ```text
//! +--------------------------------------+
//! | hdr_no: u32 (bit 31 = flushed flag)  |  0
//! | data_len: u16                        |  4
//! | first_rec_group: u16                 |  6
//! | checkpoint_no: u32                   |  8
//! +--------------------------------------+
//! | record data                          |  12
//! +--------------------------------------+
//! | checksum: u32 over bytes [0, 508)    |  508
//! +--------------------------------------+
//! ```
//!
//! `data_len` is the offset one past the last data byte, so a full block
//! stores 512 and a partially filled one something in [12, 508].

use byteorder::{BigEndian, ByteOrder};

use crate::checksum;
use crate::error::{Error, Result};
use crate::Lsn;

/// Size of a redo log block on disk.
pub const LOG_BLOCK_SIZE: usize = 512;

/// Size of the redo log block header.
pub const LOG_BLOCK_HDR_SIZE: usize = 12;

/// Size of the redo log block trailer (the checksum).
pub const LOG_BLOCK_TRL_SIZE: usize = 4;

/// Record bytes a single block can carry.
pub const LOG_BLOCK_DATA_SIZE: usize = LOG_BLOCK_SIZE - LOG_BLOCK_HDR_SIZE - LOG_BLOCK_TRL_SIZE;

const HDR_NO_OFF: usize = 0;
const DATA_LEN_OFF: usize = 4;
const FIRST_REC_GROUP_OFF: usize = 6;
const CHECKPOINT_NO_OFF: usize = 8;
const CHECKSUM_OFF: usize = LOG_BLOCK_SIZE - LOG_BLOCK_TRL_SIZE;

/// Set on `hdr_no` for the first block of a physical flush.
const FLUSH_BIT: u32 = 0x8000_0000;

/// Block numbers wrap at 2^30.
const BLOCK_NO_MASK: u64 = 0x3FFF_FFFF;

/// The redo log proper starts after the log file header, one full block
/// past `16 * LOG_BLOCK_SIZE` being the first record-bearing LSN region.
pub const LOG_START_LSN: Lsn = 16 * LOG_BLOCK_SIZE as Lsn;

/// The earliest LSN the tracker will ever record. On a freshly created
/// database the checkpoint LSN can be zero; clamping to this keeps all
/// tracked intervals inside the record-bearing part of the log.
pub const MIN_TRACKED_LSN: Lsn = LOG_START_LSN;

/// Block header number, without the flush flag.
pub fn hdr_no(block: &[u8]) -> u32 {
    BigEndian::read_u32(&block[HDR_NO_OFF..]) & !FLUSH_BIT
}

/// Offset one past the last data byte in the block.
pub fn data_len(block: &[u8]) -> usize {
    BigEndian::read_u16(&block[DATA_LEN_OFF..]) as usize
}

/// Stored trailer checksum.
pub fn stored_checksum(block: &[u8]) -> u32 {
    BigEndian::read_u32(&block[CHECKSUM_OFF..])
}

/// Compute the checksum of the block's first 508 bytes.
pub fn calc_checksum(block: &[u8]) -> u32 {
    checksum::fold(&block[..CHECKSUM_OFF])
}

/// The block number a block at `lsn` must carry in its header.
pub fn block_no_for_lsn(lsn: Lsn) -> u32 {
    (((lsn / LOG_BLOCK_SIZE as Lsn) & BLOCK_NO_MASK) + 1) as u32
}

/// Validate one redo log block read at `block_lsn`.
///
/// An all-zero block is accepted silently: the tail of a freshly resized
/// log reads back as zeroes and carries no records. Any other checksum
/// mismatch is corruption of the database's own log and fails the follow.
pub fn validate(block: &[u8], block_lsn: Lsn) -> Result<()> {
    debug_assert_eq!(block.len(), LOG_BLOCK_SIZE);

    let stored = stored_checksum(block);
    let actual = calc_checksum(block);
    if stored == actual {
        return Ok(());
    }

    if block.iter().all(|&b| b == 0) {
        return Ok(());
    }

    let no = hdr_no(block);
    let expected_no = block_no_for_lsn(block_lsn);
    tracing::error!(
        lsn = block_lsn,
        stored_checksum = stored,
        calculated_checksum = actual,
        block_no = no,
        expected_block_no = expected_no,
        "Redo log block checksum mismatch"
    );
    Err(Error::LogChecksum(format!(
        "lsn {block_lsn}: stored {stored}, calculated {actual}, \
         block n:o {no}, expected n:o {expected_no}"
    )))
}

/// Advance `lsn` by `len` parsed record bytes, stepping over block headers
/// and trailers wherever the data crosses a block boundary.
pub fn lsn_on_data_add(lsn: Lsn, len: u64) -> Lsn {
    let frag = lsn % LOG_BLOCK_SIZE as Lsn - LOG_BLOCK_HDR_SIZE as Lsn;
    debug_assert!(frag < LOG_BLOCK_DATA_SIZE as Lsn);

    let crossings = (len + frag) / LOG_BLOCK_DATA_SIZE as Lsn;
    lsn + len + crossings * (LOG_BLOCK_HDR_SIZE + LOG_BLOCK_TRL_SIZE) as Lsn
}

/// Round `lsn` up to the nearest byte that can hold record data, stepping
/// over a block header or trailer it may point into. LSN arithmetic during
/// parsing assumes the running LSN always sits inside a data area; tracking
/// start positions arrive block-aligned and need this adjustment.
pub fn nearest_data_lsn(lsn: Lsn) -> Lsn {
    let off = (lsn % LOG_BLOCK_SIZE as Lsn) as usize;
    let block_start = lsn - off as Lsn;
    if off < LOG_BLOCK_HDR_SIZE {
        block_start + LOG_BLOCK_HDR_SIZE as Lsn
    } else if off >= LOG_BLOCK_SIZE - LOG_BLOCK_TRL_SIZE {
        block_start + (LOG_BLOCK_SIZE + LOG_BLOCK_HDR_SIZE) as Lsn
    } else {
        lsn
    }
}

/// Round `lsn` down to the start of its block.
pub fn align_down(lsn: Lsn) -> Lsn {
    lsn - lsn % LOG_BLOCK_SIZE as Lsn
}

/// Round `lsn` up to a block boundary.
pub fn align_up(lsn: Lsn) -> Lsn {
    let rem = lsn % LOG_BLOCK_SIZE as Lsn;
    if rem == 0 {
        lsn
    } else {
        lsn + (LOG_BLOCK_SIZE as Lsn - rem)
    }
}

/// Stamp the header fields of a block under construction.
pub fn write_header(block: &mut [u8], block_lsn: Lsn, data_len: u16, checkpoint_no: u32) {
    BigEndian::write_u32(&mut block[HDR_NO_OFF..], block_no_for_lsn(block_lsn));
    BigEndian::write_u16(&mut block[DATA_LEN_OFF..], data_len);
    BigEndian::write_u16(&mut block[FIRST_REC_GROUP_OFF..], 0);
    BigEndian::write_u32(&mut block[CHECKPOINT_NO_OFF..], checkpoint_no);
}

/// Compute and store the trailer checksum.
pub fn seal(block: &mut [u8]) {
    let sum = calc_checksum(block);
    BigEndian::write_u32(&mut block[CHECKSUM_OFF..], sum);
}
