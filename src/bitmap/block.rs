use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::checksum;
use crate::Lsn;

/// Size of a bitmap block on disk. All bitmap file IO is in multiples of
/// this.
pub const BLOCK_SIZE: usize = 4096;

const IS_LAST_BLOCK_OFF: usize = 0;
const START_LSN_OFF: usize = 4;
const END_LSN_OFF: usize = 12;
const SPACE_ID_OFF: usize = 20;
const FIRST_PAGE_ID_OFF: usize = 24;
/// Start of the bitmap, 8-byte aligned.
pub const BITMAP_OFF: usize = 32;
/// Trailing padding keeps the bitmap end 8-byte aligned too.
const TRAILER_SIZE: usize = 8;
/// Length of the bitmap in bytes.
pub const BITMAP_LEN: usize = BLOCK_SIZE - TRAILER_SIZE - BITMAP_OFF;
/// Pages covered by one block.
pub const BITMAP_BITS: usize = BITMAP_LEN * 8;
const CHECKSUM_OFF: usize = BLOCK_SIZE - 4;

// The bitmap must begin and end on 8-byte boundaries.
const _: () = assert!(BITMAP_OFF % 8 == 0);
const _: () = assert!(BITMAP_LEN % 8 == 0);

/// One fixed-size bitmap block, the unit of both the in-memory modified
/// page set and the on-disk bitmap files. The buffer *is* the on-disk
/// representation; accessors read and write fields in place.
#[derive(Clone)]
pub struct BitmapBlock {
    buf: Box<[u8; BLOCK_SIZE]>,
}

impl BitmapBlock {
    pub fn zeroed() -> Self {
        Self {
            buf: Box::new([0u8; BLOCK_SIZE]),
        }
    }

    pub fn from_bytes(bytes: [u8; BLOCK_SIZE]) -> Self {
        Self {
            buf: Box::new(bytes),
        }
    }

    pub fn bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.buf
    }

    pub fn zero(&mut self) {
        self.buf.fill(0);
    }

    pub fn is_last_in_batch(&self) -> bool {
        BigEndian::read_u32(&self.buf[IS_LAST_BLOCK_OFF..]) != 0
    }

    pub fn set_last_in_batch(&mut self, last: bool) {
        BigEndian::write_u32(&mut self.buf[IS_LAST_BLOCK_OFF..], last as u32);
    }

    pub fn start_lsn(&self) -> Lsn {
        BigEndian::read_u64(&self.buf[START_LSN_OFF..])
    }

    pub fn end_lsn(&self) -> Lsn {
        BigEndian::read_u64(&self.buf[END_LSN_OFF..])
    }

    /// Stamp the tracked LSN interval shared by the whole batch.
    pub fn set_interval(&mut self, start_lsn: Lsn, end_lsn: Lsn) {
        BigEndian::write_u64(&mut self.buf[START_LSN_OFF..], start_lsn);
        BigEndian::write_u64(&mut self.buf[END_LSN_OFF..], end_lsn);
    }

    pub fn space_id(&self) -> u32 {
        BigEndian::read_u32(&self.buf[SPACE_ID_OFF..])
    }

    pub fn first_page_id(&self) -> u32 {
        BigEndian::read_u32(&self.buf[FIRST_PAGE_ID_OFF..])
    }

    /// Stamp the region key of this block.
    pub fn set_key(&mut self, space_id: u32, first_page_id: u32) {
        BigEndian::write_u32(&mut self.buf[SPACE_ID_OFF..], space_id);
        BigEndian::write_u32(&mut self.buf[FIRST_PAGE_ID_OFF..], first_page_id);
    }

    /// Set the bit for `page_no`, which must belong to this block's region.
    pub fn set_page_bit(&mut self, page_no: u32) {
        let bit = page_no as usize % BITMAP_BITS;
        self.buf[BITMAP_OFF + bit / 8] |= 1 << (bit % 8);
    }

    /// Whether bit `bit` of the bitmap is set.
    pub fn bit(&self, bit: usize) -> bool {
        debug_assert!(bit < BITMAP_BITS);
        self.buf[BITMAP_OFF + bit / 8] & (1 << (bit % 8)) != 0
    }

    pub fn stored_checksum(&self) -> u32 {
        LittleEndian::read_u32(&self.buf[CHECKSUM_OFF..])
    }

    pub fn calc_checksum(&self) -> u32 {
        checksum::fold(&self.buf[..CHECKSUM_OFF])
    }

    /// Compute and store the checksum; the block is ready to be written.
    pub fn seal(&mut self) {
        let sum = self.calc_checksum();
        LittleEndian::write_u32(&mut self.buf[CHECKSUM_OFF..], sum);
    }

    pub fn verify(&self) -> bool {
        self.stored_checksum() == self.calc_checksum()
    }
}

impl std::fmt::Debug for BitmapBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitmapBlock")
            .field("space_id", &self.space_id())
            .field("first_page_id", &self.first_page_id())
            .field("start_lsn", &self.start_lsn())
            .field("end_lsn", &self.end_lsn())
            .field("last_in_batch", &self.is_last_in_batch())
            .finish()
    }
}
