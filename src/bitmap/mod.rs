//! Modified-page bitmap files.
//!
//! Each follow cycle appends one *write batch* of fixed 4KB blocks to the
//! current bitmap file; incremental backup tools later read these files to
//! learn which pages changed in which LSN interval.
//!
//! # File format
//!
//! A bitmap file is a plain sequence of blocks, rotated by size:
//!
//! ```text
//! ib_modified_log_<seq>_<start_lsn>.xdb
//! +------------------+
//! | Block (4096)     |   batch 1
//! +------------------+
//! | Block (4096)     |   batch 2 ...
//! +------------------+
//! | ...              |
//! +------------------+
//! ```
//!
//! ## Block format
//!
//! ```text
//! +---------------------+------+
//! | is_last_block: u32  |    0 |  1 on the final block of a batch
//! | start_lsn: u64      |    4 |  tracked interval start
//! | end_lsn: u64        |   12 |  tracked interval end
//! | space_id: u32       |   20 |  tablespace of every bit in the block
//! | first_page_id: u32  |   24 |  first page of the 32448-page region
//! | (padding)           |   28 |
//! | bitmap              |   32 |  one bit per page, LSB first
//! | (padding)           | 4088 |
//! | checksum: u32 LE    | 4092 |  folds bytes [0, 4092)
//! +---------------------+------+
//! ```
//!
//! Multi-byte header fields are big-endian; the checksum alone is stored
//! little-endian. All blocks of one batch share the same LSN interval and
//! exactly one of them, the greatest `(space_id, first_page_id)`, carries
//! `is_last_block = 1`.

pub mod block;
pub mod file;
pub mod iterator;
pub mod range;
pub mod reader;
pub mod set;
pub mod writer;

pub use block::{BitmapBlock, BITMAP_BITS, BLOCK_SIZE};
pub use iterator::{BitmapIterator, PageBit};
pub use range::{BitmapFileEntry, BitmapFileRange};
pub use reader::BitmapReader;
pub use set::{ModifiedPageSet, PageBlockKey};
pub use writer::BitmapWriter;
