//! In-memory set of pages modified since the last flush.

use std::collections::BTreeMap;

use super::block::{BitmapBlock, BITMAP_BITS};

/// Key of one bitmap block: a tablespace and the first page of a
/// 32448-page region. Ordered by space first, then region, which is the
/// order blocks are flushed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageBlockKey {
    pub space_id: u32,
    pub block_start_page: u32,
}

impl PageBlockKey {
    /// Key of the region containing `(space_id, page_no)`.
    pub fn containing(space_id: u32, page_no: u32) -> Self {
        Self {
            space_id,
            block_start_page: page_no / BITMAP_BITS as u32 * BITMAP_BITS as u32,
        }
    }
}

/// Sparse map from block region to its bitmap block, with a free list of
/// block buffers so flush cycles do not reallocate.
pub struct ModifiedPageSet {
    blocks: BTreeMap<PageBlockKey, BitmapBlock>,
    free_list: Vec<BitmapBlock>,
}

impl ModifiedPageSet {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            blocks: BTreeMap::new(),
            free_list: Vec::new(),
        }
    }

    /// Mark `(space_id, page_no)` modified, creating the region's block if
    /// this is the first bit in it.
    pub fn set_bit(&mut self, space_id: u32, page_no: u32) {
        let key = PageBlockKey::containing(space_id, page_no);
        let block = self.blocks.entry(key).or_insert_with(|| {
            let mut block = match self.free_list.pop() {
                Some(mut recycled) => {
                    recycled.zero();
                    recycled
                }
                None => BitmapBlock::zeroed(),
            };
            block.set_key(key.space_id, key.block_start_page);
            block
        });
        block.set_page_bit(page_no);
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Take all blocks out of the set in ascending key order. The caller
    /// hands each one back through [`recycle`](Self::recycle) once written
    /// (or abandoned), keeping the buffers pooled.
    pub fn drain(&mut self) -> Vec<BitmapBlock> {
        let blocks = std::mem::take(&mut self.blocks);
        blocks.into_values().collect()
    }

    /// Return a drained block's buffer to the free list.
    pub fn recycle(&mut self, block: BitmapBlock) {
        self.free_list.push(block);
    }

    #[cfg(test)]
    fn free_count(&self) -> usize {
        self.free_list.len()
    }
}
