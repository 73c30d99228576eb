//! In-flight block records and their free list

use crate::flags::BlockFlags;
use crate::inode::InodeHandle;

/// A single unit moving through the pipeline: either a full data block, a
/// tail fragment awaiting the packer, or a zero-length sentinel marking
/// end-of-file.
#[derive(Debug)]
pub struct Block {
    payload: Vec<u8>,
    pub flags: BlockFlags,
    /// Monotonic submission index, assigned by the front end under the
    /// queue lock. Strictly increasing across the whole processor.
    pub sequence: u64,
    /// In-file block index (data blocks only; unused for fragments and the
    /// end-of-file sentinel).
    pub in_file_index: u32,
    /// `None` for a synthesized fragment-container block, which has no
    /// single owner.
    pub owner: Option<InodeHandle>,
    pub checksum: u32,
    /// Payload length at the moment it was handed to the queue, before a
    /// worker may have shrunk it via compression. This is the size half of
    /// the dedup key; `payload().len()`/`len()` reflect the post-worker
    /// (possibly compressed) size instead.
    pub original_size: u32,
}

impl Block {
    fn new(capacity: usize) -> Self {
        Self {
            payload: Vec::with_capacity(capacity),
            flags: BlockFlags::empty(),
            sequence: 0,
            in_file_index: 0,
            owner: None,
            checksum: 0,
            original_size: 0,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Vec<u8> {
        &mut self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    fn reset(&mut self, capacity: usize) {
        self.payload.clear();
        if self.payload.capacity() < capacity {
            self.payload.reserve(capacity - self.payload.capacity());
        }
        self.flags = BlockFlags::empty();
        self.sequence = 0;
        self.in_file_index = 0;
        self.owner = None;
        self.checksum = 0;
        self.original_size = 0;
    }
}

/// Recycles block buffers so steady-state throughput doesn't churn the
/// allocator. Allocated lazily: the free list starts empty and only ever
/// holds blocks that have finished their trip through the pipeline.
#[derive(Debug, Default)]
pub struct BlockFreeList {
    free: Vec<Block>,
}

impl BlockFreeList {
    pub fn new() -> Self {
        Self { free: Vec::new() }
    }

    /// Take a block from the free list, or allocate a fresh one.
    pub fn take(&mut self, capacity: usize) -> Block {
        match self.free.pop() {
            Some(mut block) => {
                block.reset(capacity);
                block
            },
            None => Block::new(capacity),
        }
    }

    /// Return a block to the free list for reuse.
    pub fn release(&mut self, block: Block) {
        self.free.push(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_recycles_released_buffers() {
        let mut list = BlockFreeList::new();
        let mut block = list.take(4);
        block.payload_mut().extend_from_slice(b"abcd");
        list.release(block);

        let recycled = list.take(4);
        assert!(recycled.is_empty());
        assert!(recycled.payload().capacity() >= 4);
    }

    #[test]
    fn take_allocates_when_free_list_empty() {
        let mut list = BlockFreeList::new();
        let block = list.take(8);
        assert_eq!(block.len(), 0);
    }
}
