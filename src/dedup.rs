//! Content-addressed dedup index for full data blocks

use rustc_hash::FxHashMap;

/// Key a data block is deduplicated by: its uncompressed size plus CRC-32.
/// (P6) no two distinct on-disk blocks may share a key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub size: u32,
    pub checksum: u32,
}

/// Location and disposition of a previously written data block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockLocation {
    pub on_disk_offset: u64,
    pub on_disk_size: u32,
    pub compressed: bool,
}

/// Maps `(uncompressed_size, checksum)` to where that block already lives
/// on disk, so a later identical block can skip the writer entirely.
///
/// `FxHashMap` (carried from the teacher's `rustc-hash` dependency) is used
/// because dedup keys are processor-internal, not adversarial input.
#[derive(Debug, Default)]
pub struct BlockDedupIndex {
    map: FxHashMap<BlockKey, BlockLocation>,
}

impl BlockDedupIndex {
    pub fn new() -> Self {
        Self { map: FxHashMap::default() }
    }

    pub fn lookup(&self, size: u32, checksum: u32) -> Option<BlockLocation> {
        self.map.get(&BlockKey { size, checksum }).copied()
    }

    pub fn insert(&mut self, size: u32, checksum: u32, location: BlockLocation) {
        self.map.insert(BlockKey { size, checksum }, location);
    }
}
