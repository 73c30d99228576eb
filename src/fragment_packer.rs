//! Accumulates tail fragments into packed blocks, deduplicating as it goes

use rustc_hash::FxHashMap;

use crate::collaborators::FragmentTable;
use crate::error::Result;
use crate::inode::InodeHandle;

/// One fragment already laid out into the pending block's buffer.
struct PendingFragment {
    offset: u32,
    size: u32,
    checksum: u32,
    owner: InodeHandle,
}

/// A fragment block ready to be compressed, written, and recorded — the
/// packer can't do any of that itself since it doesn't own the queue, the
/// sequence counter, or the block writer.
pub struct EmittedFragmentBlock {
    pub fragment_block_index: u32,
    pub payload: Vec<u8>,
    members: Vec<(u32, InodeHandle)>,
}

impl EmittedFragmentBlock {
    /// Consumes the emission, returning the packed payload and the
    /// `(byte_offset, owner)` pairs for every fragment packed into it, in
    /// the order the caller should set `fragment_location` once the
    /// block's own on-disk index is known.
    pub fn into_parts(self) -> (Vec<u8>, Vec<(u32, InodeHandle)>) {
        (self.payload, self.members)
    }
}

pub enum AdmitOutcome {
    /// Matched a fragment already packed (pending or on disk).
    Deduplicated { fragment_block_index: u32, offset: u32 },
    /// Freshly appended to the pending block, no emission triggered.
    Admitted { fragment_block_index: u32, offset: u32 },
    /// Freshly appended after the previous pending block had to be
    /// emitted to make room.
    AdmittedAfterEmit {
        fragment_block_index: u32,
        offset: u32,
        emitted: EmittedFragmentBlock,
    },
}

/// Packs tail fragments from many files into shared blocks, the way a
/// SquashFS writer's fragment table is built.
pub struct FragmentPacker {
    max_block_size: usize,
    buffer: Vec<u8>,
    pending: Vec<PendingFragment>,
    next_fragment_block_index: u32,
    /// Dedup key -> location for every fragment packed into an *already
    /// emitted* block, across the processor's whole lifetime. The spec
    /// describes this as "the fragment table's global dedup index,
    /// scanned by the packer" — the packer is what actually maintains it;
    /// the injected `FragmentTable` is consulted too, as a secondary
    /// source (e.g. a table pre-populated by the caller).
    committed: FxHashMap<(u32, u32), (u32, u32)>,
}

impl FragmentPacker {
    pub fn new(max_block_size: usize) -> Self {
        Self {
            max_block_size,
            buffer: Vec::with_capacity(max_block_size),
            pending: Vec::new(),
            next_fragment_block_index: 0,
            committed: FxHashMap::default(),
        }
    }

    pub fn admit(
        &mut self,
        payload: &[u8],
        checksum: u32,
        owner: InodeHandle,
        fragment_table: &dyn FragmentTable,
    ) -> Result<AdmitOutcome> {
        let size = payload.len() as u32;

        if let Some(hit) = self
            .pending
            .iter()
            .find(|f| f.size == size && f.checksum == checksum)
        {
            return Ok(AdmitOutcome::Deduplicated {
                fragment_block_index: self.next_fragment_block_index,
                offset: hit.offset,
            });
        }

        if let Some(&(fragment_block_index, offset)) = self.committed.get(&(size, checksum)) {
            return Ok(AdmitOutcome::Deduplicated { fragment_block_index, offset });
        }

        if let Some((fragment_block_index, offset)) = fragment_table.lookup_by_checksum(size, checksum) {
            return Ok(AdmitOutcome::Deduplicated { fragment_block_index, offset });
        }

        let mut emitted = None;
        if self.buffer.len() + payload.len() > self.max_block_size && !self.buffer.is_empty() {
            emitted = Some(self.emit());
        }

        let offset = self.buffer.len() as u32;
        self.buffer.extend_from_slice(payload);
        self.pending.push(PendingFragment { offset, size, checksum, owner });

        let fragment_block_index = self.next_fragment_block_index;
        Ok(match emitted {
            Some(emitted) => AdmitOutcome::AdmittedAfterEmit { fragment_block_index, offset, emitted },
            None => AdmitOutcome::Admitted { fragment_block_index, offset },
        })
    }

    /// Force out the pending block (if nonempty) during `finish`.
    pub fn flush(&mut self) -> Option<EmittedFragmentBlock> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.emit())
        }
    }

    fn emit(&mut self) -> EmittedFragmentBlock {
        let fragment_block_index = self.next_fragment_block_index;
        self.next_fragment_block_index += 1;

        let payload = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.max_block_size));
        let pending = std::mem::take(&mut self.pending);
        for f in &pending {
            self.committed.insert((f.size, f.checksum), (fragment_block_index, f.offset));
        }
        let members = pending.into_iter().map(|f| (f.offset, f.owner)).collect();

        EmittedFragmentBlock { fragment_block_index, payload, members }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::new_inode_handle;

    struct EmptyTable;
    impl FragmentTable for EmptyTable {
        fn append(&mut self, _offset: u64, _size: u32, _compressed: bool) -> Result<u32> {
            unreachable!()
        }
        fn lookup_by_checksum(&self, _size: u32, _checksum: u32) -> Option<(u32, u32)> {
            None
        }
    }

    #[test]
    fn first_admission_predicts_its_own_block_index() {
        let mut packer = FragmentPacker::new(16);
        let owner = new_inode_handle();
        let outcome = packer.admit(b"abc", 0x1234, owner, &EmptyTable).unwrap();
        match outcome {
            AdmitOutcome::Admitted { fragment_block_index, offset } => {
                assert_eq!(fragment_block_index, 0);
                assert_eq!(offset, 0);
            },
            _ => panic!("expected Admitted"),
        }
    }

    #[test]
    fn overflow_emits_previous_block_first() {
        let mut packer = FragmentPacker::new(4);
        let owner = new_inode_handle();
        packer.admit(b"abcd", 1, owner.clone(), &EmptyTable).unwrap();
        let outcome = packer.admit(b"e", 2, owner, &EmptyTable).unwrap();
        match outcome {
            AdmitOutcome::AdmittedAfterEmit { fragment_block_index, offset, emitted } => {
                assert_eq!(emitted.fragment_block_index, 0);
                assert_eq!(emitted.payload, b"abcd");
                assert_eq!(fragment_block_index, 1);
                assert_eq!(offset, 0);
            },
            _ => panic!("expected AdmittedAfterEmit"),
        }
    }

    #[test]
    fn duplicate_within_pending_block_dedups() {
        let mut packer = FragmentPacker::new(16);
        let owner = new_inode_handle();
        packer.admit(b"abc", 0x1234, owner.clone(), &EmptyTable).unwrap();
        let outcome = packer.admit(b"abc", 0x1234, owner, &EmptyTable).unwrap();
        assert!(matches!(outcome, AdmitOutcome::Deduplicated { offset: 0, .. }));
    }

    #[test]
    fn duplicate_after_emission_dedups_against_committed_index() {
        let mut packer = FragmentPacker::new(4);
        let owner = new_inode_handle();
        packer.admit(b"abcd", 1, owner.clone(), &EmptyTable).unwrap();
        // "efgh" overflows block 0, forcing its emission before admitting.
        packer.admit(b"efgh", 2, owner.clone(), &EmptyTable).unwrap();
        // A later file's identical fragment should now hit the committed
        // index from the already-emitted block 0, not the still-pending
        // block 1 (which holds "efgh", a different key).
        let outcome = packer.admit(b"abcd", 1, owner, &EmptyTable).unwrap();
        assert!(matches!(
            outcome,
            AdmitOutcome::Deduplicated { fragment_block_index: 0, offset: 0 }
        ));
    }
}
