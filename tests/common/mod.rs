//! In-memory fakes for the three injected collaborators, shared by the
//! integration tests.

use sqfs_block_processor::{BlockCompressor, BlockProcessorError, BlockWriter, CompressOutcome, FragmentEntry, FragmentTable};

/// Always fails, to exercise the sticky-error path a real codec failure
/// would take.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingCompressor;

impl BlockCompressor for FailingCompressor {
    fn clone_boxed(&self) -> Box<dyn BlockCompressor> {
        Box::new(*self)
    }

    fn compress(&mut self, _input: &[u8], _out: &mut Vec<u8>) -> sqfs_block_processor::Result<CompressOutcome> {
        Err(BlockProcessorError::Compressor("simulated codec failure".to_string()))
    }
}

/// Appends every write to an in-memory buffer, returning the offset it
/// landed at — a minimal stand-in for a real file-backed block writer.
#[derive(Default)]
pub struct InMemoryWriter {
    pub data: Vec<u8>,
}

impl BlockWriter for InMemoryWriter {
    fn write(&mut self, payload: &[u8]) -> sqfs_block_processor::Result<u64> {
        let offset = self.data.len() as u64;
        self.data.extend_from_slice(payload);
        Ok(offset)
    }
}

/// Fragment table backed by a plain `Vec`. Cross-block fragment dedup is
/// handled by the processor's own fragment packer, so this fake never
/// needs to answer `lookup_by_checksum` itself.
#[derive(Default)]
pub struct InMemoryFragmentTable {
    pub entries: Vec<FragmentEntry>,
}

impl FragmentTable for InMemoryFragmentTable {
    fn append(&mut self, offset: u64, size: u32, compressed: bool) -> sqfs_block_processor::Result<u32> {
        let index = self.entries.len() as u32;
        self.entries.push(FragmentEntry { offset, size, compressed });
        Ok(index)
    }

    fn lookup_by_checksum(&self, _size: u32, _checksum: u32) -> Option<(u32, u32)> {
        None
    }
}
