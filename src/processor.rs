//! The public streaming block/fragment processor

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, info, instrument, trace, warn};

use crate::block::{Block, BlockFreeList};
use crate::collaborators::{BlockCompressor, BlockWriter, FragmentTable};
use crate::dedup::{BlockDedupIndex, BlockLocation};
use crate::error::{BlockProcessorError, Result};
use crate::flags::BlockFlags;
use crate::fragment_packer::{AdmitOutcome, EmittedFragmentBlock, FragmentPacker};
use crate::inode::{new_inode_handle, DataSize, InodeHandle};
use crate::pool::WorkerPool;
use crate::stats::{Stats, StatsSnapshot};

/// Runtime knobs, mirroring the teacher's setter-style configuration
/// surface: out-of-range values panic rather than return a `Result`,
/// since they're programmer errors, not data errors.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    max_block_size: u32,
    num_workers: usize,
    max_backlog: usize,
}

impl Config {
    /// A fresh config for the given maximum block size. `max_block_size`
    /// must be nonzero; a power of two is recommended but not enforced.
    pub fn new(max_block_size: u32) -> Self {
        assert!(max_block_size > 0, "max_block_size must be nonzero");
        Self { max_block_size, num_workers: 1, max_backlog: 2 }
    }

    pub fn max_block_size(&self) -> u32 {
        self.max_block_size
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn max_backlog(&self) -> usize {
        self.max_backlog
    }

    /// `0` runs the processor serially on the producer thread.
    pub fn set_num_workers(&mut self, num_workers: usize) -> &mut Self {
        assert!(
            self.max_backlog >= num_workers,
            "max_backlog must be >= num_workers"
        );
        self.num_workers = num_workers;
        self
    }

    pub fn set_max_backlog(&mut self, max_backlog: usize) -> &mut Self {
        assert!(
            max_backlog >= self.num_workers,
            "max_backlog must be >= num_workers"
        );
        self.max_backlog = max_backlog;
        self
    }
}

/// Per-file producer-side state. Not shared with workers — only the
/// producer thread ever touches it.
struct OpenFile {
    inode: InodeHandle,
    flag_template: BlockFlags,
    in_file_index: u32,
    current: Option<Block>,
}

/// The block/fragment processor core: a streaming begin/append/end/finish
/// interface backed by a worker pool and an ordered completer.
pub struct Processor {
    config: Config,
    pool: WorkerPool,
    writer: Box<dyn BlockWriter>,
    fragment_table: Box<dyn FragmentTable>,
    free_list: BlockFreeList,
    dedup: BlockDedupIndex,
    fragment_packer: FragmentPacker,
    stats: Stats,
    next_sequence: u64,
    next_expected: u64,
    pending_fragment_members: FxHashMap<u64, Vec<(u32, InodeHandle)>>,
    open: Option<OpenFile>,
}

impl Processor {
    pub fn new(
        config: Config,
        compressor: Arc<dyn BlockCompressor>,
        writer: Box<dyn BlockWriter>,
        fragment_table: Box<dyn FragmentTable>,
    ) -> Self {
        let pool = WorkerPool::new(config.num_workers, config.max_backlog, compressor);
        Self {
            config,
            pool,
            writer,
            fragment_table,
            free_list: BlockFreeList::new(),
            dedup: BlockDedupIndex::new(),
            fragment_packer: FragmentPacker::new(config.max_block_size as usize),
            stats: Stats::new(),
            next_sequence: 0,
            next_expected: 0,
            pending_fragment_members: FxHashMap::default(),
            open: None,
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Begin a new regular file. `flag_hints` must be a subset of
    /// [`BlockFlags::USER_SETTABLE`].
    #[instrument(skip(self))]
    pub fn begin_file(&mut self, flag_hints: BlockFlags) -> Result<InodeHandle> {
        self.check_sticky()?;
        if self.open.is_some() {
            return Err(BlockProcessorError::Sequence);
        }
        if flag_hints.difference(BlockFlags::USER_SETTABLE) != BlockFlags::empty() {
            return Err(BlockProcessorError::Unsupported);
        }
        let inode = new_inode_handle();
        self.open = Some(OpenFile {
            inode: inode.clone(),
            flag_template: flag_hints | BlockFlags::FIRST_BLOCK,
            in_file_index: 0,
            current: None,
        });
        debug!("file opened");
        Ok(inode)
    }

    /// Feed the next chunk of the currently open file.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.check_sticky()?;
        let mut open = self.open.take().ok_or(BlockProcessorError::Sequence)?;
        let result = self.append_inner(&mut open, data);
        self.open = Some(open);
        result
    }

    fn append_inner(&mut self, open: &mut OpenFile, data: &[u8]) -> Result<()> {
        {
            let mut slot = open.inode.lock().unwrap();
            slot.file_size += data.len() as u64;
        }
        self.stats.add_input_bytes_read(data.len() as u64);

        let max_block_size = self.config.max_block_size() as usize;
        let mut offset = 0usize;
        while offset < data.len() {
            if open.current.is_none() {
                let mut block = self.free_list.take(max_block_size);
                block.owner = Some(open.inode.clone());
                block.flags = open.flag_template;
                open.current = Some(block);
            }

            let current = open.current.as_mut().unwrap();
            let take = (max_block_size - current.len()).min(data.len() - offset);
            current.payload_mut().extend_from_slice(&data[offset..offset + take]);
            offset += take;

            if open.current.as_ref().unwrap().len() == max_block_size {
                let full = open.current.take().unwrap();
                self.flush_block(open, full)?;
            }
        }
        Ok(())
    }

    /// Close the currently open file.
    #[instrument(skip(self))]
    pub fn end_file(&mut self) -> Result<()> {
        self.check_sticky()?;
        let mut open = self.open.take().ok_or(BlockProcessorError::Sequence)?;
        self.end_file_inner(&mut open)
    }

    fn end_file_inner(&mut self, open: &mut OpenFile) -> Result<()> {
        if !open.flag_template.contains(BlockFlags::FIRST_BLOCK) {
            let mark_current_last =
                open.current.is_some() && open.flag_template.contains(BlockFlags::DONT_FRAGMENT);
            if mark_current_last {
                open.current.as_mut().unwrap().flags.insert(BlockFlags::LAST_BLOCK);
            } else {
                let mut sentinel = self.free_list.take(0);
                sentinel.owner = Some(open.inode.clone());
                sentinel.flags = BlockFlags::LAST_BLOCK;
                self.submit_block(sentinel)?;
            }
        }
        if let Some(current) = open.current.take() {
            self.flush_block(open, current)?;
        }
        debug!("file closed");
        Ok(())
    }

    /// Decide data-block vs. fragment disposition for a just-filled or
    /// just-closed block and submit it.
    fn flush_block(&mut self, open: &mut OpenFile, mut block: Block) -> Result<()> {
        block.original_size = block.len() as u32;
        let max_block_size = self.config.max_block_size() as usize;
        let is_full = block.len() == max_block_size;
        let dont_fragment = block.flags.contains(BlockFlags::DONT_FRAGMENT);

        if block.is_empty() {
            // zero-length LAST_BLOCK sentinel injected by end_file
        } else if is_full && is_all_zero(block.payload()) {
            block.flags.insert(BlockFlags::IS_SPARSE);
            open.flag_template.remove(BlockFlags::FIRST_BLOCK);
            block.in_file_index = open.in_file_index;
            open.in_file_index += 1;
        } else if !is_full && !dont_fragment {
            block.flags.insert(BlockFlags::IS_FRAGMENT);
        } else {
            open.flag_template.remove(BlockFlags::FIRST_BLOCK);
            block.in_file_index = open.in_file_index;
            open.in_file_index += 1;
        }

        self.submit_block(block)?;
        Ok(())
    }

    /// Wait for outstanding work to finish, flush the fragment packer's
    /// pending block, and wait again. Mirrors the injected collaborators'
    /// single-writer assumption: the fragment table is written to only
    /// from this thread.
    #[instrument(skip(self))]
    pub fn finish(&mut self) -> Result<()> {
        info!("finishing");
        self.drain_until_idle()?;
        if let Some(emitted) = self.fragment_packer.flush() {
            self.enqueue_fragment_container(emitted)?;
        }
        self.drain_until_idle()?;
        Ok(())
    }

    fn check_sticky(&self) -> Result<()> {
        match self.pool.shared().lock().unwrap().status.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Enqueue a block, assigning it the next sequence number, and apply
    /// backpressure if the backlog is at capacity.
    fn submit_block(&mut self, mut block: Block) -> Result<u64> {
        let mut guard = self.pool.shared().lock().unwrap();
        if let Some(err) = guard.status.clone() {
            drop(guard);
            self.free_list.release(block);
            return Err(err);
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        block.sequence = sequence;
        guard.backlog += 1;
        guard.queue.push_back(block);
        drop(guard);
        self.pool.not_empty().notify_all();
        trace!(sequence, "block submitted");

        self.relieve_backpressure()?;
        Ok(sequence)
    }

    fn relieve_backpressure(&mut self) -> Result<()> {
        loop {
            self.run_completer()?;
            let guard = self.pool.shared().lock().unwrap();
            if guard.backlog < self.config.max_backlog() {
                return Ok(());
            }
            let _ = self.pool.progressed().wait(guard).unwrap();
        }
    }

    fn drain_until_idle(&mut self) -> Result<()> {
        loop {
            self.pool.run_inline();
            self.drain_completed_buffer();
            let guard = self.pool.shared().lock().unwrap();
            if guard.backlog == 0 {
                let status = guard.status.clone();
                drop(guard);
                return match status {
                    Some(err) => Err(err),
                    None => Ok(()),
                };
            }
            let _ = self.pool.progressed().wait(guard).unwrap();
        }
    }

    /// Peel everything currently sitting at the front of the completion
    /// buffer, dispatching or discarding as appropriate, then return the
    /// sticky status. Used by producer operations that must surface the
    /// error immediately (append/end_file/begin_file's backpressure path).
    fn run_completer(&mut self) -> Result<()> {
        self.pool.run_inline();
        self.drain_completed_buffer();
        match self.pool.shared().lock().unwrap().status.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Drain whatever's ready without surfacing the sticky status — used
    /// by `finish`, which must keep draining even past the first error so
    /// the backlog still converges to zero.
    fn drain_completed_buffer(&mut self) {
        loop {
            let taken = {
                let mut guard = self.pool.shared().lock().unwrap();
                let block = guard.completed.take_if_next(self.next_expected);
                if block.is_some() {
                    guard.backlog -= 1;
                }
                block
            };
            let block = match taken {
                Some(b) => b,
                None => break,
            };
            self.next_expected += 1;
            self.pool.progressed().notify_all();

            let status_set = self.pool.shared().lock().unwrap().status.is_some();
            if status_set {
                trace!(sequence = block.sequence, "discarding block after sticky error");
                self.free_list.release(block);
            } else {
                let _ = self.dispatch(block);
            }
        }
    }

    fn dispatch(&mut self, mut block: Block) -> Result<()> {
        let result = self.dispatch_inner(&mut block);
        if let Err(err) = &result {
            let mut guard = self.pool.shared().lock().unwrap();
            if guard.status.is_none() {
                warn!(error = %err, "latching sticky error");
                guard.status = Some(err.clone());
            }
        }
        self.free_list.release(block);
        result
    }

    fn dispatch_inner(&mut self, block: &mut Block) -> Result<()> {
        if block.is_empty() {
            // pure LAST_BLOCK sentinel: nothing to record, file already
            // finalized incrementally by earlier dispatches.
            return Ok(());
        }
        if block.flags.contains(BlockFlags::IS_SPARSE) {
            self.dispatch_sparse(block);
        } else if block.flags.contains(BlockFlags::IS_FRAGMENT) {
            self.dispatch_fragment(block)?;
        } else if block.owner.is_none() {
            self.dispatch_fragment_container(block)?;
        } else {
            self.dispatch_data_block(block)?;
        }
        Ok(())
    }

    fn dispatch_sparse(&mut self, block: &Block) {
        let owner = block.owner.clone().expect("sparse block always has an owner");
        owner.lock().unwrap().set_block_size(block.in_file_index, DataSize::sparse());
        self.stats.inc_sparse_block_count();
    }

    fn dispatch_fragment(&mut self, block: &Block) -> Result<()> {
        self.stats.inc_total_frag_count();
        let owner = block.owner.clone().expect("fragment block always has an owner");
        let outcome = self.fragment_packer.admit(
            block.payload(),
            block.checksum,
            owner.clone(),
            self.fragment_table.as_ref(),
        )?;

        match outcome {
            AdmitOutcome::Deduplicated { fragment_block_index, offset } => {
                owner.lock().unwrap().fragment_location = (fragment_block_index, offset);
            },
            AdmitOutcome::Admitted { fragment_block_index, offset } => {
                owner.lock().unwrap().fragment_location = (fragment_block_index, offset);
                self.stats.inc_actual_frag_count();
            },
            AdmitOutcome::AdmittedAfterEmit { fragment_block_index, offset, emitted } => {
                owner.lock().unwrap().fragment_location = (fragment_block_index, offset);
                self.stats.inc_actual_frag_count();
                self.enqueue_fragment_container(emitted)?;
            },
        }
        Ok(())
    }

    fn dispatch_data_block(&mut self, block: &mut Block) -> Result<()> {
        let owner = block.owner.clone().expect("data block always has an owner");
        let uncompressed_size = block.original_size;
        let checksum = block.checksum;

        let (on_disk_offset, on_disk_size, compressed) =
            if let Some(loc) = self.dedup.lookup(uncompressed_size, checksum) {
                (loc.on_disk_offset, loc.on_disk_size, loc.compressed)
            } else {
                let offset = self.writer.write(block.payload())?;
                let size = block.len() as u32;
                let compressed = block.flags.contains(BlockFlags::IS_COMPRESSED);
                self.dedup.insert(
                    uncompressed_size,
                    checksum,
                    BlockLocation { on_disk_offset: offset, on_disk_size: size, compressed },
                );
                (offset, size, compressed)
            };

        let mut slot = owner.lock().unwrap();
        if slot.blocks_start.is_none() {
            slot.blocks_start = Some(on_disk_offset);
        }
        slot.set_block_size(block.in_file_index, DataSize::new(on_disk_size, compressed));
        drop(slot);

        self.stats.inc_data_block_count();
        Ok(())
    }

    fn dispatch_fragment_container(&mut self, block: &mut Block) -> Result<()> {
        let members = self
            .pending_fragment_members
            .remove(&block.sequence)
            .expect("fragment container dispatched without its member list");

        let offset = self.writer.write(block.payload())?;
        let compressed = block.flags.contains(BlockFlags::IS_COMPRESSED);
        let index = self.fragment_table.append(offset, block.len() as u32, compressed)?;

        for (byte_offset, owner) in members {
            owner.lock().unwrap().fragment_location = (index, byte_offset);
        }
        self.stats.inc_frag_block_count();
        Ok(())
    }

    fn enqueue_fragment_container(&mut self, emitted: EmittedFragmentBlock) -> Result<()> {
        let (payload, members) = emitted.into_parts();

        let mut block = self.free_list.take(self.config.max_block_size() as usize);
        block.owner = None;
        block.flags = BlockFlags::empty();
        block.original_size = payload.len() as u32;
        block.payload_mut().extend_from_slice(&payload);

        let sequence = self.submit_block(block)?;
        self.pending_fragment_members.insert(sequence, members);
        Ok(())
    }

    /// Stop the worker pool. Must be called after `finish` returns (or
    /// instead of it, on an abandoned processor) to join every thread.
    pub fn shutdown(self) {
        self.pool.shutdown();
    }
}

/// A full-size block of all-zero bytes is treated as sparse: the front end
/// detects it itself rather than requiring a caller-supplied hint, since
/// `IS_SPARSE` isn't in [`BlockFlags::USER_SETTABLE`].
fn is_all_zero(payload: &[u8]) -> bool {
    payload.iter().all(|&b| b == 0)
}
