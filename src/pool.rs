//! Worker pool: drains the submission queue, compresses, deposits into the
//! completion buffer

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use crate::block::Block;
use crate::collaborators::{BlockCompressor, CompressOutcome};
use crate::completer::CompletionBuffer;
use crate::error::BlockProcessorError;
use crate::flags::BlockFlags;
use crate::queue::SubmissionQueue;

/// State shared between the producer thread and every worker, guarded by
/// one mutex the way the source design calls for (§5: "a single
/// processor-wide mutex; condition variables paired to it").
pub struct Shared {
    pub queue: SubmissionQueue,
    pub completed: CompletionBuffer,
    pub backlog: usize,
    pub max_backlog: usize,
    pub status: Option<BlockProcessorError>,
    pub shutting_down: bool,
}

impl Shared {
    fn new(max_backlog: usize) -> Self {
        Self {
            queue: SubmissionQueue::new(),
            completed: CompletionBuffer::new(),
            backlog: 0,
            max_backlog,
            status: None,
            shutting_down: false,
        }
    }
}

/// A pool of `num_workers` threads, or zero for serial mode: no threads are
/// spawned and the producer thread runs the compressor itself, inline,
/// every time it submits a block.
pub struct WorkerPool {
    shared: Arc<Mutex<Shared>>,
    not_empty: Arc<Condvar>,
    progressed: Arc<Condvar>,
    workers: Vec<JoinHandle<()>>,
    /// `Some` only in serial mode (`num_workers == 0`); holds the one
    /// compressor instance the producer thread runs inline.
    inline: Option<(Box<dyn BlockCompressor>, Vec<u8>)>,
}

impl WorkerPool {
    pub fn new(num_workers: usize, max_backlog: usize, compressor: Arc<dyn BlockCompressor>) -> Self {
        let shared = Arc::new(Mutex::new(Shared::new(max_backlog)));
        let not_empty = Arc::new(Condvar::new());
        let progressed = Arc::new(Condvar::new());

        let mut workers = Vec::with_capacity(num_workers);
        for index in 0..num_workers {
            let shared = Arc::clone(&shared);
            let not_empty = Arc::clone(&not_empty);
            let progressed = Arc::clone(&progressed);
            let mut local_compressor = compressor.clone_boxed();
            workers.push(thread::spawn(move || {
                worker_loop(index, shared, not_empty, progressed, local_compressor.as_mut());
            }));
        }

        let inline = (num_workers == 0).then(|| (compressor.clone_boxed(), Vec::new()));

        debug!(num_workers, max_backlog, "worker pool started");
        Self { shared, not_empty, progressed, workers, inline }
    }

    pub fn shared(&self) -> &Arc<Mutex<Shared>> {
        &self.shared
    }

    pub fn not_empty(&self) -> &Arc<Condvar> {
        &self.not_empty
    }

    pub fn progressed(&self) -> &Arc<Condvar> {
        &self.progressed
    }

    /// In serial mode, drain the submission queue on the calling (producer)
    /// thread, compressing and depositing into the completion buffer exactly
    /// as a worker thread would. A no-op once `num_workers >= 1`.
    pub fn run_inline(&mut self) {
        let Some((compressor, scratch)) = self.inline.as_mut() else { return };
        loop {
            let mut guard = self.shared.lock().unwrap();
            if guard.status.is_some() {
                while let Some(block) = guard.queue.pop_front() {
                    guard.completed.insert(block);
                }
                drop(guard);
                self.progressed.notify_all();
                return;
            }
            let block = match guard.queue.pop_front() {
                Some(block) => block,
                None => return,
            };
            drop(guard);

            let result = process_block(block, compressor.as_mut(), scratch);

            let mut guard = self.shared.lock().unwrap();
            match result {
                Ok(processed) => guard.completed.insert(processed),
                Err((block, err)) => {
                    warn!(error = %err, "latching sticky error");
                    if guard.status.is_none() {
                        guard.status = Some(err);
                    }
                    guard.completed.insert(block);
                },
            }
            drop(guard);
            self.progressed.notify_all();
        }
    }

    /// Signal shutdown and join every worker. Idempotent: calling this
    /// twice is harmless since `shutting_down` only ever goes one way.
    pub fn shutdown(mut self) {
        {
            let mut shared = self.shared.lock().unwrap();
            shared.shutting_down = true;
        }
        self.not_empty.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        debug!("worker pool shut down");
    }
}

fn worker_loop(
    index: usize,
    shared: Arc<Mutex<Shared>>,
    not_empty: Arc<Condvar>,
    progressed: Arc<Condvar>,
    compressor: &mut dyn BlockCompressor,
) {
    trace!(index, "worker started");
    let mut scratch = Vec::new();
    loop {
        let mut guard = shared.lock().unwrap();
        loop {
            // Once the sticky status is latched, this worker stops doing
            // real work: anything still sitting in the queue is moved
            // straight into the completion buffer so the producer-side
            // completer can discard it and still see backlog reach zero.
            if guard.status.is_some() {
                while let Some(block) = guard.queue.pop_front() {
                    guard.completed.insert(block);
                }
                if !guard.queue.is_empty() {
                    continue;
                }
            }

            if let Some(block) = guard.queue.pop_front() {
                drop(guard);
                let result = process_block(block, compressor, &mut scratch);
                guard = shared.lock().unwrap();
                match result {
                    Ok(processed) => guard.completed.insert(processed),
                    Err((block, err)) => {
                        warn!(error = %err, "latching sticky error");
                        if guard.status.is_none() {
                            guard.status = Some(err);
                        }
                        guard.completed.insert(block);
                    },
                }
                progressed.notify_all();
                break;
            }

            if guard.shutting_down {
                return;
            }

            guard = not_empty.wait(guard).unwrap();
        }
    }
}

/// Compress (or skip) one block in isolation from the shared state, the
/// way a real worker thread would — this is the only part of the pipeline
/// that runs without holding the processor mutex. A compressor failure is
/// returned rather than swallowed, so the caller can latch the sticky
/// status the same way `Processor::dispatch` does.
fn process_block(
    mut block: Block,
    compressor: &mut dyn BlockCompressor,
    scratch: &mut Vec<u8>,
) -> std::result::Result<Block, (Block, BlockProcessorError)> {
    if block.is_empty() {
        block.checksum = 0;
        return Ok(block);
    }

    if block.flags.contains(BlockFlags::IS_SPARSE) {
        trace!(sequence = block.sequence, "skipping compression for sparse block");
        return Ok(block);
    }

    block.checksum = crc32fast::hash(block.payload());

    if block.flags.contains(BlockFlags::IS_FRAGMENT) {
        trace!(sequence = block.sequence, "skipping compression for fragment");
        return Ok(block);
    }

    if block.flags.contains(BlockFlags::DONT_COMPRESS) {
        return Ok(block);
    }

    match compressor.compress(block.payload(), scratch) {
        Ok(CompressOutcome::Compressed { len }) if len < block.len() => {
            block.payload_mut().clear();
            block.payload_mut().extend_from_slice(&scratch[..len]);
            block.flags.insert(BlockFlags::IS_COMPRESSED);
        },
        Ok(_) => {},
        Err(err) => return Err((block, err)),
    }

    Ok(block)
}
