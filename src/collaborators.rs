//! Traits for the three collaborators the processor is injected with

use crate::error::Result;

/// Outcome of attempting to compress one block's payload.
pub enum CompressOutcome {
    /// Compression produced `len` bytes in `out`, strictly smaller than the
    /// input. The caller should keep `out` and discard the original.
    Compressed { len: usize },
    /// Compression didn't help (output would be >= input); the original
    /// payload should be kept untouched.
    NotWorthwhile,
}

/// Injected compression backend. The core never inspects internal state;
/// it only ever clones one instance per worker thread and calls `compress`.
pub trait BlockCompressor: Send + Sync {
    /// Deep-clone this compressor for exclusive use by one worker thread.
    fn clone_boxed(&self) -> Box<dyn BlockCompressor>;

    /// Compress `input` into `out` (`out` is caller-provided scratch space,
    /// reused across calls). Returns [`CompressOutcome::NotWorthwhile`] if
    /// the result isn't smaller than `input`.
    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<CompressOutcome>;
}

/// Injected sink for finished blocks. Consecutive writes are assumed to
/// produce consecutive on-disk regions.
pub trait BlockWriter: Send {
    /// Write `payload` (already compressed if applicable) and return its
    /// on-disk offset.
    fn write(&mut self, payload: &[u8]) -> Result<u64>;
}

/// Injected fragment table. The core is its only mutator during processing.
pub trait FragmentTable: Send {
    /// Append a packed fragment block's location, returning the index it
    /// was assigned.
    fn append(&mut self, offset: u64, size: u32, compressed: bool) -> Result<u32>;

    /// Look up a previously packed fragment by its dedup key.
    fn lookup_by_checksum(&self, size: u32, checksum: u32) -> Option<(u32, u32)>;
}
