//! Errors

use std::io;

use thiserror::Error;

/// Errors generated by the block processor core.
#[derive(Error, Debug, Clone)]
pub enum BlockProcessorError {
    #[error("allocation failure")]
    Alloc,

    #[error("operation called out of sequence (begin_file while open, or append/end_file with no open file)")]
    Sequence,

    #[error("flag hints contain a bit outside the user-settable mask")]
    Unsupported,

    #[error("block writer or fragment table I/O failure: {0}")]
    Io(String),

    #[error("compressor reported failure: {0}")]
    Compressor(String),

    #[error("dedup index consistency violated")]
    Corrupt,
}

impl From<io::Error> for BlockProcessorError {
    fn from(value: io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<BlockProcessorError> for io::Error {
    fn from(value: BlockProcessorError) -> Self {
        use BlockProcessorError::*;
        match value {
            e @ Alloc => io::Error::new(io::ErrorKind::OutOfMemory, e.to_string()),
            e @ Sequence => io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
            e @ Unsupported => io::Error::new(io::ErrorKind::Unsupported, e.to_string()),
            Io(msg) => io::Error::new(io::ErrorKind::Other, msg),
            e @ Compressor(_) => io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
            e @ Corrupt => io::Error::new(io::ErrorKind::InvalidData, e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BlockProcessorError>;
