//! Concrete [`BlockCompressor`] backends, feature-gated like the image
//! format's own compressor table

use std::io::{Read, Write};

use tracing::instrument;

use crate::collaborators::{BlockCompressor, CompressOutcome};
use crate::error::{BlockProcessorError, Result};

/// Compresses nothing; useful for tests and for `num_workers = 0` callers
/// who want the pipeline's bookkeeping without a real codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityCompressor;

impl BlockCompressor for IdentityCompressor {
    fn clone_boxed(&self) -> Box<dyn BlockCompressor> {
        Box::new(*self)
    }

    fn compress(&mut self, _input: &[u8], _out: &mut Vec<u8>) -> Result<CompressOutcome> {
        Ok(CompressOutcome::NotWorthwhile)
    }
}

/// Deterministically halves its input; useful for exercising the
/// `IS_COMPRESSED` path in tests without pulling in a real codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct ShrinkingCompressor;

impl BlockCompressor for ShrinkingCompressor {
    fn clone_boxed(&self) -> Box<dyn BlockCompressor> {
        Box::new(*self)
    }

    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<CompressOutcome> {
        out.clear();
        let half = input.len() / 2;
        out.extend_from_slice(&input[..half]);
        if out.len() < input.len() {
            Ok(CompressOutcome::Compressed { len: out.len() })
        } else {
            Ok(CompressOutcome::NotWorthwhile)
        }
    }
}

#[cfg(feature = "gzip")]
#[derive(Clone, Debug)]
pub struct GzipCompressor {
    pub level: u32,
}

#[cfg(feature = "gzip")]
impl Default for GzipCompressor {
    fn default() -> Self {
        Self { level: 9 }
    }
}

#[cfg(feature = "gzip")]
impl BlockCompressor for GzipCompressor {
    fn clone_boxed(&self) -> Box<dyn BlockCompressor> {
        Box::new(self.clone())
    }

    #[instrument(skip_all)]
    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<CompressOutcome> {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;

        out.clear();
        let mut encoder = ZlibEncoder::new(out, Compression::new(self.level));
        encoder
            .write_all(input)
            .map_err(|e| BlockProcessorError::Compressor(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| BlockProcessorError::Compressor(e.to_string()))?;
        if out.len() < input.len() {
            Ok(CompressOutcome::Compressed { len: out.len() })
        } else {
            Ok(CompressOutcome::NotWorthwhile)
        }
    }
}

#[cfg(feature = "xz")]
#[derive(Clone, Debug)]
pub struct XzCompressor {
    pub level: u32,
}

#[cfg(feature = "xz")]
impl Default for XzCompressor {
    fn default() -> Self {
        Self { level: 6 }
    }
}

#[cfg(feature = "xz")]
impl BlockCompressor for XzCompressor {
    fn clone_boxed(&self) -> Box<dyn BlockCompressor> {
        Box::new(self.clone())
    }

    #[instrument(skip_all)]
    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<CompressOutcome> {
        use std::io::Cursor;
        use xz2::read::XzEncoder;

        out.clear();
        let mut encoder = XzEncoder::new(Cursor::new(input), self.level);
        encoder
            .read_to_end(out)
            .map_err(|e| BlockProcessorError::Compressor(e.to_string()))?;
        if out.len() < input.len() {
            Ok(CompressOutcome::Compressed { len: out.len() })
        } else {
            Ok(CompressOutcome::NotWorthwhile)
        }
    }
}

#[cfg(feature = "zstd")]
#[derive(Clone, Debug)]
pub struct ZstdCompressor {
    pub level: i32,
}

#[cfg(feature = "zstd")]
impl Default for ZstdCompressor {
    fn default() -> Self {
        Self { level: 3 }
    }
}

#[cfg(feature = "zstd")]
impl BlockCompressor for ZstdCompressor {
    fn clone_boxed(&self) -> Box<dyn BlockCompressor> {
        Box::new(self.clone())
    }

    #[instrument(skip_all)]
    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<CompressOutcome> {
        out.clear();
        let mut encoder = zstd::bulk::Compressor::new(self.level)
            .map_err(|e| BlockProcessorError::Compressor(e.to_string()))?;
        encoder
            .compress_to_buffer(input, out)
            .map_err(|e| BlockProcessorError::Compressor(e.to_string()))?;
        if out.len() < input.len() {
            Ok(CompressOutcome::Compressed { len: out.len() })
        } else {
            Ok(CompressOutcome::NotWorthwhile)
        }
    }
}

#[cfg(feature = "lz4")]
#[derive(Clone, Copy, Debug, Default)]
pub struct Lz4Compressor;

#[cfg(feature = "lz4")]
impl BlockCompressor for Lz4Compressor {
    fn clone_boxed(&self) -> Box<dyn BlockCompressor> {
        Box::new(*self)
    }

    #[instrument(skip_all)]
    fn compress(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<CompressOutcome> {
        out.clear();
        out.extend_from_slice(&lz4_flex::compress(input));
        if out.len() < input.len() {
            Ok(CompressOutcome::Compressed { len: out.len() })
        } else {
            Ok(CompressOutcome::NotWorthwhile)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_never_compresses() {
        let mut c = IdentityCompressor;
        let mut out = Vec::new();
        let outcome = c.compress(b"aaaaaaaaaa", &mut out).unwrap();
        assert!(matches!(outcome, CompressOutcome::NotWorthwhile));
    }

    #[test]
    fn shrinking_compressor_halves_its_input() {
        let mut c = ShrinkingCompressor;
        let mut out = Vec::new();
        let outcome = c.compress(b"abcdefgh", &mut out).unwrap();
        assert!(matches!(outcome, CompressOutcome::Compressed { len: 4 }));
        assert_eq!(out, b"abcd");
    }
}
