#![doc = include_str!("../README.md")]

mod block;
pub mod collaborators;
pub mod compressor;
mod completer;
mod dedup;
pub mod error;
mod flags;
mod fragment;
mod fragment_packer;
mod inode;
mod pool;
pub mod processor;
mod queue;
pub mod stats;

pub use crate::collaborators::{BlockCompressor, BlockWriter, CompressOutcome, FragmentTable};
pub use crate::dedup::BlockLocation;
pub use crate::error::{BlockProcessorError, Result};
pub use crate::flags::BlockFlags;
pub use crate::fragment::FragmentEntry;
pub use crate::inode::{InodeHandle, InodeSlot, NO_FRAGMENT};
pub use crate::processor::{Config, Processor};
pub use crate::stats::StatsSnapshot;
