//! # EMBER Memory Core
//!
//! Manual memory management for the EMBER engine:
//! - A fixed-capacity heap with block splitting and coalescing over an
//!   in-place free list
//! - An interval allocator that sub-allocates external regions (GPU buffers)
//! - An engine-wide memory system with per-tag accounting
//!
//! ## Architecture Rules
//!
//! 1. **Reserve once** - The heap buffer is sized and supplied up front
//! 2. **No hidden globals** - The memory system is a context object
//! 3. **Stop on corruption** - Double frees and overruns are reported, never repaired
//!
//! ## Example
//!
//! ```rust,ignore
//! use ember_memory::{MemoryConfig, MemorySystem, MemoryTag};
//!
//! let memory = MemorySystem::new(MemoryConfig::with_total_size(64 * 1024 * 1024))?;
//! let block = memory.allocate(4096, MemoryTag::Renderer)?;
//! memory.free(block, MemoryTag::Renderer)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod error;
pub mod memory;
pub mod system;

pub use config::MemoryConfig;
pub use error::{MemoryError, MemoryResult};
pub use memory::{
    FreeBlocks, FreeRanges, GrowableArray, HeapAllocator, HeapBlock, IntervalAllocator,
    DEFAULT_NODE_CAPACITY, GROWTH_FACTOR, MIN_BLOCK_SIZE,
};
pub use system::{MemoryStats, MemorySystem, MemoryTag};
