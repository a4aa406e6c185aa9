//! # Memory Management
//!
//! Allocators that manage memory they do not own.
//!
//! ## Design Philosophy
//!
//! Memory is reserved once at startup and then sub-allocated:
//! - [`HeapAllocator`] carves variable-size blocks out of one byte buffer
//! - [`IntervalAllocator`] hands out offsets into external regions (GPU buffers)
//! - [`GrowableArray`] backs the interval allocator's node table
//!
//! Construction follows the two-phase sizing protocol: ask for the
//! memory requirement, supply storage of at least that size, construct.

mod array;
mod heap;
mod interval;
mod overlay;

pub use array::{GrowableArray, GROWTH_FACTOR};
pub use heap::{FreeBlocks, HeapAllocator, HeapBlock, MIN_BLOCK_SIZE};
pub use interval::{FreeRanges, IntervalAllocator, DEFAULT_NODE_CAPACITY};
