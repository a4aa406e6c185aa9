//! # Memory Error Types
//!
//! All errors that can occur in the memory core.
//!
//! Errors fall into three families:
//! - **Usage**: zero sizes, undersized buffers, bad indices. Always recoverable.
//! - **Capacity**: the allocator cannot satisfy a request right now.
//! - **Corruption**: the caller freed something it does not own, or the
//!   free list no longer describes the region. See [`MemoryError::is_fatal`].

use crate::system::MemoryTag;
use thiserror::Error;

/// Errors that can occur in the memory core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// A zero-byte allocation or free was requested.
    #[error("zero-sized request")]
    ZeroSize,

    /// An allocator was asked to manage an empty region.
    #[error("total size must be greater than zero")]
    ZeroTotalSize,

    /// The caller-supplied buffer is smaller than the reported requirement.
    #[error("buffer too small: need {required} bytes, got {provided}")]
    BufferTooSmall {
        /// Bytes reported by the sizing query.
        required: usize,
        /// Bytes actually supplied.
        provided: usize,
    },

    /// Not enough free space to satisfy the request.
    #[error("out of memory: requested {requested} bytes, {free} free across {blocks} blocks")]
    OutOfMemory {
        /// Bytes requested.
        requested: u64,
        /// Bytes currently free.
        free: u64,
        /// Number of free blocks.
        blocks: u64,
    },

    /// A free referenced bytes outside the managed region.
    #[error("range out of bounds: offset {offset} size {size} exceeds total {total}")]
    OutOfRange {
        /// Start of the offending range.
        offset: u64,
        /// Length of the offending range.
        size: u64,
        /// Size of the managed region.
        total: u64,
    },

    /// A free overlaps a range that is already free (double free).
    #[error("overlapping free at offset {offset} size {size}: range is already free")]
    Overlap {
        /// Start of the offending range.
        offset: u64,
        /// Length of the offending range.
        size: u64,
    },

    /// A free list link points somewhere it never should.
    #[error("corrupted free list: {0}")]
    CorruptedList(&'static str),

    /// The interval node table cannot grow any further.
    #[error("node pool exhausted at capacity {capacity}")]
    NodePoolExhausted {
        /// Capacity reached.
        capacity: usize,
    },

    /// Resize was asked to shrink or keep the current size.
    #[error("invalid resize: new size {requested} must exceed current size {current}")]
    InvalidResize {
        /// Current total size.
        current: u64,
        /// Requested total size.
        requested: u64,
    },

    /// An array was created with a zero stride or zero capacity.
    #[error("invalid array layout: stride {stride}, capacity {capacity}")]
    InvalidLayout {
        /// Element stride in bytes.
        stride: usize,
        /// Element capacity.
        capacity: usize,
    },

    /// A typed array access used an element of the wrong size.
    #[error("stride mismatch: array stride {expected}, element size {actual}")]
    StrideMismatch {
        /// The array's stride.
        expected: usize,
        /// The element's size.
        actual: usize,
    },

    /// An array index was past the live length.
    #[error("index {index} out of bounds for length {length}")]
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Current length.
        length: usize,
    },

    /// A block was freed under a different tag than it was allocated with.
    #[error("tag mismatch at offset {offset}: allocated as {recorded}, freed as {requested}")]
    TagMismatch {
        /// Offset of the block.
        offset: u64,
        /// Tag recorded at allocation.
        recorded: MemoryTag,
        /// Tag passed to the free.
        requested: MemoryTag,
    },

    /// Invalid configuration file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MemoryError {
    /// Returns `true` for errors that signal caller-side corruption
    /// (double free, buffer overrun, broken links).
    ///
    /// The allocator stops on these instead of attempting a repair.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::OutOfRange { .. }
                | Self::Overlap { .. }
                | Self::CorruptedList(_)
                | Self::NodePoolExhausted { .. }
        )
    }
}

/// Result type for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
