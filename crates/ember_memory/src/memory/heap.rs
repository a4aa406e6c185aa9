//! # Heap Allocator
//!
//! Fixed-capacity, variable-size block allocator over a caller-supplied buffer.
//!
//! ## Layout
//!
//! ```text
//! | HeapHeader | region: total_size bytes ...................................... |
//!              | used | FreeNode..free..| used | used | FreeNode..free......... |
//! ```
//!
//! Free blocks are tracked by a singly-linked list whose nodes live *inside*
//! the free memory itself: the first 16 bytes of every free block hold its
//! size and the offset of the next free block. Allocated blocks carry no
//! metadata at all; the caller hands the size back on free.
//!
//! ## Invariants
//!
//! - Free nodes are ordered by ascending offset, so adjacency is visible
//!   during a single walk.
//! - Every block, free or allocated, is at least [`MIN_BLOCK_SIZE`] bytes.
//! - `free_space()` equals the sum of all free node sizes.
//!
//! ## Two-phase construction
//!
//! ```rust,ignore
//! let required = HeapAllocator::memory_requirement(64 * 1024)?;
//! let buffer = vec![0u8; required].into_boxed_slice();
//! let mut heap = HeapAllocator::construct(64 * 1024, buffer)?;
//! ```

use super::overlay;
use crate::error::{MemoryError, MemoryResult};
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

/// Allocator bookkeeping stored at the front of the buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
struct HeapHeader {
    total_size: u64,
    current_free_size: u64,
    block_count: u64,
    head: u64,
}

/// Free-list node embedded in the first bytes of a free block.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
struct FreeNode {
    size: u64,
    next: u64,
}

const HEADER_SIZE: usize = size_of::<HeapHeader>();

/// End-of-list marker for `FreeNode::next` and `HeapHeader::head`.
const NIL: u64 = u64::MAX;

/// Smallest block the heap hands out or takes back.
///
/// Any freed block must be able to host a free-list node.
pub const MIN_BLOCK_SIZE: u64 = size_of::<FreeNode>() as u64;

/// An allocated block: region offset plus the size actually reserved.
///
/// `size` already includes the [`MIN_BLOCK_SIZE`] floor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HeapBlock {
    offset: u64,
    size: u64,
}

impl HeapBlock {
    /// Offset of the block from the start of the heap region.
    #[inline]
    #[must_use]
    pub const fn offset(self) -> u64 {
        self.offset
    }

    /// Bytes reserved for the block.
    #[inline]
    #[must_use]
    pub const fn size(self) -> u64 {
        self.size
    }
}

/// General-purpose heap over a borrowed or owned byte buffer.
///
/// `S` is any byte storage: `&mut [u8]`, `Vec<u8>`, `Box<[u8]>`.
/// The allocator never releases it; [`HeapAllocator::destroy`] hands it back.
///
/// # Thread Safety
///
/// This heap is NOT thread-safe. Wrap in a mutex for shared access.
pub struct HeapAllocator<S = Box<[u8]>> {
    memory: S,
}

impl HeapAllocator {
    /// Phase one of construction: bytes the caller must supply for a heap
    /// managing `total_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ZeroTotalSize`] if `total_size` is zero.
    pub fn memory_requirement(total_size: u64) -> MemoryResult<usize> {
        if total_size == 0 {
            tracing::error!("heap allocator requires a non-zero total size");
            return Err(MemoryError::ZeroTotalSize);
        }
        usize::try_from(total_size.max(MIN_BLOCK_SIZE))
            .ok()
            .and_then(|region| region.checked_add(HEADER_SIZE))
            .ok_or(MemoryError::BufferTooSmall { required: usize::MAX, provided: 0 })
    }
}

impl<S: AsRef<[u8]> + AsMut<[u8]>> HeapAllocator<S> {
    /// Phase two of construction: builds the heap inside `memory`.
    ///
    /// The whole region starts out as one free block.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ZeroTotalSize`] for an empty heap and
    /// [`MemoryError::BufferTooSmall`] if `memory` is shorter than
    /// [`HeapAllocator::memory_requirement`].
    pub fn construct(total_size: u64, mut memory: S) -> MemoryResult<Self> {
        let required = HeapAllocator::memory_requirement(total_size)?;
        let provided = memory.as_ref().len();
        if provided < required {
            tracing::error!(required, provided, "heap buffer smaller than its memory requirement");
            return Err(MemoryError::BufferTooSmall { required, provided });
        }

        memory.as_mut()[..required].fill(0);
        let mut heap = Self { memory };
        heap.set_header(HeapHeader {
            total_size,
            current_free_size: total_size,
            block_count: 1,
            head: 0,
        });
        heap.set_node(0, FreeNode { size: total_size, next: NIL })?;

        tracing::debug!(total_size, "heap allocator constructed");
        Ok(heap)
    }

    /// Zeroes the heap header and returns the backing buffer.
    pub fn destroy(mut self) -> S {
        self.memory.as_mut()[..HEADER_SIZE].fill(0);
        self.memory
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        self.memory.as_ref()
    }

    #[inline]
    fn header(&self) -> HeapHeader {
        overlay::read(self.bytes(), 0).unwrap_or_else(HeapHeader::zeroed)
    }

    #[inline]
    fn set_header(&mut self, header: HeapHeader) {
        // construct() verified the buffer holds at least the header.
        let written = overlay::write(self.memory.as_mut(), 0, &header);
        debug_assert!(written);
    }

    fn node_position(offset: u64) -> Option<usize> {
        usize::try_from(offset).ok()?.checked_add(HEADER_SIZE)
    }

    fn node(&self, offset: u64) -> MemoryResult<FreeNode> {
        Self::node_position(offset)
            .and_then(|at| overlay::read(self.bytes(), at))
            .ok_or(MemoryError::CorruptedList("free node outside heap region"))
    }

    fn set_node(&mut self, offset: u64, node: FreeNode) -> MemoryResult<()> {
        let at = Self::node_position(offset)
            .ok_or(MemoryError::CorruptedList("free node outside heap region"))?;
        if overlay::write(self.memory.as_mut(), at, &node) {
            Ok(())
        } else {
            Err(MemoryError::CorruptedList("free node outside heap region"))
        }
    }

    /// Points `prev` (or the list head) at `next`.
    fn relink(&mut self, header: &mut HeapHeader, prev: u64, next: u64) -> MemoryResult<()> {
        if prev == NIL {
            header.head = next;
            return Ok(());
        }
        let mut node = self.node(prev)?;
        node.next = next;
        self.set_node(prev, node)
    }

    /// Applies the minimum block floor.
    fn clamp(size: u64) -> u64 {
        if size < MIN_BLOCK_SIZE {
            tracing::debug!(size, min = MIN_BLOCK_SIZE, "block size raised to minimum");
            MIN_BLOCK_SIZE
        } else {
            size
        }
    }

    /// Total bytes managed by the heap.
    #[inline]
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.header().total_size
    }

    /// Bytes currently free.
    #[inline]
    #[must_use]
    pub fn free_space(&self) -> u64 {
        self.header().current_free_size
    }

    /// Number of free blocks in the free list.
    #[inline]
    #[must_use]
    pub fn block_count(&self) -> u64 {
        self.header().block_count
    }

    /// Allocates `size` bytes, first-fit in free-list order.
    ///
    /// An exact fit unlinks the free node. A larger fit hands out the front
    /// of the free block and moves its node forward to cover the remainder.
    /// Blocks whose remainder could not host a node (fewer than
    /// [`MIN_BLOCK_SIZE`] bytes left over) are skipped, so a request can fail
    /// with [`MemoryError::OutOfMemory`] even while `free_space() >= size`.
    ///
    /// # Errors
    ///
    /// [`MemoryError::ZeroSize`] for a zero request, [`MemoryError::OutOfMemory`]
    /// when no free block fits.
    pub fn allocate(&mut self, size: u64) -> MemoryResult<HeapBlock> {
        if size == 0 {
            tracing::warn!("heap allocate called with zero size");
            return Err(MemoryError::ZeroSize);
        }
        let size = Self::clamp(size);
        let mut header = self.header();
        if header.current_free_size < size {
            return Err(Self::out_of_memory(size, &header));
        }

        let mut prev = NIL;
        let mut cursor = header.head;
        let mut steps = 0u64;
        while cursor != NIL {
            steps += 1;
            if steps > header.block_count {
                return Err(Self::corrupted("free list longer than its block count"));
            }
            let node = self.node(cursor)?;

            if node.size == size {
                self.relink(&mut header, prev, node.next)?;
                header.current_free_size -= size;
                header.block_count -= 1;
                self.set_header(header);
                return Ok(HeapBlock { offset: cursor, size });
            }

            if node.size >= size.saturating_add(MIN_BLOCK_SIZE) {
                let remainder = cursor + size;
                self.set_node(remainder, FreeNode { size: node.size - size, next: node.next })?;
                self.relink(&mut header, prev, remainder)?;
                header.current_free_size -= size;
                self.set_header(header);
                return Ok(HeapBlock { offset: cursor, size });
            }

            prev = cursor;
            cursor = node.next;
        }

        Err(Self::out_of_memory(size, &header))
    }

    fn out_of_memory(size: u64, header: &HeapHeader) -> MemoryError {
        tracing::warn!(
            requested = size,
            free = header.current_free_size,
            blocks = header.block_count,
            "heap has no free block large enough"
        );
        MemoryError::OutOfMemory {
            requested: size,
            free: header.current_free_size,
            blocks: header.block_count,
        }
    }

    fn corrupted(reason: &'static str) -> MemoryError {
        tracing::error!(reason, "heap free list corrupted");
        MemoryError::CorruptedList(reason)
    }

    /// Returns a block to the heap, coalescing with contiguous free neighbors.
    ///
    /// `size` must be the size originally requested (the floor is reapplied).
    ///
    /// # Errors
    ///
    /// [`MemoryError::ZeroSize`] for a zero size. Fatal errors:
    /// [`MemoryError::OutOfRange`] if the block leaves the region,
    /// [`MemoryError::Overlap`] if any of it is already free. The heap is
    /// left untouched in every error case.
    pub fn free(&mut self, offset: u64, size: u64) -> MemoryResult<()> {
        if size == 0 {
            tracing::warn!(offset, "heap free called with zero size");
            return Err(MemoryError::ZeroSize);
        }
        let size = Self::clamp(size);
        let mut header = self.header();

        let end = match offset.checked_add(size) {
            Some(end) if offset < header.total_size && end <= header.total_size => end,
            _ => {
                tracing::error!(offset, size, total = header.total_size, "heap free outside region");
                return Err(MemoryError::OutOfRange { offset, size, total: header.total_size });
            }
        };

        // Find the neighbors: `prev` ends at or before `offset`, `next` starts after.
        let mut prev: Option<(u64, FreeNode)> = None;
        let mut next: Option<(u64, FreeNode)> = None;
        let mut cursor = header.head;
        let mut steps = 0u64;
        while cursor != NIL {
            steps += 1;
            if steps > header.block_count {
                return Err(Self::corrupted("free list longer than its block count"));
            }
            let node = self.node(cursor)?;
            if cursor >= offset {
                next = Some((cursor, node));
                break;
            }
            prev = Some((cursor, node));
            cursor = node.next;
        }

        let offset_left = prev.map_or(0, |(at, node)| at + node.size);
        let offset_right = end;
        if offset_left > offset || next.is_some_and(|(at, _)| at < offset_right) {
            tracing::error!(offset, size, "heap free overlaps a free block (double free?)");
            return Err(MemoryError::Overlap { offset, size });
        }

        let merge_left = prev.is_some() && offset_left == offset;
        let merge_right = next.is_some_and(|(at, _)| at == offset_right);

        match (prev, next) {
            (Some((left_at, mut left)), Some((_, right))) if merge_left && merge_right => {
                left.size += size + right.size;
                left.next = right.next;
                self.set_node(left_at, left)?;
                header.block_count -= 1;
            }
            (Some((left_at, mut left)), _) if merge_left => {
                left.size += size;
                self.set_node(left_at, left)?;
            }
            (_, Some((_, right))) if merge_right => {
                self.set_node(offset, FreeNode { size: size + right.size, next: right.next })?;
                self.relink(&mut header, prev.map_or(NIL, |(at, _)| at), offset)?;
            }
            _ => {
                let next_at = next.map_or(NIL, |(at, _)| at);
                self.set_node(offset, FreeNode { size, next: next_at })?;
                self.relink(&mut header, prev.map_or(NIL, |(at, _)| at), offset)?;
                header.block_count += 1;
            }
        }

        header.current_free_size += size;
        self.set_header(header);
        Ok(())
    }

    /// Frees a block returned by [`HeapAllocator::allocate`].
    ///
    /// # Errors
    ///
    /// Same as [`HeapAllocator::free`].
    pub fn free_block(&mut self, block: HeapBlock) -> MemoryResult<()> {
        self.free(block.offset, block.size)
    }

    fn block_range(&self, block: HeapBlock) -> Option<std::ops::Range<usize>> {
        let end = block.offset.checked_add(block.size)?;
        if end > self.total_size() {
            return None;
        }
        let start = Self::node_position(block.offset)?;
        Some(start..start + usize::try_from(block.size).ok()?)
    }

    /// Bytes of an allocated block.
    ///
    /// Only the range is checked; the heap cannot tell whether the block
    /// is still allocated.
    #[must_use]
    pub fn block_bytes(&self, block: HeapBlock) -> Option<&[u8]> {
        let range = self.block_range(block)?;
        self.bytes().get(range)
    }

    /// Mutable bytes of an allocated block.
    #[must_use]
    pub fn block_bytes_mut(&mut self, block: HeapBlock) -> Option<&mut [u8]> {
        let range = self.block_range(block)?;
        self.memory.as_mut().get_mut(range)
    }

    /// Copies `min(src.size(), dst.size())` bytes from `src` into `dst`.
    ///
    /// Returns the number of bytes copied, or `None` if either block leaves
    /// the region. Overlapping blocks are handled like `memmove`.
    pub fn copy_block(&mut self, src: HeapBlock, dst: HeapBlock) -> Option<u64> {
        let from = self.block_range(src)?;
        let to = self.block_range(dst)?;
        let len = from.len().min(to.len());
        self.memory.as_mut().copy_within(from.start..from.start + len, to.start);
        Some(len as u64)
    }

    /// Iterates free blocks as `(offset, size)` in list (address) order.
    #[must_use]
    pub fn free_blocks(&self) -> FreeBlocks<'_> {
        let header = self.header();
        FreeBlocks {
            bytes: self.bytes(),
            cursor: header.head,
            remaining: header.block_count,
        }
    }
}

/// Iterator over the heap's free list.
pub struct FreeBlocks<'a> {
    bytes: &'a [u8],
    cursor: u64,
    remaining: u64,
}

impl Iterator for FreeBlocks<'_> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL || self.remaining == 0 {
            return None;
        }
        let at = usize::try_from(self.cursor).ok()?.checked_add(HEADER_SIZE)?;
        let node: FreeNode = overlay::read(self.bytes, at)?;
        let item = (self.cursor, node.size);
        self.cursor = node.next;
        self.remaining -= 1;
        Some(item)
    }
}
