//! # Interval Allocator
//!
//! Tracks free `(offset, size)` ranges over an external region, such as a
//! GPU buffer, without ever touching the region's contents.
//!
//! ## Node Table
//!
//! Free ranges are linked-list nodes stored in a [`GrowableArray`], linked by
//! slot index rather than by address:
//!
//! ```text
//! slots:  [ {0, 64, ->2} | {vacant} | {128, 384, nil} | ... ]
//! vacant: [1]
//! head:   0
//! ```
//!
//! A slot with `size == 0` is a tombstone and its index sits on the vacant
//! stack for reuse. Because links are indices, growing the table (which
//! reallocates the array) leaves every link and every in-flight cursor valid.
//!
//! ## Invariants
//!
//! - Live nodes are strictly ordered by ascending offset and never overlap.
//! - Adjacent live nodes never touch: coalescing happens eagerly on free.
//! - `free_space()` equals the sum of live node sizes.

use super::array::GrowableArray;
use crate::error::{MemoryError, MemoryResult};
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

/// Initial node table capacity used by [`IntervalAllocator::new`].
pub const DEFAULT_NODE_CAPACITY: usize = 8;

/// End-of-list marker for node links.
const NIL: u32 = u32::MAX;

/// One free range. `size == 0` marks a vacant slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
struct RangeNode {
    offset: u64,
    size: u64,
    next: u32,
    _padding: u32,
}

impl RangeNode {
    const fn new(offset: u64, size: u64, next: u32) -> Self {
        Self { offset, size, next, _padding: 0 }
    }

    #[inline]
    const fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Slot pool of range nodes with tombstone reuse.
#[derive(Debug)]
struct NodeTable {
    slots: GrowableArray,
    vacant: Vec<u32>,
}

impl NodeTable {
    fn with_capacity(capacity: usize) -> MemoryResult<Self> {
        Ok(Self {
            slots: GrowableArray::with_capacity::<RangeNode>(capacity)?,
            vacant: Vec::new(),
        })
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    fn get(&self, index: u32) -> MemoryResult<RangeNode> {
        self.slots
            .get(index as usize)
            .map_err(|_| MemoryError::CorruptedList("range node index outside node table"))
    }

    fn set(&mut self, index: u32, node: RangeNode) -> MemoryResult<()> {
        self.slots
            .set(index as usize, &node)
            .map_err(|_| MemoryError::CorruptedList("range node index outside node table"))
    }

    /// Stores `node` in a vacant slot, growing the table when none is left.
    fn acquire(&mut self, node: RangeNode) -> MemoryResult<u32> {
        if let Some(index) = self.vacant.pop() {
            self.set(index, node)?;
            return Ok(index);
        }

        let capacity = self.capacity();
        let index = u32::try_from(self.slots.len())
            .ok()
            .filter(|&index| index != NIL)
            .ok_or(MemoryError::NodePoolExhausted { capacity })?;
        self.slots.push(&node).map_err(|err| {
            tracing::error!(capacity, %err, "interval node table cannot grow");
            MemoryError::NodePoolExhausted { capacity }
        })?;

        if self.capacity() != capacity {
            tracing::debug!(from = capacity, to = self.capacity(), "interval node table grown");
        }
        Ok(index)
    }

    /// Zeroes a slot and returns it to the vacant pool. Never shrinks the table.
    fn release(&mut self, index: u32) -> MemoryResult<()> {
        self.set(index, RangeNode::zeroed())?;
        self.vacant.push(index);
        Ok(())
    }

    /// Drops every node and installs `node` at slot 0.
    fn reset(&mut self, node: RangeNode) -> MemoryResult<u32> {
        self.slots.clear();
        self.vacant.clear();
        self.acquire(node)
    }
}

/// Sub-allocator for ranges of an externally owned region.
///
/// Hands out offsets; the region itself is never read, written or freed
/// here and must outlive the allocator.
///
/// # Thread Safety
///
/// This allocator is NOT thread-safe. Wrap in a mutex for shared access.
///
/// # Example
///
/// ```rust,ignore
/// let mut ranges = IntervalAllocator::new(vertex_buffer_size)?;
/// let offset = ranges.allocate_block(mesh_bytes)?;
/// // ... upload to [offset, offset + mesh_bytes) ...
/// ranges.free_block(offset, mesh_bytes)?;
/// ```
#[derive(Debug)]
pub struct IntervalAllocator {
    total_size: u64,
    current_free_size: u64,
    /// Live (free-range) node count.
    node_count: u64,
    nodes: NodeTable,
    head: u32,
}

impl IntervalAllocator {
    /// Phase one of construction: bytes of bookkeeping a caller must budget.
    ///
    /// Only the allocator header is counted; the node table is a separate,
    /// independently growable allocation. The figure is informational: the
    /// allocator is a plain value built by [`IntervalAllocator::new`] or
    /// [`IntervalAllocator::with_node_capacity`] and takes no caller storage.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ZeroTotalSize`] if `total_size` is zero.
    pub fn memory_requirement(total_size: u64) -> MemoryResult<usize> {
        if total_size == 0 {
            return Err(MemoryError::ZeroTotalSize);
        }
        Ok(size_of::<Self>())
    }

    /// Creates an allocator tracking `[0, total_size)` as one free range.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ZeroTotalSize`] if `total_size` is zero.
    pub fn new(total_size: u64) -> MemoryResult<Self> {
        Self::with_node_capacity(total_size, DEFAULT_NODE_CAPACITY)
    }

    /// Creates an allocator whose node table starts at `node_capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::ZeroTotalSize`] if `total_size` is zero and
    /// [`MemoryError::InvalidLayout`] if `node_capacity` is zero.
    pub fn with_node_capacity(total_size: u64, node_capacity: usize) -> MemoryResult<Self> {
        if total_size == 0 {
            tracing::error!("interval allocator requires a non-zero total size");
            return Err(MemoryError::ZeroTotalSize);
        }

        let mut nodes = NodeTable::with_capacity(node_capacity)?;
        let head = nodes.reset(RangeNode::new(0, total_size, NIL))?;

        tracing::debug!(total_size, node_capacity, "interval allocator constructed");
        Ok(Self {
            total_size,
            current_free_size: total_size,
            node_count: 1,
            nodes,
            head,
        })
    }

    /// Size of the tracked region.
    #[inline]
    #[must_use]
    pub const fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes currently free.
    #[inline]
    #[must_use]
    pub const fn free_space(&self) -> u64 {
        self.current_free_size
    }

    /// Number of free ranges.
    #[inline]
    #[must_use]
    pub const fn block_count(&self) -> u64 {
        self.node_count
    }

    /// Slots in the node table, live and vacant.
    #[inline]
    #[must_use]
    pub fn block_capacity(&self) -> usize {
        self.nodes.capacity()
    }

    fn corrupted(reason: &'static str) -> MemoryError {
        tracing::error!(reason, "interval free list corrupted");
        MemoryError::CorruptedList(reason)
    }

    fn out_of_memory(&self, size: u64) -> MemoryError {
        tracing::warn!(
            requested = size,
            free = self.current_free_size,
            blocks = self.node_count,
            "interval allocator has no free range large enough"
        );
        MemoryError::OutOfMemory {
            requested: size,
            free: self.current_free_size,
            blocks: self.node_count,
        }
    }

    /// Points `prev` (or the list head) at `next`.
    fn relink(&mut self, prev: u32, next: u32) -> MemoryResult<()> {
        if prev == NIL {
            self.head = next;
            return Ok(());
        }
        let mut node = self.nodes.get(prev)?;
        node.next = next;
        self.nodes.set(prev, node)
    }

    /// Reserves `size` units, first-fit in list order. Returns the offset.
    ///
    /// An exact fit retires the range node; a larger fit shrinks it from
    /// the front. The node table never grows on this path.
    ///
    /// # Errors
    ///
    /// [`MemoryError::ZeroSize`] for a zero request, [`MemoryError::OutOfMemory`]
    /// when no free range fits.
    pub fn allocate_block(&mut self, size: u64) -> MemoryResult<u64> {
        if size == 0 {
            tracing::warn!("interval allocate called with zero size");
            return Err(MemoryError::ZeroSize);
        }
        if self.current_free_size < size {
            return Err(self.out_of_memory(size));
        }

        let mut prev = NIL;
        let mut cursor = self.head;
        let mut steps = 0u64;
        while cursor != NIL {
            steps += 1;
            if steps > self.node_count {
                return Err(Self::corrupted("free list longer than its node count"));
            }
            let mut node = self.nodes.get(cursor)?;

            if node.size == size {
                self.relink(prev, node.next)?;
                self.nodes.release(cursor)?;
                self.node_count -= 1;
                self.current_free_size -= size;
                return Ok(node.offset);
            }

            if node.size > size {
                let offset = node.offset;
                node.offset += size;
                node.size -= size;
                self.nodes.set(cursor, node)?;
                self.current_free_size -= size;
                return Ok(offset);
            }

            prev = cursor;
            cursor = node.next;
        }

        Err(self.out_of_memory(size))
    }

    /// Returns `[offset, offset + size)` to the free list, coalescing with
    /// contiguous neighbors.
    ///
    /// # Errors
    ///
    /// [`MemoryError::ZeroSize`] for a zero size. Fatal errors:
    /// [`MemoryError::OutOfRange`] when the range leaves the region,
    /// [`MemoryError::Overlap`] when any part of it is already free,
    /// [`MemoryError::NodePoolExhausted`] if a node is needed and the table
    /// cannot grow. The allocator is unchanged on every error.
    pub fn free_block(&mut self, offset: u64, size: u64) -> MemoryResult<()> {
        if size == 0 {
            tracing::warn!(offset, "interval free called with zero size");
            return Err(MemoryError::ZeroSize);
        }
        let end = match offset.checked_add(size) {
            Some(end) if size <= self.total_size && end <= self.total_size => end,
            _ => {
                tracing::error!(offset, size, total = self.total_size, "interval free outside region");
                return Err(MemoryError::OutOfRange { offset, size, total: self.total_size });
            }
        };

        if self.head == NIL {
            self.head = self.nodes.acquire(RangeNode::new(offset, size, NIL))?;
            self.node_count = 1;
            self.current_free_size += size;
            return Ok(());
        }

        // `prev` is the last range starting before `offset`, `next` the first at or after it.
        let mut prev: Option<(u32, RangeNode)> = None;
        let mut next: Option<(u32, RangeNode)> = None;
        let mut cursor = self.head;
        let mut steps = 0u64;
        while cursor != NIL {
            steps += 1;
            if steps > self.node_count {
                return Err(Self::corrupted("free list longer than its node count"));
            }
            let node = self.nodes.get(cursor)?;
            if node.offset >= offset {
                next = Some((cursor, node));
                break;
            }
            prev = Some((cursor, node));
            cursor = node.next;
        }

        let offset_left = prev.map_or(0, |(_, node)| node.end());
        let offset_right = end;
        if offset_left > offset || next.is_some_and(|(_, node)| node.offset < offset_right) {
            tracing::error!(offset, size, "interval free overlaps a free range (double free?)");
            return Err(MemoryError::Overlap { offset, size });
        }

        let merge_left = prev.is_some() && offset_left == offset;
        let merge_right = next.is_some_and(|(_, node)| node.offset == offset_right);

        match (prev, next) {
            (Some((left_at, mut left)), Some((right_at, right))) if merge_left && merge_right => {
                left.size += size + right.size;
                left.next = right.next;
                self.nodes.set(left_at, left)?;
                self.nodes.release(right_at)?;
                self.node_count -= 1;
            }
            (Some((left_at, mut left)), _) if merge_left => {
                left.size += size;
                self.nodes.set(left_at, left)?;
            }
            (_, Some((right_at, mut right))) if merge_right => {
                right.offset = offset;
                right.size += size;
                self.nodes.set(right_at, right)?;
            }
            _ => {
                // May grow the table; indices held in `prev`/`next` stay valid.
                let next_at = next.map_or(NIL, |(at, _)| at);
                let index = self.nodes.acquire(RangeNode::new(offset, size, next_at))?;
                self.relink(prev.map_or(NIL, |(at, _)| at), index)?;
                self.node_count += 1;
            }
        }

        self.current_free_size += size;
        Ok(())
    }

    /// Grows the tracked region to `new_size`.
    ///
    /// The appended tail is freed through [`IntervalAllocator::free_block`], so
    /// it merges with a free range that ended at the old boundary.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidResize`] unless `new_size` exceeds the
    /// current total size.
    pub fn resize(&mut self, new_size: u64) -> MemoryResult<()> {
        let old_size = self.total_size;
        if new_size <= old_size {
            tracing::warn!(current = old_size, requested = new_size, "interval allocator can only grow");
            return Err(MemoryError::InvalidResize { current: old_size, requested: new_size });
        }

        self.total_size = new_size;
        if let Err(err) = self.free_block(old_size, new_size - old_size) {
            self.total_size = old_size;
            return Err(err);
        }

        tracing::debug!(from = old_size, to = new_size, "interval allocator resized");
        Ok(())
    }

    /// Resets to a single free range covering the whole region.
    ///
    /// The node table keeps its capacity.
    ///
    /// # Errors
    ///
    /// Only fails if the node table is corrupted.
    pub fn clear(&mut self) -> MemoryResult<()> {
        self.head = self.nodes.reset(RangeNode::new(0, self.total_size, NIL))?;
        self.node_count = 1;
        self.current_free_size = self.total_size;
        Ok(())
    }

    /// Iterates free ranges as `(offset, size)` in ascending offset order.
    #[must_use]
    pub fn free_ranges(&self) -> FreeRanges<'_> {
        FreeRanges {
            nodes: &self.nodes,
            cursor: self.head,
            remaining: self.node_count,
        }
    }
}

/// Iterator over an interval allocator's free ranges.
pub struct FreeRanges<'a> {
    nodes: &'a NodeTable,
    cursor: u32,
    remaining: u64,
}

impl Iterator for FreeRanges<'_> {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL || self.remaining == 0 {
            return None;
        }
        let node = self.nodes.get(self.cursor).ok()?;
        self.cursor = node.next;
        self.remaining -= 1;
        Some((node.offset, node.size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(allocator: &IntervalAllocator) -> Vec<(u64, u64)> {
        allocator.free_ranges().collect()
    }

    #[test]
    fn test_requirement_and_construction() {
        assert_eq!(IntervalAllocator::memory_requirement(0), Err(MemoryError::ZeroTotalSize));
        assert_eq!(IntervalAllocator::memory_requirement(1024).unwrap(), size_of::<IntervalAllocator>());
        assert!(IntervalAllocator::new(0).is_err());
        assert!(IntervalAllocator::with_node_capacity(64, 0).is_err());

        let allocator = IntervalAllocator::new(1024).unwrap();
        assert_eq!(allocator.free_space(), 1024);
        assert_eq!(allocator.block_count(), 1);
        assert_eq!(allocator.block_capacity(), DEFAULT_NODE_CAPACITY);
        assert_eq!(ranges(&allocator), vec![(0, 1024)]);
    }

    #[test]
    fn test_reference_scenario() {
        let mut allocator = IntervalAllocator::new(512).unwrap();

        assert_eq!(allocator.allocate_block(64).unwrap(), 0);
        assert_eq!(allocator.allocate_block(32).unwrap(), 64);
        assert_eq!(allocator.allocate_block(64).unwrap(), 96);
        assert_eq!(allocator.free_space(), 352);
        assert_eq!(allocator.block_count(), 1);

        allocator.free_block(64, 32).unwrap();
        assert_eq!(allocator.free_space(), 384);
        assert_eq!(ranges(&allocator), vec![(64, 32), (160, 352)]);

        assert_eq!(allocator.allocate_block(64).unwrap(), 160);
        assert_eq!(allocator.free_space(), 320);
        assert_eq!(allocator.block_count(), 2);

        allocator.free_block(0, 64).unwrap();
        assert_eq!(ranges(&allocator), vec![(0, 96), (224, 288)]);
        assert_eq!(allocator.free_space(), 384);
    }

    #[test]
    fn test_first_fit_by_list_order() {
        let mut allocator = IntervalAllocator::new(256).unwrap();
        allocator.allocate_block(256).unwrap();
        allocator.free_block(0, 64).unwrap();
        allocator.free_block(128, 32).unwrap();

        // The 32-unit range is an exact fit, but the 64-unit range is first.
        assert_eq!(allocator.allocate_block(32).unwrap(), 0);
        assert_eq!(ranges(&allocator), vec![(32, 32), (128, 32)]);
    }

    #[test]
    fn test_exact_fit_retires_node() {
        let mut allocator = IntervalAllocator::new(128).unwrap();
        assert_eq!(allocator.allocate_block(128).unwrap(), 0);
        assert_eq!(allocator.block_count(), 0);
        assert_eq!(allocator.free_space(), 0);
        assert!(ranges(&allocator).is_empty());
        assert!(matches!(allocator.allocate_block(1), Err(MemoryError::OutOfMemory { free: 0, .. })));

        // Freeing into an empty list reuses the retired slot.
        allocator.free_block(32, 16).unwrap();
        assert_eq!(ranges(&allocator), vec![(32, 16)]);
        assert_eq!(allocator.block_count(), 1);
    }

    #[test]
    fn test_double_free_is_fatal() {
        let mut allocator = IntervalAllocator::new(256).unwrap();
        let offset = allocator.allocate_block(64).unwrap();
        allocator.allocate_block(64).unwrap();
        allocator.free_block(offset, 64).unwrap();

        let err = allocator.free_block(offset, 64).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err, MemoryError::Overlap { offset: 0, size: 64 });

        // Straddles the free tail at 128.
        assert_eq!(allocator.free_block(100, 40), Err(MemoryError::Overlap { offset: 100, size: 40 }));
        // Starts inside the free head range.
        assert_eq!(allocator.free_block(32, 64), Err(MemoryError::Overlap { offset: 32, size: 64 }));
        assert_eq!(allocator.free_space(), 192);
        assert_eq!(ranges(&allocator), vec![(0, 64), (128, 128)]);
    }

    #[test]
    fn test_free_validation() {
        let mut allocator = IntervalAllocator::new(256).unwrap();
        allocator.allocate_block(256).unwrap();
        assert_eq!(allocator.free_block(0, 0), Err(MemoryError::ZeroSize));
        assert!(matches!(allocator.free_block(0, 257), Err(MemoryError::OutOfRange { .. })));
        assert!(matches!(allocator.free_block(200, 64), Err(MemoryError::OutOfRange { .. })));
        assert!(matches!(allocator.free_block(u64::MAX, 2), Err(MemoryError::OutOfRange { .. })));
        assert_eq!(allocator.allocate_block(0), Err(MemoryError::ZeroSize));
    }

    #[test]
    fn test_merge_both_returns_node_to_pool() {
        let mut allocator = IntervalAllocator::with_node_capacity(192, 2).unwrap();
        for _ in 0..3 {
            allocator.allocate_block(64).unwrap();
        }
        allocator.free_block(0, 64).unwrap();
        allocator.free_block(128, 64).unwrap();
        assert_eq!(allocator.block_count(), 2);
        assert_eq!(allocator.block_capacity(), 2);

        allocator.free_block(64, 64).unwrap();
        assert_eq!(ranges(&allocator), vec![(0, 192)]);
        assert_eq!(allocator.block_count(), 1);

        // The released slot is reused instead of growing the table.
        allocator.allocate_block(64).unwrap();
        allocator.allocate_block(64).unwrap();
        allocator.free_block(0, 64).unwrap();
        assert_eq!(ranges(&allocator), vec![(0, 64), (128, 64)]);
        assert_eq!(allocator.block_capacity(), 2);
    }

    #[test]
    fn test_table_growth_during_free_keeps_order() {
        let mut allocator = IntervalAllocator::with_node_capacity(1024, 2).unwrap();
        for i in 0..6 {
            assert_eq!(allocator.allocate_block(64).unwrap(), i * 64);
        }

        allocator.free_block(64, 64).unwrap();
        assert_eq!(allocator.block_capacity(), 2);

        // Table is full: this free needs a third node between two live ones.
        allocator.free_block(192, 64).unwrap();
        assert_eq!(allocator.block_capacity(), 4);
        assert_eq!(ranges(&allocator), vec![(64, 64), (192, 64), (384, 640)]);

        allocator.free_block(320, 64).unwrap();
        allocator.free_block(0, 64).unwrap();
        assert_eq!(ranges(&allocator), vec![(0, 128), (192, 64), (320, 704)]);

        allocator.free_block(128, 64).unwrap();
        allocator.free_block(256, 64).unwrap();
        assert_eq!(ranges(&allocator), vec![(0, 1024)]);
        assert_eq!(allocator.block_count(), 1);
        assert_eq!(allocator.free_space(), 1024);
    }

    #[test]
    fn test_repeated_growth_from_single_slot() {
        let mut allocator = IntervalAllocator::with_node_capacity(4096, 1).unwrap();
        let offsets: Vec<u64> = (0..64).map(|_| allocator.allocate_block(64).unwrap()).collect();

        // Free every other block in reverse order: each free needs a fresh node.
        for &offset in offsets.iter().step_by(2).rev() {
            allocator.free_block(offset, 64).unwrap();
        }
        assert_eq!(allocator.block_count(), 32);
        assert!(allocator.block_capacity() >= 32);

        let found = ranges(&allocator);
        let expected: Vec<(u64, u64)> = offsets.iter().step_by(2).map(|&o| (o, 64)).collect();
        assert_eq!(found, expected);
    }

    #[test]
    fn test_resize_merges_tail() {
        let mut allocator = IntervalAllocator::new(256).unwrap();
        allocator.allocate_block(128).unwrap();
        allocator.resize(512).unwrap();
        assert_eq!(allocator.total_size(), 512);
        assert_eq!(ranges(&allocator), vec![(128, 384)]);
        assert_eq!(allocator.block_count(), 1);

        allocator.allocate_block(384).unwrap();
        allocator.resize(600).unwrap();
        assert_eq!(ranges(&allocator), vec![(512, 88)]);

        assert_eq!(
            allocator.resize(600),
            Err(MemoryError::InvalidResize { current: 600, requested: 600 })
        );
        assert!(allocator.resize(100).is_err());
        assert_eq!(allocator.total_size(), 600);
    }

    #[test]
    fn test_clear() {
        let mut allocator = IntervalAllocator::with_node_capacity(1024, 2).unwrap();
        for _ in 0..8 {
            allocator.allocate_block(64).unwrap();
        }
        allocator.free_block(0, 64).unwrap();
        allocator.free_block(256, 64).unwrap();
        let capacity = allocator.block_capacity();

        allocator.clear().unwrap();
        assert_eq!(ranges(&allocator), vec![(0, 1024)]);
        assert_eq!(allocator.free_space(), 1024);
        assert_eq!(allocator.block_count(), 1);
        assert_eq!(allocator.block_capacity(), capacity);
    }
}
