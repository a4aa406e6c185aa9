//! # Growable Array
//!
//! Type-erased, contiguous, automatically-resizing sequence.
//!
//! ```text
//! | capacity | stride | length | elem 0 | elem 1 | ... | elem cap-1 |
//! |<------ ArrayHeader ----->|<-------------- data ------------->|
//! ```
//!
//! Header and data share a single allocation. Growth allocates a new block
//! and copies only the live prefix (`length` elements), never the unused
//! tail of the old capacity.

use super::overlay;
use crate::error::{MemoryError, MemoryResult};
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

/// Capacity multiplier applied when a push finds the array full.
pub const GROWTH_FACTOR: usize = 2;

/// Header stored in front of the element data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
struct ArrayHeader {
    capacity: u64,
    stride: u64,
    length: u64,
}

const HEADER_SIZE: usize = size_of::<ArrayHeader>();

/// A type-erased growable array.
///
/// Elements are plain bytes of a fixed `stride`. Typed accessors accept any
/// [`Pod`] type whose size equals the stride.
///
/// # Thread Safety
///
/// This array is NOT thread-safe. Wrap in a mutex for shared access.
///
/// # Example
///
/// ```rust,ignore
/// let mut array = GrowableArray::with_capacity::<u64>(4)?;
/// array.push(&42u64)?;
/// assert_eq!(array.get::<u64>(0)?, 42);
/// ```
#[derive(Debug, Clone)]
pub struct GrowableArray {
    /// Header followed by `capacity * stride` data bytes.
    block: Box<[u8]>,
}

impl GrowableArray {
    /// Creates an array of `capacity` elements, each `stride` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidLayout`] if either argument is zero or
    /// the block size overflows.
    pub fn create(stride: usize, capacity: usize) -> MemoryResult<Self> {
        if stride == 0 || capacity == 0 {
            tracing::error!(stride, capacity, "growable array requires non-zero stride and capacity");
            return Err(MemoryError::InvalidLayout { stride, capacity });
        }

        let block = Self::allocate_block(stride, capacity)?;
        let mut array = Self { block };
        array.write_header(ArrayHeader {
            capacity: capacity as u64,
            stride: stride as u64,
            length: 0,
        });
        Ok(array)
    }

    /// Creates an array whose stride is the size of `T`.
    ///
    /// # Errors
    ///
    /// Same as [`GrowableArray::create`].
    pub fn with_capacity<T: Pod>(capacity: usize) -> MemoryResult<Self> {
        Self::create(size_of::<T>(), capacity)
    }

    fn allocate_block(stride: usize, capacity: usize) -> MemoryResult<Box<[u8]>> {
        let size = stride
            .checked_mul(capacity)
            .and_then(|data| data.checked_add(HEADER_SIZE))
            .ok_or(MemoryError::InvalidLayout { stride, capacity })?;
        Ok(vec![0u8; size].into_boxed_slice())
    }

    #[inline]
    fn header(&self) -> ArrayHeader {
        overlay::read(&self.block, 0).unwrap_or_else(ArrayHeader::zeroed)
    }

    #[inline]
    fn write_header(&mut self, header: ArrayHeader) {
        // The block is never smaller than the header.
        let written = overlay::write(&mut self.block, 0, &header);
        debug_assert!(written);
    }

    /// Returns the element capacity.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.header().capacity as usize
    }

    /// Returns the element stride in bytes.
    #[inline]
    #[must_use]
    pub fn stride(&self) -> usize {
        self.header().stride as usize
    }

    /// Returns the number of live elements.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.header().length as usize
    }

    /// Checks if empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sets the live length directly, without touching the data.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::IndexOutOfBounds`] if `length` exceeds capacity.
    pub fn set_len(&mut self, length: usize) -> MemoryResult<()> {
        let header = self.header();
        if length > header.capacity as usize {
            return Err(MemoryError::IndexOutOfBounds {
                index: length,
                length: header.capacity as usize,
            });
        }
        self.write_header(ArrayHeader { length: length as u64, ..header });
        Ok(())
    }

    /// Grows the array to `new_capacity` elements.
    ///
    /// Returns `Ok(false)` without reallocating if `new_capacity` does not
    /// exceed the current capacity.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidLayout`] if the new block size overflows.
    pub fn resize(&mut self, new_capacity: usize) -> MemoryResult<bool> {
        let header = self.header();
        let stride = header.stride as usize;
        if new_capacity <= header.capacity as usize {
            tracing::warn!(
                current = header.capacity,
                requested = new_capacity,
                "array resize ignored: new capacity must exceed current capacity"
            );
            return Ok(false);
        }

        let mut block = Self::allocate_block(stride, new_capacity)?;
        let live = HEADER_SIZE + header.length as usize * stride;
        block[HEADER_SIZE..live].copy_from_slice(&self.block[HEADER_SIZE..live]);
        self.block = block;
        self.write_header(ArrayHeader { capacity: new_capacity as u64, ..header });

        tracing::debug!(
            from = header.capacity,
            to = new_capacity,
            stride,
            "growable array resized"
        );
        Ok(true)
    }

    fn check_stride<T: Pod>(&self) -> MemoryResult<usize> {
        let stride = self.stride();
        if size_of::<T>() == stride {
            Ok(stride)
        } else {
            Err(MemoryError::StrideMismatch { expected: stride, actual: size_of::<T>() })
        }
    }

    #[inline]
    fn element_offset(stride: usize, index: usize) -> usize {
        HEADER_SIZE + index * stride
    }

    fn grow_if_full(&mut self) -> MemoryResult<()> {
        let header = self.header();
        if header.length == header.capacity {
            let capacity = header.capacity as usize;
            let new_capacity = capacity
                .checked_mul(GROWTH_FACTOR)
                .ok_or(MemoryError::InvalidLayout { stride: header.stride as usize, capacity })?;
            self.resize(new_capacity)?;
        }
        Ok(())
    }

    /// Appends raw element bytes, growing if full. Returns the new index.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::StrideMismatch`] if `bytes` is not one stride long.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> MemoryResult<usize> {
        let stride = self.stride();
        if bytes.len() != stride {
            return Err(MemoryError::StrideMismatch { expected: stride, actual: bytes.len() });
        }
        self.grow_if_full()?;

        let header = self.header();
        let index = header.length as usize;
        let start = Self::element_offset(stride, index);
        self.block[start..start + stride].copy_from_slice(bytes);
        self.write_header(ArrayHeader { length: header.length + 1, ..header });
        Ok(index)
    }

    /// Appends an element, growing if full. Returns the new index.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::StrideMismatch`] if `T` does not match the stride.
    pub fn push<T: Pod>(&mut self, value: &T) -> MemoryResult<usize> {
        self.check_stride::<T>()?;
        self.push_bytes(bytemuck::bytes_of(value))
    }

    /// Inserts an element at `index`, shifting the tail right by one stride.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::IndexOutOfBounds`] if `index > len()`.
    pub fn insert_at<T: Pod>(&mut self, index: usize, value: &T) -> MemoryResult<()> {
        let stride = self.check_stride::<T>()?;
        let length = self.len();
        if index > length {
            return Err(MemoryError::IndexOutOfBounds { index, length });
        }
        self.grow_if_full()?;

        let start = Self::element_offset(stride, index);
        let end = Self::element_offset(stride, length);
        self.block.copy_within(start..end, start + stride);
        self.block[start..start + stride].copy_from_slice(bytemuck::bytes_of(value));

        let header = self.header();
        self.write_header(ArrayHeader { length: header.length + 1, ..header });
        Ok(())
    }

    /// Removes and returns the last element, or `None` if empty.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::StrideMismatch`] if `T` does not match the stride.
    pub fn pop<T: Pod>(&mut self) -> MemoryResult<Option<T>> {
        self.check_stride::<T>()?;
        let header = self.header();
        if header.length == 0 {
            return Ok(None);
        }
        let value = self.get::<T>(header.length as usize - 1)?;
        self.write_header(ArrayHeader { length: header.length - 1, ..header });
        Ok(Some(value))
    }

    /// Removes the element at `index`, shifting the tail left by one stride.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::IndexOutOfBounds`] if `index >= len()`.
    pub fn pop_at<T: Pod>(&mut self, index: usize) -> MemoryResult<T> {
        let stride = self.check_stride::<T>()?;
        let value = self.get::<T>(index)?;

        let header = self.header();
        let start = Self::element_offset(stride, index);
        let end = Self::element_offset(stride, header.length as usize);
        self.block.copy_within(start + stride..end, start);
        self.write_header(ArrayHeader { length: header.length - 1, ..header });
        Ok(value)
    }

    /// Reads the element at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::IndexOutOfBounds`] if `index >= len()`.
    pub fn get<T: Pod>(&self, index: usize) -> MemoryResult<T> {
        let stride = self.check_stride::<T>()?;
        let length = self.len();
        if index >= length {
            return Err(MemoryError::IndexOutOfBounds { index, length });
        }
        overlay::read(&self.block, Self::element_offset(stride, index))
            .ok_or(MemoryError::IndexOutOfBounds { index, length })
    }

    /// Overwrites the element at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::IndexOutOfBounds`] if `index >= len()`.
    pub fn set<T: Pod>(&mut self, index: usize, value: &T) -> MemoryResult<()> {
        let stride = self.check_stride::<T>()?;
        let length = self.len();
        if index >= length || !overlay::write(&mut self.block, Self::element_offset(stride, index), value) {
            return Err(MemoryError::IndexOutOfBounds { index, length });
        }
        Ok(())
    }

    /// Returns the live element bytes (`len() * stride()` bytes).
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        let header = self.header();
        &self.block[HEADER_SIZE..Self::element_offset(header.stride as usize, header.length as usize)]
    }

    /// Resets the length to zero. Storage is neither released nor zeroed.
    pub fn clear(&mut self) {
        let header = self.header();
        self.write_header(ArrayHeader { length: 0, ..header });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rejects_zero() {
        assert_eq!(
            GrowableArray::create(0, 4).unwrap_err(),
            MemoryError::InvalidLayout { stride: 0, capacity: 4 }
        );
        assert!(GrowableArray::create(8, 0).is_err());
    }

    #[test]
    fn test_push_grows_by_factor() {
        let mut array = GrowableArray::with_capacity::<u32>(2).unwrap();
        for i in 0..5u32 {
            assert_eq!(array.push(&i).unwrap(), i as usize);
        }
        assert_eq!(array.len(), 5);
        assert_eq!(array.capacity(), 8);
        for i in 0..5u32 {
            assert_eq!(array.get::<u32>(i as usize).unwrap(), i);
        }
    }

    #[test]
    fn test_resize_noop_when_not_larger() {
        let mut array = GrowableArray::with_capacity::<u64>(4).unwrap();
        array.push(&9u64).unwrap();
        assert!(!array.resize(4).unwrap());
        assert!(!array.resize(2).unwrap());
        assert_eq!(array.capacity(), 4);
        assert!(array.resize(16).unwrap());
        assert_eq!(array.capacity(), 16);
        assert_eq!(array.get::<u64>(0).unwrap(), 9);
    }

    #[test]
    fn test_resize_copies_only_live_prefix() {
        let mut array = GrowableArray::with_capacity::<u32>(4).unwrap();
        for value in [7u32, 8, 9] {
            array.push(&value).unwrap();
        }
        array.clear();
        array.push(&5u32).unwrap();

        assert!(array.resize(8).unwrap());
        array.set_len(3).unwrap();
        assert_eq!(array.get::<u32>(0).unwrap(), 5);
        // Stale slots past the old length are not carried into the new block.
        assert_eq!(array.get::<u32>(1).unwrap(), 0);
        assert_eq!(array.get::<u32>(2).unwrap(), 0);
    }

    #[test]
    fn test_insert_and_pop_at_shift() {
        let mut array = GrowableArray::with_capacity::<u16>(3).unwrap();
        array.push(&1u16).unwrap();
        array.push(&3u16).unwrap();
        array.insert_at(1, &2u16).unwrap();
        array.insert_at(0, &0u16).unwrap();
        assert_eq!(array.len(), 4);
        assert_eq!(array.as_bytes().len(), 8);

        let values: Vec<u16> = (0..4).map(|i| array.get(i).unwrap()).collect();
        assert_eq!(values, vec![0, 1, 2, 3]);

        assert_eq!(array.pop_at::<u16>(1).unwrap(), 1);
        assert_eq!(array.pop::<u16>().unwrap(), Some(3));
        let values: Vec<u16> = (0..array.len()).map(|i| array.get(i).unwrap()).collect();
        assert_eq!(values, vec![0, 2]);
    }

    #[test]
    fn test_bounds_and_stride_errors() {
        let mut array = GrowableArray::with_capacity::<u32>(1).unwrap();
        assert_eq!(array.pop::<u32>().unwrap(), None);
        assert!(matches!(array.get::<u32>(0), Err(MemoryError::IndexOutOfBounds { .. })));
        assert!(matches!(array.insert_at(2, &1u32), Err(MemoryError::IndexOutOfBounds { .. })));
        assert!(matches!(array.push(&1u64), Err(MemoryError::StrideMismatch { expected: 4, actual: 8 })));
        assert!(matches!(array.pop_at::<u32>(0), Err(MemoryError::IndexOutOfBounds { .. })));
    }

    #[test]
    fn test_clear_keeps_storage() {
        let mut array = GrowableArray::with_capacity::<u8>(2).unwrap();
        array.push(&1u8).unwrap();
        array.push(&2u8).unwrap();
        array.push(&3u8).unwrap();
        array.clear();
        assert!(array.is_empty());
        assert_eq!(array.capacity(), 4);

        // Stale bytes are still there once the length is restored.
        array.set_len(3).unwrap();
        assert_eq!(array.get::<u8>(2).unwrap(), 3);
        assert!(array.set_len(5).is_err());
    }
}
