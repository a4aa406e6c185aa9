//! # Byte Overlays
//!
//! Typed views over untyped byte buffers.
//!
//! Free-list nodes and array headers live *inside* raw memory. Instead of
//! reinterpreting pointers, every access goes through these two functions,
//! which copy a [`Pod`] value in or out of a byte range. Buffers carry no
//! alignment guarantee, so reads and writes are always unaligned copies.

use bytemuck::Pod;
use std::mem::size_of;

/// Reads a `T` starting at `offset`.
///
/// Returns `None` if the value would extend past the end of `bytes`.
#[inline]
pub(crate) fn read<T: Pod>(bytes: &[u8], offset: usize) -> Option<T> {
    let end = offset.checked_add(size_of::<T>())?;
    bytes.get(offset..end).map(bytemuck::pod_read_unaligned)
}

/// Writes `value` starting at `offset`.
///
/// Returns `false` (and writes nothing) if the value would not fit.
#[inline]
#[must_use]
pub(crate) fn write<T: Pod>(bytes: &mut [u8], offset: usize, value: &T) -> bool {
    let Some(end) = offset.checked_add(size_of::<T>()) else {
        return false;
    };
    match bytes.get_mut(offset..end) {
        Some(slot) => {
            slot.copy_from_slice(bytemuck::bytes_of(value));
            true
        }
        None => false,
    }
}
