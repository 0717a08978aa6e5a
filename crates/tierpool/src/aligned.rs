//! Arbitrary-alignment blocks on top of any [`RawAllocator`].
//!
//! An aligned request over-allocates `bytes + alignment` through the normal
//! path, rounds up to the first aligned address at least one word past the
//! start, and stores the start in the word just before the returned pointer:
//!
//! ```text
//! base ─► [ padding ... | base: *mut u8 ] [ user bytes ... ]
//!                                         ▲ aligned to `alignment`
//! ```
//!
//! The padding always covers the stored word because the effective alignment
//! is at least one word. Alignments far above what the underlying block
//! guarantees still work but waste up to `alignment` bytes per block.

#![allow(unsafe_code)]

use std::mem::size_of;
use std::ptr::NonNull;

use crate::raw::RawAllocator;

const WORD: usize = size_of::<usize>();

/// Allocate `bytes` bytes aligned to `alignment`.
///
/// # Panics
///
/// Panics if `alignment` is not a power of two.
pub fn aligned_allocate<A>(alloc: &A, bytes: usize, alignment: usize) -> Option<NonNull<u8>>
where
    A: RawAllocator + ?Sized,
{
    assert!(
        alignment.is_power_of_two(),
        "alignment {alignment} is not a power of two"
    );
    let alignment = alignment.max(WORD);
    let total = bytes.checked_add(alignment)?;
    let base = alloc.allocate(total)?.as_ptr();

    let first = base.addr() + WORD;
    let aligned_addr = (first + alignment - 1) & !(alignment - 1);
    let offset = aligned_addr - base.addr();
    // SAFETY: offset <= alignment and offset + bytes <= total, so the aligned
    // pointer and the word before it stay inside the block.
    unsafe {
        let user = base.add(offset);
        user.cast::<*mut u8>().sub(1).write_unaligned(base);
        Some(NonNull::new_unchecked(user))
    }
}

/// Release a block from [`aligned_allocate`]. Null is a no-op.
///
/// # Safety
///
/// `ptr` must be null or a live pointer returned by [`aligned_allocate`] on
/// the same allocator.
pub unsafe fn aligned_release<A>(alloc: &A, ptr: *mut u8)
where
    A: RawAllocator + ?Sized,
{
    if ptr.is_null() {
        return;
    }
    // SAFETY: the word before `ptr` holds the base written at allocation.
    unsafe {
        let base = ptr.cast::<*mut u8>().sub(1).read_unaligned();
        alloc.release(base);
    }
}
