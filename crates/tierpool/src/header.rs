//! Hidden size header in front of heap-fallback blocks.
//!
//! Layout of a heap-fallback block:
//!
//! ```text
//! real ─► [ requested size: usize | padding ] [ user bytes ... ]
//!         └────────── HEADER_SIZE ──────────┘ ▲
//!                                             └─ user pointer
//! ```
//!
//! All pointer arithmetic on headers lives in this module.

#![allow(unsafe_code)]

use tierpool_core::HEADER_ALIGN;

/// Bytes reserved in front of every heap-fallback block.
pub const HEADER_SIZE: usize = HEADER_ALIGN;

/// Size of the system allocation backing a `bytes`-byte user block, or `None`
/// if it overflows.
#[inline]
pub fn real_size(bytes: usize) -> Option<usize> {
    bytes
        .checked_add(HEADER_SIZE)
        .filter(|&real| real <= isize::MAX as usize)
}

/// Record `bytes` in the header at `real` and return the user pointer.
///
/// # Safety
///
/// `real` must be valid for writes of [`HEADER_SIZE`] bytes and aligned to
/// [`HEADER_ALIGN`].
#[inline]
pub unsafe fn write(real: *mut u8, bytes: usize) -> *mut u8 {
    // SAFETY: caller guarantees the header is writable and aligned.
    unsafe {
        real.cast::<usize>().write(bytes);
        real.add(HEADER_SIZE)
    }
}

/// Start of the system allocation behind a user pointer.
///
/// # Safety
///
/// `user` must have been produced by [`write`].
#[inline]
pub unsafe fn real_ptr(user: *mut u8) -> *mut u8 {
    // SAFETY: `user` is HEADER_SIZE bytes into its allocation.
    unsafe { user.sub(HEADER_SIZE) }
}

/// Size recorded for a user pointer.
///
/// # Safety
///
/// `user` must have been produced by [`write`] and still be live.
#[inline]
pub unsafe fn recorded_size(user: *mut u8) -> usize {
    // SAFETY: the header precedes the user pointer and is aligned.
    unsafe { real_ptr(user).cast::<usize>().read() }
}
