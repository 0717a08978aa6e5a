//! The primitive allocator contract.
//!
//! Consumers such as small-string types only need these four operations, and
//! every one of them reports exhaustion as `None` rather than panicking.

#![allow(unsafe_code)]

use std::ptr::NonNull;

/// Byte allocator with `malloc`-style semantics.
///
/// Returned pointers are aligned to at least 16 bytes.
pub trait RawAllocator {
    /// Allocate at least `bytes` bytes.
    fn allocate(&self, bytes: usize) -> Option<NonNull<u8>>;

    /// Return a block. Null is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer from this allocator.
    unsafe fn release(&self, ptr: *mut u8);

    /// Resize a block, moving it when needed.
    ///
    /// On `None` the old block is left untouched and still owned by the
    /// caller.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer from this allocator. On success
    /// the old pointer must no longer be used unless it was returned again.
    unsafe fn reallocate(&self, ptr: *mut u8, bytes: usize) -> Option<NonNull<u8>>;

    /// Allocate `count * element_size` zeroed bytes. Overflow yields `None`.
    fn zeroed_allocate(&self, count: usize, element_size: usize) -> Option<NonNull<u8>> {
        let bytes = count.checked_mul(element_size)?;
        let ptr = self.allocate(bytes)?;
        // SAFETY: `ptr` is valid for `bytes` bytes of writes.
        unsafe { ptr.as_ptr().write_bytes(0, bytes) };
        Some(ptr)
    }
}
