//! General-purpose heap backend.
//!
//! The pool never calls the system allocator directly; it goes through a
//! [`SystemHeap`] so the tiny arena, heap-fallback blocks, purges and teardown
//! all share one backend, and tests can inject failures.

#![allow(unsafe_code)]

/// Backend that hands out and takes back raw memory.
///
/// Returned memory must be aligned to at least 16 bytes and be valid for reads
/// and writes of `bytes` bytes.
pub trait SystemHeap: Send + Sync {
    /// Allocate `bytes` bytes. Returns null on exhaustion.
    fn allocate(&self, bytes: usize) -> *mut u8;

    /// Return memory obtained from [`SystemHeap::allocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this same heap and must not have been
    /// released already. Null is accepted and ignored.
    unsafe fn release(&self, ptr: *mut u8);
}

/// `malloc`/`free` from the C library.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LibcHeap;

impl SystemHeap for LibcHeap {
    #[inline]
    fn allocate(&self, bytes: usize) -> *mut u8 {
        // malloc(0) may legally return null; never ask for zero bytes.
        // SAFETY: malloc has no preconditions.
        unsafe { libc::malloc(bytes.max(1)).cast() }
    }

    #[inline]
    unsafe fn release(&self, ptr: *mut u8) {
        // SAFETY: caller guarantees `ptr` came from malloc and is live.
        unsafe { libc::free(ptr.cast()) }
    }
}

impl<H: SystemHeap + ?Sized> SystemHeap for std::sync::Arc<H> {
    #[inline]
    fn allocate(&self, bytes: usize) -> *mut u8 {
        (**self).allocate(bytes)
    }

    #[inline]
    unsafe fn release(&self, ptr: *mut u8) {
        // SAFETY: forwarded contract.
        unsafe { (**self).release(ptr) }
    }
}
