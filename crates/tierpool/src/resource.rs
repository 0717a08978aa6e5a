//! Memory-resource adapter over the process-wide allocator.
//!
//! A thin handle exposing `allocate(bytes, align)` / `deallocate` / equality,
//! implemented entirely with aligned allocation. Adapters compare equal when
//! they wrap the same allocator; every default adapter wraps the process-wide
//! one, so all of those are interchangeable.
//!
//! This is deliberately not a `GlobalAlloc`: the pool's own bookkeeping uses
//! the Rust global allocator.

#![allow(unsafe_code)]

use std::ptr::NonNull;

use crate::facade::{self, PoolAllocator};

/// Memory resource backed by a [`PoolAllocator`] (the process-wide one by
/// default).
#[derive(Clone, Copy)]
pub struct PoolResource {
    allocator: &'static PoolAllocator,
}

impl PoolResource {
    /// Adapter over the process-wide allocator.
    #[must_use]
    pub fn new() -> Self {
        Self::with_allocator(facade::global())
    }

    /// Adapter over a caller-provided allocator that lives forever.
    #[must_use]
    pub fn with_allocator(allocator: &'static PoolAllocator) -> Self {
        Self { allocator }
    }

    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    pub fn allocate(&self, bytes: usize, align: usize) -> Option<NonNull<u8>> {
        self.allocator.aligned_allocate(bytes, align)
    }

    /// # Safety
    ///
    /// `ptr` must come from [`Self::allocate`] on any `PoolResource` sharing
    /// the same allocator, and must not be used afterwards.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>, _bytes: usize, _align: usize) {
        // SAFETY: forwarded contract.
        unsafe { self.allocator.aligned_release(ptr.as_ptr()) }
    }

    /// True if blocks from `other` may be released through `self`.
    #[must_use]
    pub fn is_equal(&self, other: &Self) -> bool {
        std::ptr::eq(self.allocator, other.allocator)
    }
}

impl Default for PoolResource {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for PoolResource {
    fn eq(&self, other: &Self) -> bool {
        self.is_equal(other)
    }
}

impl Eq for PoolResource {}

impl std::fmt::Debug for PoolResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolResource").finish_non_exhaustive()
    }
}
