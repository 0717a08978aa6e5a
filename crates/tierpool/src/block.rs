//! Owning, bounds-checked handle to a pool block.
//!
//! [`PoolBlock`] pairs a pointer with its length and the allocator it came
//! from, exposes the bytes as slices, and releases the block on drop. Tools
//! that must stay free of `unsafe` (the storm harness, fuzzers) drive the pool
//! through it.

#![allow(unsafe_code)]

use std::fmt;
use std::ptr::NonNull;

use crate::aligned;
use crate::raw::RawAllocator;

/// A live block of `len` bytes, released when dropped.
pub struct PoolBlock<'a, A: RawAllocator + ?Sized> {
    alloc: &'a A,
    ptr: NonNull<u8>,
    len: usize,
    /// Power-of-two alignment for blocks from aligned allocation.
    alignment: Option<usize>,
}

// SAFETY: the block exclusively owns its bytes; releasing it from another
// thread only needs the allocator to be shareable.
unsafe impl<A: RawAllocator + Sync + ?Sized> Send for PoolBlock<'_, A> {}
// SAFETY: shared access only hands out `&[u8]`.
unsafe impl<A: RawAllocator + Sync + ?Sized> Sync for PoolBlock<'_, A> {}

impl<'a, A: RawAllocator + ?Sized> PoolBlock<'a, A> {
    /// Allocate `len` zeroed bytes.
    pub fn allocate(alloc: &'a A, len: usize) -> Option<Self> {
        let ptr = alloc.allocate(len)?;
        let mut block = Self {
            alloc,
            ptr,
            len,
            alignment: None,
        };
        block.fill(0);
        Some(block)
    }

    /// Allocate `count * element_size` zeroed bytes.
    pub fn zeroed(alloc: &'a A, count: usize, element_size: usize) -> Option<Self> {
        let len = count.checked_mul(element_size)?;
        let ptr = alloc.zeroed_allocate(count, element_size)?;
        Some(Self {
            alloc,
            ptr,
            len,
            alignment: None,
        })
    }

    /// Allocate `len` zeroed bytes aligned to `alignment`.
    ///
    /// # Panics
    ///
    /// Panics if `alignment` is not a power of two.
    pub fn aligned(alloc: &'a A, len: usize, alignment: usize) -> Option<Self> {
        let ptr = aligned::aligned_allocate(alloc, len, alignment)?;
        let mut block = Self {
            alloc,
            ptr,
            len,
            alignment: Some(alignment),
        };
        block.fill(0);
        Some(block)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Alignment requested at allocation, for aligned blocks.
    #[must_use]
    pub fn alignment(&self) -> Option<usize> {
        self.alignment
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: the block owns `len` initialised bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: the block owns `len` initialised bytes exclusively.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn fill(&mut self, byte: u8) {
        // SAFETY: the block owns `len` writable bytes.
        unsafe { self.ptr.as_ptr().write_bytes(byte, self.len) };
    }

    /// Resize to `len` bytes, keeping the common prefix. New bytes are
    /// zeroed. On exhaustion the untouched block comes back as `Err`.
    pub fn resize(self, len: usize) -> Result<Self, Self> {
        if let Some(alignment) = self.alignment {
            let Some(mut fresh) = Self::aligned(self.alloc, len, alignment) else {
                return Err(self);
            };
            let kept = self.len.min(len);
            fresh.as_mut_slice()[..kept].copy_from_slice(&self.as_slice()[..kept]);
            return Ok(fresh);
        }

        let old_len = self.len;
        // SAFETY: `self.ptr` is a live block from `self.alloc`.
        match unsafe { self.alloc.reallocate(self.ptr.as_ptr(), len) } {
            Some(ptr) => {
                let alloc = self.alloc;
                std::mem::forget(self);
                let mut block = Self {
                    alloc,
                    ptr,
                    len,
                    alignment: None,
                };
                if len > old_len {
                    block.zero_from(old_len);
                }
                Ok(block)
            }
            None => Err(self),
        }
    }

    fn zero_from(&mut self, start: usize) {
        // SAFETY: `start <= len` and the block owns `len` writable bytes.
        unsafe { self.ptr.as_ptr().add(start).write_bytes(0, self.len - start) };
    }
}

impl<A: RawAllocator + ?Sized> Drop for PoolBlock<'_, A> {
    fn drop(&mut self) {
        // SAFETY: the block is live and owned; it is released exactly once.
        unsafe {
            if self.alignment.is_some() {
                aligned::aligned_release(self.alloc, self.ptr.as_ptr());
            } else {
                self.alloc.release(self.ptr.as_ptr());
            }
        }
    }
}

impl<A: RawAllocator + ?Sized> fmt::Debug for PoolBlock<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBlock")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("alignment", &self.alignment)
            .finish()
    }
}
