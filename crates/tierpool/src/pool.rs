//! The tiered pool: tiny arena, small and medium reclaim pools, heap fallback.
//!
//! Request routing (`T_tiny <= T_small <= T_medium`):
//! - `bytes <= T_tiny`: pop a tiny cell; an empty arena falls through to the
//!   small pool.
//! - `bytes <= T_small`: first fit from the small reclaim pool.
//! - `bytes <= T_medium`: first fit from the medium reclaim pool only. Medium
//!   requests never borrow from the small pool.
//! - anything else, or a miss: general heap with a hidden size header.
//!
//! Releases are routed by origin. An address inside the arena goes back on the
//! tiny free list; anything else is classified by its recorded size and cached
//! if the matching pool has room, otherwise returned to the heap.
//!
//! Pool bookkeeping is protected by one [`SpinGuard`]. Heap calls for the
//! fallback path run outside it; purges and out-of-memory flushes evict to the
//! heap while holding it. The outstanding-byte counter is a separate atomic.

#![allow(unsafe_code)]

use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tierpool_core::{
    EventLog, MemoryBlock, PoolConfig, PoolCounters, PoolError, PoolLogLevel, PoolLogRecord,
    ReclaimPool, SizeClass, StatusSnapshot, TakeOutcome, TinyFreeList,
};

use crate::guard::SpinGuard;
use crate::header::{self, HEADER_SIZE};
use crate::heap::{LibcHeap, SystemHeap};
use crate::oom::OomHandlerSlot;
use crate::raw::RawAllocator;

/// Bookkeeping mutated under the spin guard.
pub(crate) struct PoolState {
    pub(crate) tiny: TinyFreeList,
    pub(crate) small: ReclaimPool,
    pub(crate) medium: ReclaimPool,
    pub(crate) counters: PoolCounters,
}

/// Size-classed allocator over a [`SystemHeap`].
pub struct TieredPool<H: SystemHeap = LibcHeap> {
    pub(crate) config: PoolConfig,
    pub(crate) heap: H,
    /// Start of the tiny arena; `None` when there is no arena.
    arena: Option<NonNull<u8>>,
    arena_start: usize,
    arena_end: usize,
    pub(crate) state: SpinGuard<PoolState>,
    pub(crate) outstanding: AtomicUsize,
    pub(crate) oom: Arc<OomHandlerSlot>,
    log: Mutex<EventLog>,
}

// SAFETY: the arena pointer is only dereferenced through cells handed out
// under the spin guard; every other shared field is synchronized.
unsafe impl<H: SystemHeap> Send for TieredPool<H> {}
// SAFETY: see above.
unsafe impl<H: SystemHeap> Sync for TieredPool<H> {}

/// What happened under the guard that deserves a log record.
#[derive(Default)]
struct AllocateNotes {
    tiny_exhausted: bool,
    purged: Option<(&'static str, usize)>,
}

impl TieredPool<LibcHeap> {
    /// Pool over the C library heap with default tuning.
    pub fn with_defaults() -> Result<Self, PoolError> {
        Self::new(PoolConfig::default(), LibcHeap)
    }
}

impl<H: SystemHeap> TieredPool<H> {
    /// Build a pool. The tiny arena is preallocated here; if the heap cannot
    /// provide it the pool runs without one.
    pub fn new(config: PoolConfig, heap: H) -> Result<Self, PoolError> {
        Self::with_handler_slot(config, heap, Arc::new(OomHandlerSlot::new()))
    }

    pub(crate) fn with_handler_slot(
        config: PoolConfig,
        heap: H,
        oom: Arc<OomHandlerSlot>,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        let pooled = config.mode.pooling_enabled();
        let arena_bytes = if pooled { config.tiny_arena_bytes()? } else { 0 };

        let arena = if arena_bytes > 0 {
            NonNull::new(heap.allocate(arena_bytes))
        } else {
            None
        };
        let arena_missing = arena_bytes > 0 && arena.is_none();
        let config = if arena_missing || !pooled {
            config.without_tiny_arena()
        } else {
            config
        };

        let tiny = match arena {
            Some(base) => {
                TinyFreeList::new(base.as_ptr().addr(), config.tiny_cell_size, config.tiny_cells)
            }
            None => TinyFreeList::empty(config.tiny_cell_size),
        };
        let arena_start = tiny.base();
        let arena_end = arena_start + tiny.arena_bytes();

        let state = PoolState {
            tiny,
            small: ReclaimPool::new(if pooled { config.small_capacity } else { 0 }),
            medium: ReclaimPool::new(if pooled { config.medium_capacity } else { 0 }),
            counters: PoolCounters::default(),
        };

        let pool = Self {
            log: Mutex::new(EventLog::new(config.log_level, config.log_capacity)),
            state: SpinGuard::new(state, config.spin),
            config,
            heap,
            arena,
            arena_start,
            arena_end,
            outstanding: AtomicUsize::new(0),
            oom,
        };

        if arena_missing {
            pool.log_event(
                PoolLogLevel::Warn,
                "init",
                "tiny_arena_unavailable",
                Some(arena_bytes),
                "degraded",
                || "tiny arena allocation failed; continuing without it".to_string(),
            );
        }
        pool.log_event(PoolLogLevel::Info, "init", "pool_init", None, "ready", || {
            format!(
                "mode={} tiny_cells={} tiny_cell_size={} small={}x{} medium={}x{}",
                pool.config.mode.as_str(),
                pool.config.tiny_cells,
                pool.config.tiny_cell_size,
                pool.config.small_capacity,
                pool.config.small_threshold,
                pool.config.medium_capacity,
                pool.config.medium_threshold,
            )
        });
        Ok(pool)
    }

    /// Effective configuration (the arena is dropped from it when unavailable).
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Returns true if `ptr` lies inside the tiny arena.
    #[inline]
    #[must_use]
    pub fn owns_tiny_cell(&self, ptr: *const u8) -> bool {
        let addr = ptr.addr();
        addr >= self.arena_start && addr < self.arena_end
    }

    /// Bytes currently held from the heap through the fallback path, headers
    /// included.
    #[must_use]
    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Allocate at least `bytes` bytes. `None` means the heap is exhausted even
    /// after out-of-memory recovery.
    pub fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
        let class = if self.config.mode.pooling_enabled() {
            SizeClass::for_request(bytes, &self.config)
        } else {
            SizeClass::Heap
        };

        let mut notes = AllocateNotes::default();
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.counters.total_allocations += 1;

            // Without an arena, tiny requests are plain small requests.
            let class = if class == SizeClass::Tiny && state.tiny.cells() == 0 {
                SizeClass::Small
            } else {
                class
            };
            let mut search_small = class == SizeClass::Small;
            if class == SizeClass::Tiny {
                if let Some(addr) = state.tiny.pop() {
                    state.counters.from_tiny += 1;
                    drop(guard);
                    return Some(self.cell_ptr(addr));
                }
                state.counters.tiny_exhaustions += 1;
                notes.tiny_exhausted = true;
                search_small = true;
            }

            let evict = |block| evict_block(&self.heap, &self.outstanding, block);
            let outcome = if search_small {
                let outcome = state.small.take_or_purge(bytes, evict);
                match outcome {
                    TakeOutcome::Hit(_) => state.counters.from_small += 1,
                    TakeOutcome::MissPurged(n) => {
                        state.counters.small_purges += 1;
                        notes.purged = Some(("small", n));
                    }
                    TakeOutcome::Miss => {}
                }
                outcome
            } else if class == SizeClass::Medium {
                let outcome = state.medium.take_or_purge(bytes, evict);
                match outcome {
                    TakeOutcome::Hit(_) => state.counters.from_medium += 1,
                    TakeOutcome::MissPurged(n) => {
                        state.counters.medium_purges += 1;
                        notes.purged = Some(("medium", n));
                    }
                    TakeOutcome::Miss => {}
                }
                outcome
            } else {
                TakeOutcome::Miss
            };

            if let TakeOutcome::Hit(block) = outcome {
                drop(guard);
                return NonNull::new(block_ptr(block));
            }
        }

        if notes.tiny_exhausted {
            self.log_event(
                PoolLogLevel::Debug,
                "allocate",
                "tiny_arena_exhausted",
                Some(bytes),
                "fallthrough",
                || format!("cells={}", self.config.tiny_cells),
            );
        }
        if let Some((pool, evicted)) = notes.purged {
            self.log_event(
                PoolLogLevel::Info,
                "allocate",
                "pool_purge",
                Some(bytes),
                "purged",
                || format!("pool={pool} evicted={evicted}"),
            );
        }

        let block = self.allocate_from_heap(bytes);
        if block.is_none() {
            let mut state = self.state.lock();
            // Counted optimistically under the first guard section.
            state.counters.total_allocations = state.counters.total_allocations.saturating_sub(1);
            state.counters.failed_allocations += 1;
        }
        block
    }

    /// Return a block to the pool or the heap. Null is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by this pool.
    pub unsafe fn release(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        if self.owns_tiny_cell(ptr) {
            let mut state = self.state.lock();
            state.counters.total_releases += 1;
            state.tiny.push(ptr.addr());
            return;
        }

        // SAFETY: every non-arena pointer from this pool carries a header.
        let bytes = unsafe { header::recorded_size(ptr) };
        {
            let mut state = self.state.lock();
            state.counters.total_releases += 1;
            let block = MemoryBlock::new(ptr.expose_provenance(), bytes);
            let cached = match SizeClass::for_recorded(bytes, &self.config) {
                SizeClass::Small => state.small.try_insert(block),
                SizeClass::Medium => state.medium.try_insert(block),
                SizeClass::Tiny | SizeClass::Heap => false,
            };
            if cached {
                return;
            }
        }
        release_to_heap(&self.heap, &self.outstanding, ptr, bytes);
    }

    /// Resize a block. Grows move the data; shrinks and grows that still fit
    /// the block's capacity return `ptr` unchanged. On `None` the old block is
    /// still valid.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer returned by this pool.
    pub unsafe fn reallocate(&self, ptr: *mut u8, bytes: usize) -> Option<NonNull<u8>> {
        if ptr.is_null() {
            return self.allocate(bytes);
        }
        let capacity = if self.owns_tiny_cell(ptr) {
            self.config.tiny_cell_size
        } else {
            // SAFETY: non-arena pointers carry a header.
            unsafe { header::recorded_size(ptr) }
        };
        if bytes <= capacity {
            return NonNull::new(ptr);
        }

        let fresh = self.allocate(bytes)?;
        // SAFETY: `ptr` is valid for `capacity` bytes, `fresh` for
        // `bytes > capacity`; distinct live blocks never overlap.
        unsafe {
            ptr::copy_nonoverlapping(ptr, fresh.as_ptr(), capacity);
            self.release(ptr);
        }
        Some(fresh)
    }

    /// Copy of the counters and pool occupancies.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        let state = self.state.lock();
        StatusSnapshot {
            mode: self.config.mode,
            counters: state.counters,
            tiny_free: state.tiny.available(),
            tiny_cells: state.tiny.cells(),
            tiny_cell_size: self.config.tiny_cell_size,
            small_len: state.small.len(),
            small_capacity: state.small.capacity(),
            small_threshold: self.config.small_threshold,
            medium_len: state.medium.len(),
            medium_capacity: state.medium.capacity(),
            medium_threshold: self.config.medium_threshold,
            outstanding_bytes: self.outstanding_bytes(),
        }
    }

    /// Four-line human-readable summary.
    #[must_use]
    pub fn status_report(&self) -> String {
        self.snapshot().to_string()
    }

    /// Zero the counters. Pool contents and outstanding bytes are untouched.
    pub fn reset_counters(&self) {
        let previous = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.counters)
        };
        self.log_event(PoolLogLevel::Debug, "reset_counters", "counters_reset", None, "reset", || {
            format!("previous_total_allocations={}", previous.total_allocations)
        });
    }

    /// Copy of the retained lifecycle records.
    #[must_use]
    pub fn lifecycle_logs(&self) -> Vec<PoolLogRecord> {
        self.log.lock().records()
    }

    /// Remove and return the retained lifecycle records.
    pub fn drain_lifecycle_logs(&self) -> Vec<PoolLogRecord> {
        self.log.lock().drain()
    }

    /// Serve `bytes` from the heap with a size header, running out-of-memory
    /// recovery on failure.
    fn allocate_from_heap(&self, bytes: usize) -> Option<NonNull<u8>> {
        let real_size = header::real_size(bytes)?;
        let mut real = self.heap.allocate(real_size);
        if real.is_null() {
            real = self.recover_from_oom(real_size)?;
        }
        self.outstanding.fetch_add(real_size, Ordering::Relaxed);
        // SAFETY: `real` is a fresh heap block of `real_size` bytes, 16-aligned.
        let user = unsafe { header::write(real, bytes) };
        self.log_event(PoolLogLevel::Trace, "allocate", "heap_fallback", Some(bytes), "success", String::new);
        NonNull::new(user)
    }

    #[inline]
    fn cell_ptr(&self, addr: usize) -> NonNull<u8> {
        match self.arena {
            // SAFETY: `addr` came from the free list, so it lies inside the arena.
            Some(base) => unsafe { base.add(addr - self.arena_start) },
            None => unreachable!("tiny cell handed out without an arena"),
        }
    }

    /// Record a lifecycle event if its level is enabled. Never call this while
    /// holding the spin guard.
    pub(crate) fn log_event<F>(
        &self,
        level: PoolLogLevel,
        symbol: &'static str,
        event: &'static str,
        size: Option<usize>,
        outcome: &'static str,
        details: F,
    ) where
        F: FnOnce() -> String,
    {
        if self.config.log_capacity == 0 || level < self.config.log_level {
            return;
        }
        let outstanding = self.outstanding_bytes();
        self.log
            .lock()
            .record(level, symbol, event, size, outcome, details(), outstanding);
    }
}

/// User pointer for a cached block.
#[inline]
fn block_ptr(block: MemoryBlock) -> *mut u8 {
    ptr::with_exposed_provenance_mut(block.addr)
}

/// Return a cached block to the heap.
pub(crate) fn evict_block<H: SystemHeap>(heap: &H, outstanding: &AtomicUsize, block: MemoryBlock) {
    release_to_heap(heap, outstanding, block_ptr(block), block.bytes);
}

/// Return a header-prefixed block of recorded size `bytes` to the heap.
fn release_to_heap<H: SystemHeap>(heap: &H, outstanding: &AtomicUsize, user: *mut u8, bytes: usize) {
    outstanding.fetch_sub(bytes + HEADER_SIZE, Ordering::Relaxed);
    // SAFETY: `user` is a live heap-fallback block whose header sits
    // HEADER_SIZE bytes before it.
    unsafe { heap.release(header::real_ptr(user)) };
}

impl<H: SystemHeap> RawAllocator for TieredPool<H> {
    fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
        TieredPool::allocate(self, bytes)
    }

    unsafe fn release(&self, ptr: *mut u8) {
        // SAFETY: forwarded contract.
        unsafe { TieredPool::release(self, ptr) }
    }

    unsafe fn reallocate(&self, ptr: *mut u8, bytes: usize) -> Option<NonNull<u8>> {
        // SAFETY: forwarded contract.
        unsafe { TieredPool::reallocate(self, ptr, bytes) }
    }
}

impl<H: SystemHeap> Drop for TieredPool<H> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let heap = &self.heap;
        let outstanding = &self.outstanding;
        state.small.flush(|block| evict_block(heap, outstanding, block));
        state.medium.flush(|block| evict_block(heap, outstanding, block));
        if let Some(base) = self.arena.take() {
            // SAFETY: the arena came from this heap in `new`.
            unsafe { self.heap.release(base.as_ptr()) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> PoolConfig {
        PoolConfig {
            tiny_cell_size: 64,
            tiny_cells: 4,
            small_threshold: 512,
            small_capacity: 4,
            medium_threshold: 2048,
            medium_capacity: 2,
            log_level: PoolLogLevel::Trace,
            ..PoolConfig::default()
        }
    }

    fn pool() -> TieredPool {
        TieredPool::new(small_config(), LibcHeap).expect("valid config")
    }

    #[test]
    fn tiny_requests_come_from_the_arena() {
        let pool = pool();
        let p = pool.allocate(10).unwrap();
        assert!(pool.owns_tiny_cell(p.as_ptr()));
        assert_eq!(p.as_ptr().addr() % 16, 0);
        unsafe { pool.release(p.as_ptr()) };
        let snap = pool.snapshot();
        assert_eq!(snap.counters.from_tiny, 1);
        assert_eq!(snap.tiny_free, 4);
        assert_eq!(pool.outstanding_bytes(), 0);
    }

    #[test]
    fn released_small_block_is_reused() {
        let pool = pool();
        let a = pool.allocate(300).unwrap();
        unsafe { pool.release(a.as_ptr()) };
        assert_eq!(pool.snapshot().small_len, 1);
        let b = pool.allocate(200).unwrap();
        assert_eq!(a, b);
        let snap = pool.snapshot();
        assert_eq!(snap.counters.from_small, 1);
        assert_eq!(snap.small_len, 0);
        unsafe { pool.release(b.as_ptr()) };
    }

    #[test]
    fn oversized_blocks_go_straight_back_to_the_heap() {
        let pool = pool();
        let p = pool.allocate(10_000).unwrap();
        assert_eq!(pool.outstanding_bytes(), 10_000 + HEADER_SIZE);
        unsafe { pool.release(p.as_ptr()) };
        assert_eq!(pool.outstanding_bytes(), 0);
        let snap = pool.snapshot();
        assert_eq!(snap.small_len + snap.medium_len, 0);
    }

    #[test]
    fn release_of_null_is_a_no_op() {
        let pool = pool();
        unsafe { pool.release(ptr::null_mut()) };
        assert_eq!(pool.snapshot().counters.total_releases, 0);
    }

    #[test]
    fn reallocate_null_allocates() {
        let pool = pool();
        let p = unsafe { pool.reallocate(ptr::null_mut(), 100) }.unwrap();
        assert_eq!(pool.snapshot().counters.total_allocations, 1);
        unsafe { pool.release(p.as_ptr()) };
    }

    #[test]
    fn reallocate_tiny_cell_in_place_then_moves() {
        let pool = pool();
        let p = pool.allocate(8).unwrap();
        unsafe {
            p.as_ptr().write_bytes(0x5A, 64);
            let same = pool.reallocate(p.as_ptr(), 64).unwrap();
            assert_eq!(same, p);
            let moved = pool.reallocate(p.as_ptr(), 65).unwrap();
            assert_ne!(moved, p);
            assert!(!pool.owns_tiny_cell(moved.as_ptr()));
            for i in 0..64 {
                assert_eq!(*moved.as_ptr().add(i), 0x5A);
            }
            pool.release(moved.as_ptr());
        }
        assert_eq!(pool.snapshot().tiny_free, 4);
    }

    #[test]
    fn reallocate_grows_heap_block_and_keeps_contents() {
        let pool = pool();
        let p = pool.allocate(100).unwrap();
        unsafe {
            for i in 0..100 {
                *p.as_ptr().add(i) = i as u8;
            }
            let q = pool.reallocate(p.as_ptr(), 1000).unwrap();
            for i in 0..100 {
                assert_eq!(*q.as_ptr().add(i), i as u8);
            }
            pool.release(q.as_ptr());
        }
    }

    #[test]
    fn passthrough_mode_never_pools() {
        let config = PoolConfig {
            mode: tierpool_core::PoolMode::Passthrough,
            ..small_config()
        };
        let pool = TieredPool::new(config, LibcHeap).unwrap();
        let p = pool.allocate(8).unwrap();
        assert!(!pool.owns_tiny_cell(p.as_ptr()));
        unsafe { pool.release(p.as_ptr()) };
        let snap = pool.snapshot();
        assert_eq!(snap.tiny_cells, 0);
        assert_eq!(snap.small_len, 0);
        assert_eq!(snap.counters.pooled(), 0);
        assert_eq!(pool.outstanding_bytes(), 0);
        assert!(pool.status_report().contains("(passthrough)"));
    }

    #[test]
    fn pool_without_tiny_cells_serves_tiny_requests_as_small() {
        let config = PoolConfig {
            tiny_cells: 0,
            ..small_config()
        };
        let pool = TieredPool::new(config, LibcHeap).unwrap();
        let a = pool.allocate(20).unwrap();
        unsafe { pool.release(a.as_ptr()) };
        assert_eq!(pool.snapshot().small_len, 1);
        let b = pool.allocate(8).unwrap();
        assert_eq!(a, b);
        unsafe { pool.release(b.as_ptr()) };

        let snap = pool.snapshot();
        assert_eq!(snap.counters.tiny_exhaustions, 0);
        assert_eq!(snap.counters.from_small, 1);
        assert!(
            !pool
                .lifecycle_logs()
                .iter()
                .any(|record| record.event == "tiny_arena_exhausted")
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = PoolConfig {
            small_threshold: 32,
            ..small_config()
        };
        assert!(matches!(
            TieredPool::new(config, LibcHeap),
            Err(PoolError::ThresholdOrder { .. })
        ));
    }

    #[test]
    fn reset_counters_keeps_pool_contents() {
        let pool = pool();
        let p = pool.allocate(300).unwrap();
        unsafe { pool.release(p.as_ptr()) };
        let outstanding = pool.outstanding_bytes();
        pool.reset_counters();
        let snap = pool.snapshot();
        assert_eq!(snap.counters, PoolCounters::default());
        assert_eq!(snap.small_len, 1);
        assert_eq!(pool.outstanding_bytes(), outstanding);
        assert!(pool.status_report().starts_with("No allocations made yet."));
        assert!(
            pool.lifecycle_logs()
                .iter()
                .any(|record| record.event == "counters_reset")
        );
    }

    #[test]
    fn init_is_logged() {
        let pool = pool();
        let logs = pool.drain_lifecycle_logs();
        assert_eq!(logs[0].event, "pool_init");
        assert!(logs[0].details.contains("mode=pooled"));
        assert!(pool.lifecycle_logs().is_empty());
    }
}
