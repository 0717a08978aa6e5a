//! Lazily initialized allocator handle and the process-wide instance.
//!
//! [`PoolAllocator`] builds its [`TieredPool`] on the first request that needs
//! it, exactly once, even when several threads race to be first. The
//! out-of-memory handler lives in the handle rather than the pool so it can be
//! registered before initialization.
//!
//! [`global`] is a `static` handle configured from the environment. Statics
//! are never dropped, so the pool outlives every caller, including code that
//! releases blocks during process teardown.

#![allow(unsafe_code)]

use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

use tierpool_core::{PoolConfig, PoolError, PoolLogLevel, PoolLogRecord, StatusSnapshot};

use crate::aligned;
use crate::heap::{LibcHeap, SystemHeap};
use crate::oom::OomHandlerSlot;
use crate::pool::TieredPool;
use crate::raw::RawAllocator;

/// Explicit allocator handle with once-only pool construction.
pub struct PoolAllocator<H: SystemHeap = LibcHeap> {
    config: PoolConfig,
    heap: H,
    oom: Arc<OomHandlerSlot>,
    pool: OnceLock<Result<TieredPool<H>, PoolError>>,
    /// Problem with the requested configuration that was resolved by falling
    /// back to defaults. Logged once the pool exists.
    config_fallback: Option<PoolError>,
}

impl PoolAllocator<LibcHeap> {
    /// Handle over the C library heap.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self::with_heap(config, LibcHeap)
    }

    /// Handle configured from `TIERPOOL_*` environment variables. An invalid
    /// environment falls back to the defaults and records a warning.
    #[must_use]
    pub fn from_env() -> Self {
        match PoolConfig::from_env() {
            Ok(config) => Self::new(config),
            Err(err) => Self {
                config_fallback: Some(err),
                ..Self::new(PoolConfig::default())
            },
        }
    }
}

impl Default for PoolAllocator<LibcHeap> {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl<H: SystemHeap + Clone> PoolAllocator<H> {
    #[must_use]
    pub fn with_heap(config: PoolConfig, heap: H) -> Self {
        Self {
            config,
            heap,
            oom: Arc::new(OomHandlerSlot::new()),
            pool: OnceLock::new(),
            config_fallback: None,
        }
    }

    /// Register the out-of-memory handler at construction time.
    #[must_use]
    pub fn with_oom_handler<F>(self, handler: F) -> Self
    where
        F: Fn(usize, bool) -> bool + Send + Sync + 'static,
    {
        self.register_out_of_memory_handler(handler);
        self
    }

    /// Install or replace the out-of-memory handler.
    pub fn register_out_of_memory_handler<F>(&self, handler: F)
    where
        F: Fn(usize, bool) -> bool + Send + Sync + 'static,
    {
        self.oom.register(Arc::new(handler));
    }

    /// Remove the out-of-memory handler.
    pub fn clear_out_of_memory_handler(&self) {
        self.oom.clear();
    }

    /// The pool, building it on first use. `Err` if the configuration is
    /// invalid; the error is sticky.
    pub fn try_pool(&self) -> Result<&TieredPool<H>, &PoolError> {
        self.pool
            .get_or_init(|| {
                let pool = TieredPool::with_handler_slot(
                    self.config.clone(),
                    self.heap.clone(),
                    Arc::clone(&self.oom),
                );
                if let (Ok(pool), Some(err)) = (&pool, &self.config_fallback) {
                    pool.log_event(
                        PoolLogLevel::Warn,
                        "init",
                        "config_fallback",
                        None,
                        "defaults",
                        || err.to_string(),
                    );
                }
                pool
            })
            .as_ref()
    }

    /// The pool if it has been built already.
    #[must_use]
    pub fn pool_if_initialized(&self) -> Option<&TieredPool<H>> {
        self.pool.get().and_then(|pool| pool.as_ref().ok())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.pool_if_initialized().is_some()
    }

    pub fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
        self.try_pool().ok()?.allocate(bytes)
    }

    /// # Safety
    ///
    /// `ptr` must be null or a live pointer from this handle.
    pub unsafe fn release(&self, ptr: *mut u8) {
        if ptr.is_null() {
            return;
        }
        if let Some(pool) = self.pool_if_initialized() {
            // SAFETY: forwarded contract.
            unsafe { pool.release(ptr) }
        }
    }

    /// # Safety
    ///
    /// `ptr` must be null or a live pointer from this handle.
    pub unsafe fn reallocate(&self, ptr: *mut u8, bytes: usize) -> Option<NonNull<u8>> {
        // SAFETY: forwarded contract.
        unsafe { self.try_pool().ok()?.reallocate(ptr, bytes) }
    }

    /// `count * element_size` zeroed bytes; `None` on overflow or exhaustion.
    pub fn zeroed_allocate(&self, count: usize, element_size: usize) -> Option<NonNull<u8>> {
        RawAllocator::zeroed_allocate(self, count, element_size)
    }

    /// # Panics
    ///
    /// Panics if `alignment` is not a power of two.
    pub fn aligned_allocate(&self, bytes: usize, alignment: usize) -> Option<NonNull<u8>> {
        aligned::aligned_allocate(self, bytes, alignment)
    }

    /// # Safety
    ///
    /// `ptr` must be null or a live pointer from [`Self::aligned_allocate`].
    pub unsafe fn aligned_release(&self, ptr: *mut u8) {
        // SAFETY: forwarded contract.
        unsafe { aligned::aligned_release(self, ptr) }
    }

    /// Status snapshot, or `None` before the first allocation.
    #[must_use]
    pub fn snapshot(&self) -> Option<StatusSnapshot> {
        self.pool_if_initialized().map(TieredPool::snapshot)
    }

    /// Human-readable summary. Does not build the pool.
    #[must_use]
    pub fn status_report(&self) -> String {
        match self.pool.get() {
            Some(Ok(pool)) => pool.status_report(),
            Some(Err(err)) => format!("Pool unavailable: {err}"),
            None => "No allocations made yet.".to_string(),
        }
    }

    /// Zero the counters; pool contents are untouched.
    pub fn reset_counters(&self) {
        if let Some(pool) = self.pool_if_initialized() {
            pool.reset_counters();
        }
    }

    #[must_use]
    pub fn lifecycle_logs(&self) -> Vec<PoolLogRecord> {
        self.pool_if_initialized()
            .map(TieredPool::lifecycle_logs)
            .unwrap_or_default()
    }

    pub fn drain_lifecycle_logs(&self) -> Vec<PoolLogRecord> {
        self.pool_if_initialized()
            .map(TieredPool::drain_lifecycle_logs)
            .unwrap_or_default()
    }

    /// Bytes held from the heap through the fallback path.
    #[must_use]
    pub fn outstanding_bytes(&self) -> usize {
        self.pool_if_initialized()
            .map_or(0, TieredPool::outstanding_bytes)
    }
}

impl<H: SystemHeap + Clone> RawAllocator for PoolAllocator<H> {
    fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
        PoolAllocator::allocate(self, bytes)
    }

    unsafe fn release(&self, ptr: *mut u8) {
        // SAFETY: forwarded contract.
        unsafe { PoolAllocator::release(self, ptr) }
    }

    unsafe fn reallocate(&self, ptr: *mut u8, bytes: usize) -> Option<NonNull<u8>> {
        // SAFETY: forwarded contract.
        unsafe { PoolAllocator::reallocate(self, ptr, bytes) }
    }
}

static GLOBAL: OnceLock<PoolAllocator> = OnceLock::new();

/// The process-wide allocator, configured from the environment on first use.
pub fn global() -> &'static PoolAllocator {
    GLOBAL.get_or_init(PoolAllocator::from_env)
}

/// [`PoolAllocator::allocate`] on the process-wide instance.
pub fn allocate(bytes: usize) -> Option<NonNull<u8>> {
    global().allocate(bytes)
}

/// [`PoolAllocator::release`] on the process-wide instance.
///
/// # Safety
///
/// `ptr` must be null or a live pointer from the process-wide instance.
pub unsafe fn release(ptr: *mut u8) {
    // SAFETY: forwarded contract.
    unsafe { global().release(ptr) }
}

/// [`PoolAllocator::reallocate`] on the process-wide instance.
///
/// # Safety
///
/// `ptr` must be null or a live pointer from the process-wide instance.
pub unsafe fn reallocate(ptr: *mut u8, bytes: usize) -> Option<NonNull<u8>> {
    // SAFETY: forwarded contract.
    unsafe { global().reallocate(ptr, bytes) }
}

pub fn zeroed_allocate(count: usize, element_size: usize) -> Option<NonNull<u8>> {
    global().zeroed_allocate(count, element_size)
}

pub fn aligned_allocate(bytes: usize, alignment: usize) -> Option<NonNull<u8>> {
    global().aligned_allocate(bytes, alignment)
}

/// # Safety
///
/// `ptr` must be null or a live pointer from [`aligned_allocate`].
pub unsafe fn aligned_release(ptr: *mut u8) {
    // SAFETY: forwarded contract.
    unsafe { global().aligned_release(ptr) }
}

pub fn register_out_of_memory_handler<F>(handler: F)
where
    F: Fn(usize, bool) -> bool + Send + Sync + 'static,
{
    global().register_out_of_memory_handler(handler);
}

pub fn status_report() -> String {
    global().status_report()
}

pub fn reset_counters() {
    global().reset_counters();
}
