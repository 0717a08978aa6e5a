//! Out-of-memory recovery.
//!
//! When the heap refuses a fallback allocation the pool:
//! 1. flushes both reclaim pools back to the heap and retries once;
//! 2. if a handler is registered, calls it with `recoverable = true` and
//!    retries once more if it returns `true`;
//! 3. otherwise (or if that retry fails) calls the handler, if any, with
//!    `recoverable = false` as a notification and gives up with `None`.
//!
//! The handler receives the size of the system allocation that failed, size
//! header included. It runs with no pool lock held, so it may allocate or
//! release through the same pool.

use std::sync::Arc;

use parking_lot::RwLock;
use tierpool_core::PoolLogLevel;

use crate::heap::SystemHeap;
use crate::pool::{TieredPool, evict_block};

/// Callback invoked on heap exhaustion: `(requested_bytes, recoverable) -> retry`.
pub type OutOfMemoryHandler = Arc<dyn Fn(usize, bool) -> bool + Send + Sync>;

/// Shared, replaceable handler registration.
#[derive(Default)]
pub struct OomHandlerSlot {
    handler: RwLock<Option<OutOfMemoryHandler>>,
}

impl OomHandlerSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler`, returning the previous one.
    pub fn register(&self, handler: OutOfMemoryHandler) -> Option<OutOfMemoryHandler> {
        self.handler.write().replace(handler)
    }

    /// Remove the handler, returning it.
    pub fn clear(&self) -> Option<OutOfMemoryHandler> {
        self.handler.write().take()
    }

    /// The current handler. The lock is released before this returns.
    #[must_use]
    pub fn current(&self) -> Option<OutOfMemoryHandler> {
        self.handler.read().clone()
    }

    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.handler.read().is_some()
    }
}

impl std::fmt::Debug for OomHandlerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OomHandlerSlot")
            .field("registered", &self.is_registered())
            .finish()
    }
}

impl<H: SystemHeap> TieredPool<H> {
    /// Install an out-of-memory handler for this pool.
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

    /// Run the recovery sequence for a failed heap request of `real_size`
    /// bytes. Returns a non-null heap pointer, or `None` once every step failed.
    pub(crate) fn recover_from_oom(&self, real_size: usize) -> Option<*mut u8> {
        let flushed = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let evict = |block| evict_block(&self.heap, &self.outstanding, block);
            let flushed = state.small.flush(evict) + state.medium.flush(evict);
            state.counters.oom_flushes += 1;
            flushed
        };
        self.log_event(
            PoolLogLevel::Warn,
            "allocate",
            "oom_flush_retry",
            Some(real_size),
            "retry",
            || format!("flushed={flushed}"),
        );
        let ptr = self.heap.allocate(real_size);
        if !ptr.is_null() {
            return Some(ptr);
        }

        let handler = self.oom.current();
        if let Some(handler) = &handler {
            let retry = handler(real_size, true);
            self.log_event(
                PoolLogLevel::Warn,
                "allocate",
                "oom_handler_retry",
                Some(real_size),
                if retry { "retry" } else { "declined" },
                String::new,
            );
            if retry {
                let ptr = self.heap.allocate(real_size);
                if !ptr.is_null() {
                    return Some(ptr);
                }
            }
        }

        self.log_event(
            PoolLogLevel::Error,
            "allocate",
            "oom_exhausted",
            Some(real_size),
            "null",
            || format!("handler={}", handler.is_some()),
        );
        if let Some(handler) = handler {
            handler(real_size, false);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn slot_register_replace_clear() {
        let slot = OomHandlerSlot::new();
        assert!(!slot.is_registered());
        assert!(slot.register(Arc::new(|_, _| true)).is_none());
        assert!(slot.register(Arc::new(|_, _| false)).is_some());
        let handler = slot.current().unwrap();
        assert!(!handler(16, true));
        assert!(slot.clear().is_some());
        assert!(slot.current().is_none());
        assert_eq!(format!("{slot:?}"), "OomHandlerSlot { registered: false }");
    }

    #[test]
    fn handler_may_reregister_from_inside_a_call() {
        let slot = Arc::new(OomHandlerSlot::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let inner_slot = Arc::clone(&slot);
        let inner_calls = Arc::clone(&calls);
        slot.register(Arc::new(move |_, _| {
            inner_calls.fetch_add(1, Ordering::Relaxed);
            inner_slot.clear();
            false
        }));
        let handler = slot.current().unwrap();
        handler(1, true);
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert!(!slot.is_registered());
    }
}
