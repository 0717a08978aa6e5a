use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tierpool::{LibcHeap, PoolAllocator, PoolConfig, PoolLogLevel, SystemHeap, TieredPool};

/// Heap that refuses the next `failures` requests once armed.
#[derive(Clone, Default)]
struct FlakyHeap {
    failures: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl FlakyHeap {
    fn arm(&self, failures: usize) {
        self.failures.store(failures, Ordering::SeqCst);
        self.calls.store(0, Ordering::SeqCst);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SystemHeap for FlakyHeap {
    fn allocate(&self, bytes: usize) -> *mut u8 {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let armed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            std::ptr::null_mut()
        } else {
            LibcHeap.allocate(bytes)
        }
    }

    unsafe fn release(&self, ptr: *mut u8) {
        unsafe { LibcHeap.release(ptr) }
    }
}

fn config() -> PoolConfig {
    PoolConfig {
        tiny_cell_size: 64,
        tiny_cells: 4,
        small_threshold: 512,
        small_capacity: 4,
        medium_threshold: 2048,
        medium_capacity: 4,
        log_level: PoolLogLevel::Trace,
        ..PoolConfig::default()
    }
}

type Calls = Arc<Mutex<Vec<(usize, bool)>>>;

fn recording_handler(answer: bool) -> (Calls, impl Fn(usize, bool) -> bool + Send + Sync + 'static) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    (calls, move |bytes, recoverable| {
        sink.lock().push((bytes, recoverable));
        answer
    })
}

#[test]
fn flush_and_retry_recovers_without_the_handler() {
    let heap = FlakyHeap::default();
    let pool = TieredPool::new(config(), heap.clone()).unwrap();
    let (calls, handler) = recording_handler(false);
    pool.register_out_of_memory_handler(handler);

    let cached = pool.allocate(300).unwrap();
    unsafe { pool.release(cached.as_ptr()) };
    assert_eq!(pool.snapshot().small_len, 1);

    heap.arm(1);
    let p = pool.allocate(10_000).expect("second attempt succeeds");
    let snap = pool.snapshot();
    assert_eq!(snap.counters.oom_flushes, 1);
    assert_eq!(snap.small_len, 0, "reclaim pools are flushed");
    assert!(calls.lock().is_empty(), "handler not consulted");
    assert_eq!(pool.outstanding_bytes(), 10_000 + tierpool::header::HEADER_SIZE);
    unsafe { pool.release(p.as_ptr()) };
    assert_eq!(pool.outstanding_bytes(), 0);
}

#[test]
fn handler_returning_true_gets_a_retry() {
    let heap = FlakyHeap::default();
    let pool = TieredPool::new(config(), heap.clone()).unwrap();
    let (calls, handler) = recording_handler(true);
    pool.register_out_of_memory_handler(handler);

    heap.arm(2);
    let p = pool.allocate(5000).expect("handler-approved retry succeeds");
    assert_eq!(heap.calls(), 3);
    let real = 5000 + tierpool::header::HEADER_SIZE;
    assert_eq!(*calls.lock(), vec![(real, true)]);

    let events: Vec<&str> = pool.lifecycle_logs().iter().map(|r| r.event).collect();
    assert!(events.contains(&"oom_flush_retry"));
    assert!(events.contains(&"oom_handler_retry"));
    assert!(!events.contains(&"oom_exhausted"));
    unsafe { pool.release(p.as_ptr()) };
}

#[test]
fn handler_returning_false_yields_none_and_a_notification() {
    let heap = FlakyHeap::default();
    let pool = TieredPool::new(config(), heap.clone()).unwrap();
    let (calls, handler) = recording_handler(false);
    pool.register_out_of_memory_handler(handler);

    heap.arm(2);
    assert!(pool.allocate(5000).is_none());
    assert_eq!(heap.calls(), 2, "no retry after a declined handler");
    let real = 5000 + tierpool::header::HEADER_SIZE;
    assert_eq!(*calls.lock(), vec![(real, true), (real, false)]);
    assert_eq!(pool.outstanding_bytes(), 0);

    let exhausted = pool
        .lifecycle_logs()
        .into_iter()
        .find(|r| r.event == "oom_exhausted")
        .expect("exhaustion is logged");
    assert_eq!(exhausted.level, PoolLogLevel::Error);
    assert_eq!(exhausted.size, Some(real));

    // The heap has recovered; later requests work normally.
    let p = pool.allocate(5000).unwrap();
    unsafe { pool.release(p.as_ptr()) };
}

#[test]
fn failed_retry_after_approval_still_notifies() {
    let heap = FlakyHeap::default();
    let pool = TieredPool::new(config(), heap.clone()).unwrap();
    let (calls, handler) = recording_handler(true);
    pool.register_out_of_memory_handler(handler);

    heap.arm(3);
    assert!(pool.allocate(5000).is_none());
    assert_eq!(heap.calls(), 3);
    let flags: Vec<bool> = calls.lock().iter().map(|&(_, recoverable)| recoverable).collect();
    assert_eq!(flags, vec![true, false]);
}

#[test]
fn failed_requests_are_not_counted_as_live() {
    let heap = FlakyHeap::default();
    let pool = TieredPool::new(config(), heap.clone()).unwrap();
    let held = pool.allocate(100).unwrap();

    heap.arm(2);
    assert!(pool.allocate(5000).is_none());
    heap.arm(2);
    assert!(unsafe { pool.reallocate(held.as_ptr(), 50_000) }.is_none());

    let counters = pool.snapshot().counters;
    assert_eq!(counters.total_allocations, 1);
    assert_eq!(counters.failed_allocations, 2);
    assert_eq!(counters.total_releases, 0);
    assert_eq!(counters.live_estimate(), 1, "only the held block is live");

    unsafe { pool.release(held.as_ptr()) };
    assert_eq!(pool.snapshot().counters.live_estimate(), 0);
}

#[test]
fn no_handler_means_none_after_the_flush_retry() {
    let heap = FlakyHeap::default();
    let pool = TieredPool::new(config(), heap.clone()).unwrap();
    heap.arm(2);
    assert!(pool.allocate(5000).is_none());
    assert_eq!(heap.calls(), 2);
    assert_eq!(pool.snapshot().counters.oom_flushes, 1);
}

#[test]
fn reallocate_failure_keeps_the_old_block() {
    let heap = FlakyHeap::default();
    let pool = TieredPool::new(config(), heap.clone()).unwrap();
    let p = pool.allocate(100).unwrap();
    unsafe { p.as_ptr().write_bytes(0x42, 100) };

    heap.arm(2);
    assert!(unsafe { pool.reallocate(p.as_ptr(), 50_000) }.is_none());
    assert!((0..100).all(|i| unsafe { *p.as_ptr().add(i) } == 0x42));
    unsafe { pool.release(p.as_ptr()) };
}

#[test]
fn missing_arena_degrades_to_pool_without_tiny_cells() {
    let heap = FlakyHeap::default();
    heap.arm(1);
    let pool = TieredPool::new(config(), heap.clone()).unwrap();
    assert_eq!(pool.config().tiny_cells, 0);
    assert!(
        pool.lifecycle_logs()
            .iter()
            .any(|r| r.event == "tiny_arena_unavailable" && r.level == PoolLogLevel::Warn)
    );
    let p = pool.allocate(8).unwrap();
    assert!(!pool.owns_tiny_cell(p.as_ptr()));
    unsafe { pool.release(p.as_ptr()) };
    assert_eq!(pool.snapshot().counters.tiny_exhaustions, 0);
    assert!(
        !pool
            .lifecycle_logs()
            .iter()
            .any(|r| r.event == "tiny_arena_exhausted")
    );
}

#[test]
fn facade_handler_registered_before_first_use_applies() {
    let heap = FlakyHeap::default();
    let (calls, handler) = recording_handler(true);
    let alloc = PoolAllocator::with_heap(config(), heap.clone()).with_oom_handler(handler);
    // Build the pool (and its arena) before arming the heap.
    assert!(alloc.try_pool().is_ok());

    heap.arm(2);
    let p = alloc.allocate(4000).expect("handler-approved retry succeeds");
    assert_eq!(calls.lock().len(), 1);
    unsafe { alloc.release(p.as_ptr()) };
}
