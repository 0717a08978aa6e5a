use std::ptr::NonNull;

use tierpool::{LibcHeap, PoolConfig, PoolLogLevel, PoolMode, TieredPool, aligned_allocate, aligned_release};

const HEADER: usize = tierpool::header::HEADER_SIZE;

fn compact_config() -> PoolConfig {
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

fn compact_pool() -> TieredPool {
    TieredPool::new(compact_config(), LibcHeap).expect("valid config")
}

fn fill(ptr: NonNull<u8>, len: usize, seed: u8) {
    for i in 0..len {
        unsafe { *ptr.as_ptr().add(i) = seed.wrapping_add(i as u8) };
    }
}

fn check(ptr: NonNull<u8>, len: usize, seed: u8) -> bool {
    (0..len).all(|i| unsafe { *ptr.as_ptr().add(i) } == seed.wrapping_add(i as u8))
}

#[test]
fn every_size_class_is_word_aligned_and_lossless() {
    let pool = TieredPool::with_defaults().expect("default pool");
    let sizes = [1, 16, 255, 256, 2047, 2048, 8191, 8192, 100_000];
    let mut live = Vec::new();
    for (i, &n) in sizes.iter().enumerate() {
        let p = pool.allocate(n).expect("allocation");
        assert_eq!(p.as_ptr().addr() % size_of::<usize>(), 0, "size {n}");
        fill(p, n, i as u8);
        live.push((p, n, i as u8));
    }
    for &(p, n, seed) in &live {
        assert!(check(p, n, seed), "size {n} lost data");
    }
    for (p, _, _) in live {
        unsafe { pool.release(p.as_ptr()) };
    }
    let snap = pool.snapshot();
    assert_eq!(snap.counters.total_allocations, sizes.len() as u64);
    assert_eq!(snap.counters.total_releases, sizes.len() as u64);
}

#[test]
fn overfilling_a_reclaim_pool_purges_it_and_respects_capacity() {
    let pool = compact_pool();
    let capacity = pool.config().small_capacity;
    let blocks: Vec<_> = (0..capacity + 3)
        .map(|_| pool.allocate(300).expect("allocation"))
        .collect();
    for p in blocks {
        unsafe { pool.release(p.as_ptr()) };
        assert!(pool.snapshot().small_len <= capacity);
    }
    assert_eq!(pool.snapshot().small_len, capacity);
    assert_eq!(pool.snapshot().counters.small_purges, 0);

    // Nothing cached is large enough, and the pool is full.
    let big = pool.allocate(400).expect("allocation");
    let snap = pool.snapshot();
    assert_eq!(snap.counters.small_purges, 1);
    assert_eq!(snap.small_len, capacity / 2);
    assert!(
        pool.lifecycle_logs()
            .iter()
            .any(|r| r.event == "pool_purge" && r.details.contains("pool=small"))
    );
    unsafe { pool.release(big.as_ptr()) };
    assert!(pool.snapshot().small_len <= capacity);
}

#[test]
fn medium_pool_purges_independently() {
    let pool = compact_pool();
    let blocks: Vec<_> = (0..2).map(|_| pool.allocate(1000).unwrap()).collect();
    for p in blocks {
        unsafe { pool.release(p.as_ptr()) };
    }
    assert_eq!(pool.snapshot().medium_len, 2);
    let p = pool.allocate(1500).unwrap();
    let snap = pool.snapshot();
    assert_eq!(snap.counters.medium_purges, 1);
    assert_eq!(snap.counters.small_purges, 0);
    assert_eq!(snap.medium_len, 1);
    unsafe { pool.release(p.as_ptr()) };
}

#[test]
fn exhausted_tiny_arena_still_serves_tiny_requests() {
    let pool = compact_pool();
    let cells = pool.config().tiny_cells;
    let live: Vec<_> = (0..cells * 3)
        .map(|i| {
            let p = pool.allocate(24).expect("tiny requests never fail");
            fill(p, 24, i as u8);
            p
        })
        .collect();
    let in_arena = live.iter().filter(|p| pool.owns_tiny_cell(p.as_ptr())).count();
    assert_eq!(in_arena, cells);
    for (i, p) in live.iter().enumerate() {
        assert!(check(*p, 24, i as u8));
    }

    let snap = pool.snapshot();
    assert_eq!(snap.tiny_free, 0);
    assert_eq!(snap.counters.from_tiny, cells as u64);
    assert_eq!(snap.counters.tiny_exhaustions, (cells * 2) as u64);
    assert!(
        pool.lifecycle_logs()
            .iter()
            .any(|r| r.event == "tiny_arena_exhausted")
    );

    for p in live {
        unsafe { pool.release(p.as_ptr()) };
    }
    assert_eq!(pool.snapshot().tiny_free, cells);
}

#[test]
fn tiny_overflow_falls_through_to_the_small_pool() {
    let pool = compact_pool();
    let cells: Vec<_> = (0..4).map(|_| pool.allocate(16).unwrap()).collect();
    let small = pool.allocate(300).unwrap();
    unsafe { pool.release(small.as_ptr()) };

    let p = pool.allocate(16).unwrap();
    assert_eq!(p, small);
    assert_eq!(pool.snapshot().counters.from_small, 1);

    unsafe { pool.release(p.as_ptr()) };
    for c in cells {
        unsafe { pool.release(c.as_ptr()) };
    }
}

#[test]
fn medium_requests_never_borrow_from_the_small_pool() {
    let pool = compact_pool();
    let smalls: Vec<_> = (0..2).map(|_| pool.allocate(512).unwrap()).collect();
    for p in smalls {
        unsafe { pool.release(p.as_ptr()) };
    }
    let before = pool.snapshot();
    assert_eq!(before.small_len, 2);
    assert!(before.small_len < before.small_capacity);
    assert_eq!(before.medium_len, 0);

    let p = pool.allocate(600).unwrap();
    let after = pool.snapshot();
    assert_eq!(after.small_len, 2, "medium request touched the small pool");
    assert_eq!(after.counters.from_small, 0);
    assert_eq!(after.counters.from_medium, 0);
    assert_eq!(
        after.counters.heap_fallbacks(),
        before.counters.heap_fallbacks() + 1
    );
    unsafe { pool.release(p.as_ptr()) };
    assert_eq!(pool.snapshot().medium_len, 1);
}

#[test]
fn reallocate_within_capacity_returns_the_same_pointer() {
    let pool = compact_pool();
    for &(initial, smaller) in &[(40, 10), (300, 300), (300, 1), (1500, 700), (5000, 4000)] {
        let p = pool.allocate(initial).unwrap();
        let q = unsafe { pool.reallocate(p.as_ptr(), smaller) }.unwrap();
        assert_eq!(p, q, "{initial} -> {smaller}");
        unsafe { pool.release(q.as_ptr()) };
    }
}

#[test]
fn reallocate_uses_recorded_capacity_of_reused_blocks() {
    let pool = compact_pool();
    let big = pool.allocate(500).unwrap();
    unsafe { pool.release(big.as_ptr()) };
    // Served from the cached 500-byte block.
    let p = pool.allocate(100).unwrap();
    assert_eq!(p, big);
    let q = unsafe { pool.reallocate(p.as_ptr(), 480) }.unwrap();
    assert_eq!(q, p);
    unsafe { pool.release(q.as_ptr()) };
}

#[test]
fn aligned_allocation_honours_alignment() {
    let pool = compact_pool();
    let p = aligned_allocate(&pool, 100, 64).unwrap();
    assert_eq!(p.as_ptr().addr() % 64, 0);
    fill(p, 100, 7);
    assert!(check(p, 100, 7));
    unsafe { aligned_release(&pool, p.as_ptr()) };
}

#[test]
fn aligned_cycles_do_not_leak_outstanding_bytes() {
    let pool = compact_pool();
    let config = pool.config().clone();
    let bound = config.small_capacity * (config.small_threshold + HEADER)
        + config.medium_capacity * (config.medium_threshold + HEADER);

    for round in 0..50 {
        let live: Vec<_> = [8usize, 16, 32, 64, 128, 256, 1024]
            .iter()
            .enumerate()
            .map(|(i, &align)| {
                let bytes = 10 + round * 37 + i * 101;
                let p = aligned_allocate(&pool, bytes, align).unwrap();
                assert_eq!(p.as_ptr().addr() % align, 0);
                p
            })
            .collect();
        for p in live {
            unsafe { aligned_release(&pool, p.as_ptr()) };
        }
        assert!(
            pool.outstanding_bytes() <= bound,
            "round {round}: {} > {bound}",
            pool.outstanding_bytes()
        );
    }
}

#[test]
fn passthrough_aligned_cycles_return_every_byte() {
    let pool = TieredPool::new(
        PoolConfig {
            mode: PoolMode::Passthrough,
            ..compact_config()
        },
        LibcHeap,
    )
    .unwrap();
    for align in [8, 64, 4096] {
        let p = aligned_allocate(&pool, 3000, align).unwrap();
        assert!(pool.outstanding_bytes() > 0);
        unsafe { aligned_release(&pool, p.as_ptr()) };
        assert_eq!(pool.outstanding_bytes(), 0);
    }
}

#[test]
fn status_report_has_four_lines() {
    let pool = compact_pool();
    let p = pool.allocate(10).unwrap();
    let q = pool.allocate(100_000).unwrap();
    let report = pool.status_report();
    let lines: Vec<&str> = report.lines().collect();
    assert_eq!(lines.len(), 4, "{report}");
    assert!(lines[0].starts_with("Share of allocations:"));
    assert!(lines[2].contains(&format!("outstanding heap bytes: {}", 100_000 + HEADER)));
    unsafe {
        pool.release(p.as_ptr());
        pool.release(q.as_ptr());
    }
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "released twice")]
fn double_release_of_tiny_cell_is_fatal_in_debug_builds() {
    let pool = compact_pool();
    let p = pool.allocate(8).unwrap();
    let _other = pool.allocate(8).unwrap();
    unsafe {
        pool.release(p.as_ptr());
        pool.release(p.as_ptr());
    }
}
