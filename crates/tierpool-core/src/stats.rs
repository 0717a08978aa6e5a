//! Allocation counters and the rendered status summary.
//!
//! Counters are plain integers mutated under the pool's guard; the outstanding
//! byte count lives in an atomic outside the guard and is copied into the
//! snapshot when one is taken. Nothing here influences allocation decisions.

use std::fmt;

use crate::config::PoolMode;

/// Per-class allocation counts and maintenance counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounters {
    /// Successful allocations, including those served by the heap.
    pub total_allocations: u64,
    /// Requests that returned no block after out-of-memory recovery.
    pub failed_allocations: u64,
    pub from_tiny: u64,
    pub from_small: u64,
    pub from_medium: u64,
    /// Non-null releases.
    pub total_releases: u64,
    /// Tiny-class requests that found the arena empty.
    pub tiny_exhaustions: u64,
    pub small_purges: u64,
    pub medium_purges: u64,
    /// Out-of-memory recoveries that flushed both reclaim pools.
    pub oom_flushes: u64,
}

impl PoolCounters {
    /// Allocations served by reuse (tiny arena or a reclaim pool).
    #[must_use]
    pub fn pooled(&self) -> u64 {
        self.from_tiny + self.from_small + self.from_medium
    }

    /// Allocations that went to the general heap.
    #[must_use]
    pub fn heap_fallbacks(&self) -> u64 {
        self.total_allocations.saturating_sub(self.pooled())
    }

    /// Allocations not yet matched by a release since the last reset.
    #[must_use]
    pub fn live_estimate(&self) -> i64 {
        self.total_allocations as i64 - self.total_releases as i64
    }
}

/// Point-in-time view of a pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub mode: PoolMode,
    pub counters: PoolCounters,
    pub tiny_free: usize,
    pub tiny_cells: usize,
    pub tiny_cell_size: usize,
    pub small_len: usize,
    pub small_capacity: usize,
    pub small_threshold: usize,
    pub medium_len: usize,
    pub medium_capacity: usize,
    pub medium_threshold: usize,
    /// Bytes currently held from the general heap, size headers included.
    pub outstanding_bytes: usize,
}

impl StatusSnapshot {
    /// Percentage of the tiny arena currently free.
    #[must_use]
    pub fn tiny_free_percent(&self) -> f64 {
        percent(self.tiny_free as u64, self.tiny_cells as u64)
    }

    /// One line describing where allocations were served from.
    #[must_use]
    pub fn allocation_ratio_line(&self) -> String {
        let c = &self.counters;
        if c.total_allocations == 0 {
            return "No allocations made yet.".to_string();
        }
        let total = c.total_allocations;
        format!(
            "Share of allocations: {:5.1}% <= {}b (tiny), {:5.1}% <= {}b (small), \
             {:5.1}% <= {}b (medium), {:5.1}% heap",
            percent(c.from_tiny, total),
            self.tiny_cell_size,
            percent(c.from_small, total),
            self.small_threshold,
            percent(c.from_medium, total),
            self.medium_threshold,
            percent(c.heap_fallbacks(), total),
        )
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.allocation_ratio_line())?;
        writeln!(
            f,
            "Pool sizes ({}): tiny {:5}/{} x {}b free ({:5.1}%), small {:5}/{} x {}b, medium {:5}/{} x {}b",
            self.mode.as_str(),
            self.tiny_free,
            self.tiny_cells,
            self.tiny_cell_size,
            self.tiny_free_percent(),
            self.small_len,
            self.small_capacity,
            self.small_threshold,
            self.medium_len,
            self.medium_capacity,
            self.medium_threshold,
        )?;
        writeln!(
            f,
            "Heap fallbacks: {}; outstanding heap bytes: {}",
            self.counters.heap_fallbacks(),
            self.outstanding_bytes
        )?;
        write!(
            f,
            "Small pool purges: {}; medium pool purges: {}; oom flushes: {}",
            self.counters.small_purges, self.counters.medium_purges, self.counters.oom_flushes
        )
    }
}
