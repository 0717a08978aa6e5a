//! Serializable status reports.

use serde::{Deserialize, Serialize};
use tierpool_core::StatusSnapshot;

/// Machine-readable mirror of a pool [`StatusSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub mode: String,
    pub total_allocations: u64,
    pub failed_allocations: u64,
    pub total_releases: u64,
    pub from_tiny: u64,
    pub from_small: u64,
    pub from_medium: u64,
    pub heap_fallbacks: u64,
    pub tiny_exhaustions: u64,
    pub small_purges: u64,
    pub medium_purges: u64,
    pub oom_flushes: u64,
    pub tiny_free: usize,
    pub tiny_cells: usize,
    pub tiny_free_percent: f64,
    pub small_cached: usize,
    pub small_capacity: usize,
    pub medium_cached: usize,
    pub medium_capacity: usize,
    pub outstanding_bytes: usize,
    /// The four-line human summary, one entry per line.
    pub summary: Vec<String>,
}

impl From<&StatusSnapshot> for StatusReport {
    fn from(snap: &StatusSnapshot) -> Self {
        let c = &snap.counters;
        Self {
            mode: snap.mode.as_str().to_string(),
            total_allocations: c.total_allocations,
            failed_allocations: c.failed_allocations,
            total_releases: c.total_releases,
            from_tiny: c.from_tiny,
            from_small: c.from_small,
            from_medium: c.from_medium,
            heap_fallbacks: c.heap_fallbacks(),
            tiny_exhaustions: c.tiny_exhaustions,
            small_purges: c.small_purges,
            medium_purges: c.medium_purges,
            oom_flushes: c.oom_flushes,
            tiny_free: snap.tiny_free,
            tiny_cells: snap.tiny_cells,
            tiny_free_percent: snap.tiny_free_percent(),
            small_cached: snap.small_len,
            small_capacity: snap.small_capacity,
            medium_cached: snap.medium_len,
            medium_capacity: snap.medium_capacity,
            outstanding_bytes: snap.outstanding_bytes,
            summary: snap.to_string().lines().map(str::to_string).collect(),
        }
    }
}

impl StatusReport {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
