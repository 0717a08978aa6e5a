//! Size classification.
//!
//! Three non-overlapping thresholds `T_tiny <= T_small <= T_medium` split
//! requests into classes. Allocation and release classify differently: a
//! request of at most `T_tiny` bytes is tiny, but a *block* whose recorded size
//! is at most `T_tiny` can only come from the heap path (the arena was
//! exhausted), so on release it belongs to the small pool.

use crate::config::PoolConfig;

/// One of the pool's size classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    /// Fixed-size cell in the preallocated arena.
    Tiny,
    /// Small reclaim pool.
    Small,
    /// Medium reclaim pool.
    Medium,
    /// Served by the general heap with a size header, never cached.
    Heap,
}

impl SizeClass {
    /// Class of an allocation request of `bytes`.
    #[must_use]
    pub fn for_request(bytes: usize, config: &PoolConfig) -> Self {
        if bytes <= config.tiny_cell_size {
            Self::Tiny
        } else {
            Self::for_recorded(bytes, config)
        }
    }

    /// Class of a heap-header block whose recorded size is `bytes`.
    #[must_use]
    pub fn for_recorded(bytes: usize, config: &PoolConfig) -> Self {
        if bytes <= config.small_threshold {
            Self::Small
        } else if bytes <= config.medium_threshold {
            Self::Medium
        } else {
            Self::Heap
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tiny => "tiny",
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Heap => "heap",
        }
    }
}
