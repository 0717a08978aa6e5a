//! Bounded reclaim pools for released small and medium blocks.
//!
//! A reclaim pool is an unordered, fixed-capacity cache of blocks that callers
//! released. Allocation scans it backwards (most recent releases first) and
//! takes the first block that is large enough; this favours the common churn
//! pattern where the block just released is requested again right away.
//!
//! When a search misses against a full pool, the pool is purged: every
//! even-indexed entry is evicted to the heap and the odd-indexed survivors are
//! compacted into the first half. The policy is not recency based; it simply
//! frees half of the capacity in one linear pass.

/// A released block cached for reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBlock {
    /// User address of the block (past its size header).
    pub addr: usize,
    /// Size recorded in the block's header when it was first allocated.
    pub bytes: usize,
}

impl MemoryBlock {
    #[must_use]
    pub const fn new(addr: usize, bytes: usize) -> Self {
        Self { addr, bytes }
    }
}

/// Result of a reclaim-pool search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeOutcome {
    /// A cached block satisfied the request.
    Hit(MemoryBlock),
    /// Nothing fit; the pool had room and was left untouched.
    Miss,
    /// Nothing fit and the pool was full, so it was purged. Carries the
    /// number of evicted blocks.
    MissPurged(usize),
}

/// Fixed-capacity cache of released blocks.
#[derive(Debug)]
pub struct ReclaimPool {
    entries: Vec<MemoryBlock>,
    capacity: usize,
}

impl ReclaimPool {
    /// Creates an empty pool. Storage for `capacity` entries is reserved up
    /// front so inserts never reallocate.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Remove and return the most recently inserted block holding at least
    /// `bytes`, or `None`.
    ///
    /// The matched entry is replaced by the last live entry (O(1) removal,
    /// order not preserved).
    pub fn take_first_fit(&mut self, bytes: usize) -> Option<MemoryBlock> {
        let idx = self.entries.iter().rposition(|block| block.bytes >= bytes)?;
        Some(self.entries.swap_remove(idx))
    }

    /// Search for a block and purge the pool if the search misses while the
    /// pool is full. Evicted blocks are handed to `evict`.
    pub fn take_or_purge<F>(&mut self, bytes: usize, evict: F) -> TakeOutcome
    where
        F: FnMut(MemoryBlock),
    {
        if let Some(block) = self.take_first_fit(bytes) {
            return TakeOutcome::Hit(block);
        }
        if self.is_full() && self.capacity > 0 {
            TakeOutcome::MissPurged(self.purge_half(evict))
        } else {
            TakeOutcome::Miss
        }
    }

    /// Cache `block` if there is room. Returns false when the pool is full.
    pub fn try_insert(&mut self, block: MemoryBlock) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries.push(block);
        true
    }

    /// Evict every even-indexed entry, compact the odd-indexed survivors into
    /// the first half, and return how many blocks were evicted.
    pub fn purge_half<F>(&mut self, mut evict: F) -> usize
    where
        F: FnMut(MemoryBlock),
    {
        let len = self.entries.len();
        for i in (0..len).step_by(2) {
            evict(self.entries[i]);
            if i + 1 < len {
                self.entries[i / 2] = self.entries[i + 1];
            }
        }
        self.entries.truncate(len / 2);
        len - len / 2
    }

    /// Evict everything. Used by out-of-memory recovery and teardown.
    pub fn flush<F>(&mut self, evict: F) -> usize
    where
        F: FnMut(MemoryBlock),
    {
        let evicted = self.entries.len();
        self.entries.drain(..).for_each(evict);
        evicted
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total recorded bytes currently cached.
    #[must_use]
    pub fn cached_bytes(&self) -> usize {
        self.entries.iter().map(|block| block.bytes).sum()
    }

    /// Cached blocks, oldest slot first.
    #[must_use]
    pub fn entries(&self) -> &[MemoryBlock] {
        &self.entries
    }
}
