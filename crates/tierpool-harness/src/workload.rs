//! Multi-threaded allocation storms.
//!
//! Each storm drives a [`PoolAllocator`] from several threads through
//! [`PoolBlock`] handles. Every live block is filled with a tag byte unique to
//! its owner; the tag is checked before the block is resized or dropped, so
//! a block handed to two owners at once shows up as damage.

use std::sync::Barrier;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tierpool::{PoolAllocator, PoolBlock, SystemHeap};
use tierpool_core::PoolConfig;

use crate::error::HarnessError;
use crate::report::StatusReport;

/// Shape of the request stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StormKind {
    /// Random sizes across every class with random release and resize.
    Churn,
    /// Ramp up to a full slot table, then release everything.
    Sawtooth,
    /// Hold tiny blocks until the arena runs dry. Nothing is released until
    /// every thread has finished allocating.
    TinyExhaustion,
    /// Medium-class traffic past the medium pool's capacity.
    MediumThrash,
    /// Aligned allocations with mixed alignments.
    AlignedMix,
}

impl StormKind {
    pub const ALL: [Self; 5] = [
        Self::Churn,
        Self::Sawtooth,
        Self::TinyExhaustion,
        Self::MediumThrash,
        Self::AlignedMix,
    ];

    pub fn parse(s: &str) -> Result<Self, HarnessError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "churn" => Ok(Self::Churn),
            "sawtooth" => Ok(Self::Sawtooth),
            "tiny-exhaustion" | "tiny" => Ok(Self::TinyExhaustion),
            "medium-thrash" | "medium" => Ok(Self::MediumThrash),
            "aligned-mix" | "aligned" => Ok(Self::AlignedMix),
            _ => Err(HarnessError::UnknownStorm(s.to_string())),
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Churn => "churn",
            Self::Sawtooth => "sawtooth",
            Self::TinyExhaustion => "tiny-exhaustion",
            Self::MediumThrash => "medium-thrash",
            Self::AlignedMix => "aligned-mix",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StormConfig {
    pub kind: StormKind,
    pub threads: usize,
    /// Operations per thread.
    pub ops: usize,
    /// Live blocks each thread may hold.
    pub slots: usize,
    pub seed: u64,
}

impl StormConfig {
    #[must_use]
    pub fn new(kind: StormKind) -> Self {
        Self {
            kind,
            threads: 4,
            ops: 10_000,
            slots: 64,
            seed: 0x7149_0001,
        }
    }
}

/// Outcome of one storm run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StormReport {
    pub kind: StormKind,
    pub threads: usize,
    pub ops_per_thread: usize,
    pub seed: u64,
    pub allocations: u64,
    pub releases: u64,
    pub resizes: u64,
    /// Requests the pool answered with no block.
    pub failures: u64,
    /// Blocks whose tag bytes changed while owned.
    pub corruptions: u64,
    pub elapsed_ms: u64,
    pub status: StatusReport,
}

#[derive(Debug, Default, Clone, Copy)]
struct ThreadTally {
    allocations: u64,
    releases: u64,
    resizes: u64,
    failures: u64,
    corruptions: u64,
}

impl ThreadTally {
    fn merge(&mut self, other: Self) {
        self.allocations += other.allocations;
        self.releases += other.releases;
        self.resizes += other.resizes;
        self.failures += other.failures;
        self.corruptions += other.corruptions;
    }
}

/// xorshift64* generator; deterministic per seed.
#[derive(Debug, Clone)]
pub struct XorShift64(u64);

impl XorShift64 {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self(if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed })
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform-ish value in `lo..=hi`.
    pub fn gen_range_usize(&mut self, lo: usize, hi: usize) -> usize {
        if hi <= lo {
            return lo;
        }
        lo + (self.next_u64() % ((hi - lo) as u64 + 1)) as usize
    }
}

/// A block plus the tag its owner wrote into it.
struct Tagged<'a, A: tierpool::RawAllocator + ?Sized> {
    block: PoolBlock<'a, A>,
    tag: u8,
}

impl<'a, A: tierpool::RawAllocator + ?Sized> Tagged<'a, A> {
    fn new(mut block: PoolBlock<'a, A>, tag: u8) -> Self {
        block.fill(tag);
        Self { block, tag }
    }

    fn intact(&self) -> bool {
        self.block.as_slice().iter().all(|&b| b == self.tag)
    }
}

fn retire<A: tierpool::RawAllocator + ?Sized>(tagged: Tagged<'_, A>, tally: &mut ThreadTally) {
    if !tagged.intact() {
        tally.corruptions += 1;
    }
    tally.releases += 1;
}

/// Run one storm against `alloc` and report what happened.
pub fn run_storm<H: SystemHeap + Clone>(
    alloc: &PoolAllocator<H>,
    config: &StormConfig,
) -> Result<StormReport, HarnessError> {
    let pool = alloc.try_pool().map_err(Clone::clone)?;
    let pool_config = pool.config().clone();
    let threads = config.threads.max(1);
    let started = Instant::now();

    // Blocks are retired only once every thread has finished allocating.
    let drained = Barrier::new(threads);
    let mut total = ThreadTally::default();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let pool_config = &pool_config;
                let drained = &drained;
                let seed = config.seed ^ (t as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
                scope.spawn(move || run_thread(alloc, pool_config, config, t, seed, drained))
            })
            .collect();
        for handle in handles {
            match handle.join() {
                Ok(tally) => total.merge(tally),
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
    });

    let snapshot = pool.snapshot();

    Ok(StormReport {
        kind: config.kind,
        threads,
        ops_per_thread: config.ops,
        seed: config.seed,
        allocations: total.allocations,
        releases: total.releases,
        resizes: total.resizes,
        failures: total.failures,
        corruptions: total.corruptions,
        elapsed_ms: started.elapsed().as_millis() as u64,
        status: StatusReport::from(&snapshot),
    })
}

fn run_thread<H: SystemHeap + Clone>(
    alloc: &PoolAllocator<H>,
    pool: &PoolConfig,
    config: &StormConfig,
    thread: usize,
    seed: u64,
    drained: &Barrier,
) -> ThreadTally {
    let mut rng = XorShift64::new(seed);
    let mut tally = ThreadTally::default();
    let mut slots: Vec<Option<Tagged<'_, PoolAllocator<H>>>> = Vec::new();
    slots.resize_with(config.slots.max(1), || None);
    let mut generation: u8 = (thread as u8).wrapping_mul(37);
    let mut next_tag = || {
        generation = generation.wrapping_add(1);
        generation | 1
    };

    for op in 0..config.ops {
        match config.kind {
            StormKind::Churn => {
                let i = rng.gen_range_usize(0, slots.len() - 1);
                let bytes = rng.gen_range_usize(1, pool.medium_threshold * 2);
                match slots[i].take() {
                    None => {
                        tally.allocations += 1;
                        match PoolBlock::allocate(alloc, bytes) {
                            Some(b) => slots[i] = Some(Tagged::new(b, next_tag())),
                            None => tally.failures += 1,
                        }
                    }
                    Some(tagged) if rng.next_u64() % 3 == 0 => {
                        if !tagged.intact() {
                            tally.corruptions += 1;
                        }
                        tally.resizes += 1;
                        let tag = tagged.tag;
                        match tagged.block.resize(bytes) {
                            Ok(b) => slots[i] = Some(Tagged::new(b, tag)),
                            Err(b) => {
                                tally.failures += 1;
                                slots[i] = Some(Tagged { block: b, tag });
                            }
                        }
                    }
                    Some(tagged) => retire(tagged, &mut tally),
                }
            }
            StormKind::Sawtooth => {
                let i = op % slots.len();
                if let Some(tagged) = slots[i].take() {
                    retire(tagged, &mut tally);
                }
                if (op / slots.len()) % 2 == 0 {
                    let bytes = rng.gen_range_usize(1, pool.small_threshold);
                    tally.allocations += 1;
                    match PoolBlock::allocate(alloc, bytes) {
                        Some(b) => slots[i] = Some(Tagged::new(b, next_tag())),
                        None => tally.failures += 1,
                    }
                }
            }
            StormKind::TinyExhaustion => {
                // Grow the table as needed; blocks are only dropped at the end.
                let bytes = rng.gen_range_usize(1, pool.tiny_cell_size);
                tally.allocations += 1;
                match PoolBlock::allocate(alloc, bytes) {
                    Some(b) => slots.push(Some(Tagged::new(b, next_tag()))),
                    None => tally.failures += 1,
                }
            }
            StormKind::MediumThrash => {
                let i = rng.gen_range_usize(0, slots.len() - 1);
                if let Some(tagged) = slots[i].take() {
                    retire(tagged, &mut tally);
                }
                let bytes = rng.gen_range_usize(pool.small_threshold + 1, pool.medium_threshold);
                tally.allocations += 1;
                match PoolBlock::allocate(alloc, bytes) {
                    Some(b) => slots[i] = Some(Tagged::new(b, next_tag())),
                    None => tally.failures += 1,
                }
            }
            StormKind::AlignedMix => {
                let i = rng.gen_range_usize(0, slots.len() - 1);
                match slots[i].take() {
                    Some(tagged) => retire(tagged, &mut tally),
                    None => {
                        let alignment = 1usize << rng.gen_range_usize(3, 12);
                        let bytes = rng.gen_range_usize(1, pool.medium_threshold);
                        tally.allocations += 1;
                        match PoolBlock::aligned(alloc, bytes, alignment) {
                            Some(b) => {
                                if b.as_ptr().addr() % alignment != 0 {
                                    tally.corruptions += 1;
                                }
                                slots[i] = Some(Tagged::new(b, next_tag()));
                            }
                            None => tally.failures += 1,
                        }
                    }
                }
            }
        }
    }

    drained.wait();
    for tagged in slots.into_iter().flatten() {
        retire(tagged, &mut tally);
    }
    tally
}
