//! # tierpool
//!
//! Size-classed pool allocator with general-heap fallback.
//!
//! Small requests are served from a preallocated tiny arena and two bounded
//! caches of released blocks; everything else goes to the system heap with a
//! hidden size header. The crate is organised as:
//! - [`guard`]: non-reentrant spin guard protecting pool bookkeeping
//! - [`heap`]: the [`SystemHeap`] backend trait and [`LibcHeap`]
//! - [`header`]: hidden size header arithmetic
//! - [`pool`]: [`TieredPool`], the allocate/release/reallocate core
//! - [`oom`]: flush-retry-notify recovery when the heap is exhausted
//! - [`aligned`]: power-of-two alignment via over-allocation
//! - [`block`]: [`PoolBlock`], a safe owning handle to one block
//! - [`facade`]: [`PoolAllocator`] handle with lazy init, and the process-wide instance
//! - [`resource`]: memory-resource adapter
//!
//! Bookkeeping types (configuration, free list, reclaim pools, counters,
//! lifecycle records) come from `tierpool-core` and are re-exported here.

pub mod aligned;
pub mod block;
pub mod facade;
pub mod guard;
pub mod header;
pub mod heap;
pub mod oom;
pub mod pool;
pub mod raw;
pub mod resource;

pub use aligned::{aligned_allocate, aligned_release};
pub use block::PoolBlock;
pub use facade::{PoolAllocator, global};
pub use guard::{SpinGuard, SpinGuardLock};
pub use heap::{LibcHeap, SystemHeap};
pub use oom::{OomHandlerSlot, OutOfMemoryHandler};
pub use pool::TieredPool;
pub use raw::RawAllocator;
pub use resource::PoolResource;

pub use tierpool_core::{
    PoolConfig, PoolCounters, PoolError, PoolLogLevel, PoolLogRecord, PoolMode, SizeClass,
    SpinPolicy, StatusSnapshot,
};
