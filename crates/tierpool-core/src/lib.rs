//! # tierpool-core
//!
//! Safe bookkeeping for the tierpool allocator.
//!
//! Everything in this crate works on plain addresses (`usize`) and sizes; it
//! never touches the memory behind them. The `tierpool` crate owns the real
//! memory and drives these structures under its spin guard:
//! - [`TinyFreeList`]: free list over the fixed-size cells of the tiny arena
//! - [`ReclaimPool`]: bounded cache of released small/medium blocks
//! - [`PoolCounters`] / [`StatusSnapshot`]: statistics and status rendering
//! - [`EventLog`]: bounded structured lifecycle records
//! - [`PoolConfig`]: tuning constants, validation and environment overrides

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod free_list;
pub mod log;
pub mod reclaim;
pub mod size_class;
pub mod stats;

pub use config::{HEADER_ALIGN, PoolConfig, PoolMode, SpinPolicy};
pub use error::PoolError;
pub use free_list::TinyFreeList;
pub use log::{EventLog, PoolLogLevel, PoolLogRecord};
pub use reclaim::{MemoryBlock, ReclaimPool, TakeOutcome};
pub use size_class::SizeClass;
pub use stats::{PoolCounters, StatusSnapshot};
