//! Storm harness for tierpool.
//!
//! This crate provides:
//! - Storm workloads: multi-threaded allocation patterns with damage checks
//! - Status reports: machine-readable mirror of the pool's status summary
//! - Structured logs: JSONL records, artifact indexes and their validation

#![forbid(unsafe_code)]

pub mod error;
pub mod report;
pub mod structured_log;
pub mod workload;

pub use error::HarnessError;
pub use report::StatusReport;
pub use structured_log::{ArtifactIndex, LogEmitter, LogEntry, LogLevel, Outcome};
pub use workload::{StormConfig, StormKind, StormReport, run_storm};
