//! Error taxonomy for pool configuration.
//!
//! Exhaustion is not an error in this crate family: allocation paths report it
//! as a missing pointer. Only contract violations detected while building a
//! pool end up here.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error(
        "size thresholds must satisfy tiny ({tiny}) <= small ({small}) <= medium ({medium})"
    )]
    ThresholdOrder {
        tiny: usize,
        small: usize,
        medium: usize,
    },
    #[error("tiny cell size {cell_size} is not a non-zero multiple of {align}")]
    CellSizeMisaligned { cell_size: usize, align: usize },
    #[error("tiny arena of {cells} cells x {cell_size} bytes overflows the address space")]
    ArenaOverflow { cells: usize, cell_size: usize },
    #[error("environment variable {var} has invalid value '{value}'")]
    InvalidEnvValue { var: &'static str, value: String },
}
