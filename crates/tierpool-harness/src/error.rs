//! Harness error type.

use thiserror::Error;
use tierpool_core::PoolError;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("pool configuration: {0}")]
    Config(#[from] PoolError),
    #[error("unknown storm kind '{0}', expected churn|sawtooth|tiny-exhaustion|medium-thrash|aligned-mix")]
    UnknownStorm(String),
    #[error("storm observed {count} damaged blocks")]
    CorruptionDetected { count: u64 },
    #[error("{count} invalid lines in {path}")]
    InvalidLog { path: String, count: usize },
}
