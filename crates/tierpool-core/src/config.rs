//! Pool tuning configuration.
//!
//! Every threshold and capacity is configuration rather than a constant. The
//! defaults reproduce the classic buffer-pool tuning:
//!
//! | class  | threshold | cached blocks |
//! |--------|-----------|---------------|
//! | tiny   | 256 B     | 250 000 cells (preallocated, 64 MB) |
//! | small  | 2 KB      | 40 000 (allocated on demand) |
//! | medium | 8 KB      | 5 000 (allocated on demand) |
//!
//! Overrides come from `TIERPOOL_*` environment variables (see
//! [`PoolConfig::from_env`]). The mode variable `TIERPOOL_MODE` accepts:
//! - `pooled` (default): tiny arena + reclaim pools + heap fallback.
//! - `passthrough`: every request goes to the system heap with a size header.

use crate::error::PoolError;
use crate::log::PoolLogLevel;

/// Alignment of the hidden size header and of every tiny cell.
///
/// Heap-fallback blocks are returned this many bytes past the start of the
/// system allocation, so user pointers keep the system allocator's alignment.
pub const HEADER_ALIGN: usize = 16;

/// Operating mode of the pool.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolMode {
    /// Size-classed reuse with heap fallback.
    #[default]
    Pooled,
    /// No reuse at all. Baseline for benchmarking and for ruling the pool out
    /// when chasing memory bugs.
    Passthrough,
}

impl PoolMode {
    /// Parse from string (case-insensitive). Unknown strings select `Pooled`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "passthrough" | "off" | "none" | "disabled" => Self::Passthrough,
            _ => Self::Pooled,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pooled => "pooled",
            Self::Passthrough => "passthrough",
        }
    }

    /// Returns true if released blocks may be kept for reuse.
    #[must_use]
    pub const fn pooling_enabled(self) -> bool {
        matches!(self, Self::Pooled)
    }
}

/// Busy-wait behaviour of the pool's spin guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpinPolicy {
    /// Number of `spin_loop` hints issued while the guard is contended before
    /// the waiting thread yields its time slice. Zero yields immediately.
    pub spins_before_yield: u32,
}

impl Default for SpinPolicy {
    fn default() -> Self {
        Self {
            spins_before_yield: 64,
        }
    }
}

/// Complete tuning of a tiered pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Size of one tiny cell; also the tiny-class threshold (T_tiny).
    pub tiny_cell_size: usize,
    /// Number of cells preallocated in the tiny arena. Zero disables the arena.
    pub tiny_cells: usize,
    /// Largest request served by the small reclaim pool (T_small).
    pub small_threshold: usize,
    /// Maximum number of blocks cached by the small reclaim pool.
    pub small_capacity: usize,
    /// Largest request served by the medium reclaim pool (T_medium).
    pub medium_threshold: usize,
    /// Maximum number of blocks cached by the medium reclaim pool.
    pub medium_capacity: usize,
    pub spin: SpinPolicy,
    pub mode: PoolMode,
    /// Lowest severity kept by the lifecycle log.
    pub log_level: PoolLogLevel,
    /// Maximum number of lifecycle records retained.
    pub log_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            tiny_cell_size: 256,
            tiny_cells: 250_000,
            small_threshold: 2048,
            small_capacity: 40_000,
            medium_threshold: 8192,
            medium_capacity: 5_000,
            spin: SpinPolicy::default(),
            mode: PoolMode::Pooled,
            log_level: PoolLogLevel::Info,
            log_capacity: 1024,
        }
    }
}

const ENV_MODE: &str = "TIERPOOL_MODE";
const ENV_TINY_CELL_SIZE: &str = "TIERPOOL_TINY_CELL_SIZE";
const ENV_TINY_CELLS: &str = "TIERPOOL_TINY_CELLS";
const ENV_SMALL_THRESHOLD: &str = "TIERPOOL_SMALL_THRESHOLD";
const ENV_SMALL_CAPACITY: &str = "TIERPOOL_SMALL_CAPACITY";
const ENV_MEDIUM_THRESHOLD: &str = "TIERPOOL_MEDIUM_THRESHOLD";
const ENV_MEDIUM_CAPACITY: &str = "TIERPOOL_MEDIUM_CAPACITY";
const ENV_SPINS_BEFORE_YIELD: &str = "TIERPOOL_SPINS_BEFORE_YIELD";
const ENV_LOG_LEVEL: &str = "TIERPOOL_LOG_LEVEL";

impl PoolConfig {
    /// Read overrides from the process environment.
    pub fn from_env() -> Result<Self, PoolError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from the defaults plus whatever `lookup` returns
    /// for the `TIERPOOL_*` variables, then validate it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PoolError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_MODE) {
            config.mode = PoolMode::from_str_loose(&raw);
        }
        override_usize(&lookup, ENV_TINY_CELL_SIZE, &mut config.tiny_cell_size)?;
        override_usize(&lookup, ENV_TINY_CELLS, &mut config.tiny_cells)?;
        override_usize(&lookup, ENV_SMALL_THRESHOLD, &mut config.small_threshold)?;
        override_usize(&lookup, ENV_SMALL_CAPACITY, &mut config.small_capacity)?;
        override_usize(&lookup, ENV_MEDIUM_THRESHOLD, &mut config.medium_threshold)?;
        override_usize(&lookup, ENV_MEDIUM_CAPACITY, &mut config.medium_capacity)?;
        if let Some(raw) = lookup(ENV_SPINS_BEFORE_YIELD) {
            config.spin.spins_before_yield =
                raw.trim().parse().map_err(|_| PoolError::InvalidEnvValue {
                    var: ENV_SPINS_BEFORE_YIELD,
                    value: raw.clone(),
                })?;
        }
        if let Some(raw) = lookup(ENV_LOG_LEVEL) {
            config.log_level =
                PoolLogLevel::parse(&raw).ok_or_else(|| PoolError::InvalidEnvValue {
                    var: ENV_LOG_LEVEL,
                    value: raw.clone(),
                })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Check the structural invariants every pool relies on.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.tiny_cell_size > self.small_threshold
            || self.small_threshold > self.medium_threshold
        {
            return Err(PoolError::ThresholdOrder {
                tiny: self.tiny_cell_size,
                small: self.small_threshold,
                medium: self.medium_threshold,
            });
        }
        if self.tiny_cell_size == 0 || self.tiny_cell_size % HEADER_ALIGN != 0 {
            return Err(PoolError::CellSizeMisaligned {
                cell_size: self.tiny_cell_size,
                align: HEADER_ALIGN,
            });
        }
        self.tiny_arena_bytes()?;
        Ok(())
    }

    /// Total size of the tiny arena in bytes.
    pub fn tiny_arena_bytes(&self) -> Result<usize, PoolError> {
        self.tiny_cells
            .checked_mul(self.tiny_cell_size)
            .filter(|&bytes| bytes <= isize::MAX as usize)
            .ok_or(PoolError::ArenaOverflow {
                cells: self.tiny_cells,
                cell_size: self.tiny_cell_size,
            })
    }

    /// Same tuning without a tiny arena. Used when the arena cannot be
    /// preallocated.
    #[must_use]
    pub fn without_tiny_arena(&self) -> Self {
        Self {
            tiny_cells: 0,
            ..self.clone()
        }
    }
}

fn override_usize<F>(lookup: &F, var: &'static str, slot: &mut usize) -> Result<(), PoolError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(var) else {
        return Ok(());
    };
    *slot = parse_size(&raw).ok_or(PoolError::InvalidEnvValue { var, value: raw })?;
    Ok(())
}

/// Accepts plain decimal, `0x` hex, and `_` digit separators.
fn parse_size(raw: &str) -> Option<usize> {
    let cleaned: String = raw.trim().chars().filter(|&c| c != '_').collect();
    if let Some(hex) = cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        usize::from_str_radix(hex, 16).ok()
    } else {
        cleaned.parse().ok()
    }
}
