//! Structured lifecycle records.
//!
//! The pool records notable decisions (purges, out-of-memory recovery, arena
//! exhaustion) as structured records rather than text. Records carry a
//! monotonic decision id and a `tierpool::<symbol>::<id>` trace id so they can
//! be joined with harness logs. The log is bounded: once `capacity` records
//! are held, the oldest is dropped and counted.

use std::collections::VecDeque;

/// Severity of a lifecycle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PoolLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl PoolLogLevel {
    /// Parse a level name (case-insensitive).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// One structured lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolLogRecord {
    /// Monotonic decision/event id, starting at 1.
    pub decision_id: u64,
    /// Correlation id for this record.
    pub trace_id: String,
    pub level: PoolLogLevel,
    /// API symbol (`allocate`, `release`, `reallocate`, `init`, ...).
    pub symbol: &'static str,
    /// Event kind (`pool_purge`, `oom_exhausted`, ...).
    pub event: &'static str,
    /// Size involved in the event, when there is one.
    pub size: Option<usize>,
    /// Machine-readable outcome label.
    pub outcome: &'static str,
    /// Free-form `key=value` details.
    pub details: String,
    /// Snapshot: bytes held from the general heap.
    pub outstanding_bytes: usize,
}

/// Bounded buffer of lifecycle records.
#[derive(Debug)]
pub struct EventLog {
    records: VecDeque<PoolLogRecord>,
    capacity: usize,
    min_level: PoolLogLevel,
    next_decision_id: u64,
    dropped: u64,
}

impl EventLog {
    #[must_use]
    pub fn new(min_level: PoolLogLevel, capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            min_level,
            next_decision_id: 1,
            dropped: 0,
        }
    }

    /// Returns true if records at `level` are kept.
    #[inline]
    #[must_use]
    pub fn enabled(&self, level: PoolLogLevel) -> bool {
        self.capacity > 0 && level >= self.min_level
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &mut self,
        level: PoolLogLevel,
        symbol: &'static str,
        event: &'static str,
        size: Option<usize>,
        outcome: &'static str,
        details: impl Into<String>,
        outstanding_bytes: usize,
    ) {
        if !self.enabled(level) {
            return;
        }
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        if self.records.len() >= self.capacity {
            self.records.pop_front();
            self.dropped += 1;
        }
        self.records.push_back(PoolLogRecord {
            decision_id,
            trace_id: format!("tierpool::{symbol}::{decision_id:016x}"),
            level,
            symbol,
            event,
            size,
            outcome,
            details: details.into(),
            outstanding_bytes,
        });
    }

    /// Copy of the retained records, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<PoolLogRecord> {
        self.records.iter().cloned().collect()
    }

    /// Remove and return the retained records, oldest first.
    pub fn drain(&mut self) -> Vec<PoolLogRecord> {
        self.records.drain(..).collect()
    }

    /// Records discarded because the log was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    #[must_use]
    pub fn min_level(&self) -> PoolLogLevel {
        self.min_level
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered_by_severity() {
        assert!(PoolLogLevel::Trace < PoolLogLevel::Debug);
        assert!(PoolLogLevel::Info < PoolLogLevel::Warn);
        assert!(PoolLogLevel::Warn < PoolLogLevel::Error);
    }

    #[test]
    fn parse_level_names() {
        assert_eq!(PoolLogLevel::parse("TRACE"), Some(PoolLogLevel::Trace));
        assert_eq!(PoolLogLevel::parse("warning"), Some(PoolLogLevel::Warn));
        assert_eq!(PoolLogLevel::parse(" error "), Some(PoolLogLevel::Error));
        assert_eq!(PoolLogLevel::parse("verbose"), None);
    }

    #[test]
    fn records_below_threshold_are_skipped() {
        let mut log = EventLog::new(PoolLogLevel::Info, 16);
        log.record(PoolLogLevel::Debug, "allocate", "tiny_arena_exhausted", Some(16), "fallthrough", "", 0);
        assert!(log.is_empty());
        log.record(PoolLogLevel::Warn, "allocate", "oom_flush_retry", Some(64), "retry", "", 0);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn records_carry_trace_and_decision_ids() {
        let mut log = EventLog::new(PoolLogLevel::Trace, 16);
        log.record(PoolLogLevel::Info, "allocate", "pool_purge", None, "purged", "pool=small", 10);
        log.record(PoolLogLevel::Info, "release", "pool_purge", None, "purged", "pool=medium", 20);
        let records = log.records();
        assert_eq!(records[0].decision_id, 1);
        assert_eq!(records[1].decision_id, 2);
        assert_eq!(records[0].trace_id, "tierpool::allocate::0000000000000001");
        assert!(records[1].trace_id.starts_with("tierpool::release::"));
        assert_eq!(records[1].outstanding_bytes, 20);
    }

    #[test]
    fn full_log_drops_oldest() {
        let mut log = EventLog::new(PoolLogLevel::Trace, 2);
        for _ in 0..5 {
            log.record(PoolLogLevel::Info, "allocate", "heap_fallback", Some(1), "success", "", 0);
        }
        assert_eq!(log.len(), 2);
        assert_eq!(log.dropped(), 3);
        let ids: Vec<u64> = log.drain().iter().map(|r| r.decision_id).collect();
        assert_eq!(ids, vec![4, 5]);
        assert!(log.is_empty());
    }

    #[test]
    fn zero_capacity_disables_logging() {
        let mut log = EventLog::new(PoolLogLevel::Trace, 0);
        assert!(!log.enabled(PoolLogLevel::Error));
        log.record(PoolLogLevel::Error, "allocate", "oom_exhausted", None, "null", "", 0);
        assert!(log.is_empty());
        assert_eq!(log.dropped(), 0);
    }
}
