//! Structured JSONL logs for storm runs.
//!
//! Provides:
//! - [`LogEntry`]: one JSONL record with required and optional fields.
//! - [`LogEmitter`]: writes JSONL lines to a file or an in-memory buffer.
//! - [`ArtifactIndex`]: lists run artifacts with SHA-256 digests.
//! - [`validate_log_line`] / [`validate_log_file`]: schema checks.
//!
//! Pool lifecycle records ([`PoolLogRecord`]) convert into entries so a run's
//! log interleaves harness events with the pool's own decisions.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::Digest;
use tierpool_core::{PoolLogLevel, PoolLogRecord};

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<PoolLogLevel> for LogLevel {
    fn from(level: PoolLogLevel) -> Self {
        match level {
            PoolLogLevel::Trace => Self::Trace,
            PoolLogLevel::Debug => Self::Debug,
            PoolLogLevel::Info => Self::Info,
            PoolLogLevel::Warn => Self::Warn,
            PoolLogLevel::Error => Self::Error,
        }
    }
}

/// Verdict of a harness step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Pass,
    Fail,
    Error,
}

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Pool mode (`pooled` or `passthrough`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Pool API symbol that produced the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    /// Pool-side outcome label (`purged`, `retry`, `null`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outstanding_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_refs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            run_id: None,
            mode: None,
            symbol: None,
            decision_id: None,
            size: None,
            pool_outcome: None,
            outstanding_bytes: None,
            outcome: None,
            duration_ms: None,
            artifact_refs: None,
            details: None,
        }
    }

    /// Entry mirroring a pool lifecycle record. The record's own trace id is
    /// kept so entries can be joined back to the pool.
    #[must_use]
    pub fn from_pool_record(record: &PoolLogRecord) -> Self {
        let mut entry = Self::new(&record.trace_id, record.level.into(), record.event)
            .with_symbol(record.symbol);
        entry.decision_id = Some(record.decision_id);
        entry.size = record.size;
        entry.pool_outcome = Some(record.outcome.to_string());
        entry.outstanding_bytes = Some(record.outstanding_bytes);
        if !record.details.is_empty() {
            entry.details = Some(serde_json::Value::String(record.details.clone()));
        }
        entry
    }

    #[must_use]
    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_artifacts(mut self, refs: Vec<String>) -> Self {
        self.artifact_refs = Some(refs);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Artifact index
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub path: String,
    pub kind: String,
    pub sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Index of the files a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactIndex {
    pub index_version: u32,
    pub run_id: String,
    pub generated_utc: String,
    pub artifacts: Vec<ArtifactEntry>,
}

impl ArtifactIndex {
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            index_version: 1,
            run_id: run_id.into(),
            generated_utc: now_utc(),
            artifacts: Vec::new(),
        }
    }

    /// Add an entry with a known digest.
    pub fn add(
        &mut self,
        path: impl Into<String>,
        kind: impl Into<String>,
        sha256: impl Into<String>,
    ) -> &mut Self {
        self.artifacts.push(ArtifactEntry {
            path: path.into(),
            kind: kind.into(),
            sha256: sha256.into(),
            size_bytes: None,
        });
        self
    }

    /// Hash `path` and add it.
    pub fn add_file(&mut self, path: &Path, kind: impl Into<String>) -> std::io::Result<&mut Self> {
        let data = std::fs::read(path)?;
        self.artifacts.push(ArtifactEntry {
            path: path.display().to_string(),
            kind: kind.into(),
            sha256: sha256_hex(&data),
            size_bytes: Some(data.len() as u64),
        });
        Ok(self)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Lowercase hex SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    use std::fmt::Write as _;
    let digest = sha2::Sha256::digest(data);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

// ---------------------------------------------------------------------------
// Log emitter
// ---------------------------------------------------------------------------

/// Writes structured JSONL log entries.
pub struct LogEmitter {
    writer: Box<dyn Write>,
    seq: u64,
    run_id: String,
    mode: Option<String>,
}

impl LogEmitter {
    /// Emitter writing to a new file at `path`.
    pub fn to_file(path: &Path, run_id: &str) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::with_writer(Box::new(std::io::BufWriter::new(file)), run_id))
    }

    /// Emitter writing into memory (for tests).
    #[must_use]
    pub fn to_buffer(run_id: &str) -> Self {
        Self::with_writer(Box::new(Vec::new()), run_id)
    }

    #[must_use]
    pub fn with_writer(writer: Box<dyn Write>, run_id: &str) -> Self {
        Self {
            writer,
            seq: 0,
            run_id: run_id.to_string(),
            mode: None,
        }
    }

    /// Stamp every subsequent entry with the pool mode.
    pub fn set_mode(&mut self, mode: &str) {
        self.mode = Some(mode.to_string());
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("tierpool-harness::{}::{:03}", self.run_id, self.seq)
    }

    /// Emit an entry with a generated trace id.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<LogEntry> {
        let trace_id = self.next_trace_id();
        let entry = LogEntry::new(trace_id, level, event);
        self.emit_entry(entry.clone())?;
        Ok(entry)
    }

    /// Emit a populated entry, filling in trace id, run id and mode if unset.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<()> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        if entry.run_id.is_none() {
            entry.run_id = Some(self.run_id.clone());
        }
        if entry.mode.is_none() {
            entry.mode.clone_from(&self.mode);
        }
        let line = entry.to_jsonl().map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")
    }

    /// Emit every pool lifecycle record in order.
    pub fn emit_pool_records(&mut self, records: &[PoolLogRecord]) -> std::io::Result<usize> {
        for record in records {
            self.emit_entry(LogEntry::from_pool_record(record))?;
        }
        Ok(records.len())
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validation error for a log line.
#[derive(Debug)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

/// Validate a single JSONL line against the schema.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let mut errors = Vec::new();
    let mut fail = |field: &str, message: String| {
        errors.push(LogValidationError {
            line_number,
            field: field.to_string(),
            message,
        });
    };

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            fail("<json>", format!("invalid JSON: {e}"));
            return Err(errors);
        }
    };
    let Some(obj) = value.as_object() else {
        fail("<root>", "expected JSON object".to_string());
        return Err(errors);
    };

    for field in ["timestamp", "trace_id", "level", "event"] {
        if !obj.contains_key(field) {
            fail(field, "required field missing".to_string());
        }
    }

    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !["trace", "debug", "info", "warn", "error"].contains(&level)
    {
        fail("level", format!("invalid level: '{level}'"));
    }

    if let Some(mode) = obj.get("mode").and_then(|v| v.as_str())
        && !["pooled", "passthrough"].contains(&mode)
    {
        fail("mode", format!("invalid mode: '{mode}'"));
    }

    if let Some(outcome) = obj.get("outcome").and_then(|v| v.as_str())
        && !["pass", "fail", "error"].contains(&outcome)
    {
        fail("outcome", format!("invalid outcome: '{outcome}'"));
    }

    // Pool records carry their decision id and a pool outcome together.
    if obj.contains_key("decision_id") && !obj.contains_key("pool_outcome") {
        fail(
            "pool_outcome",
            "pool lifecycle entries must include pool_outcome".to_string(),
        );
    }

    if let Some(trace_id) = obj.get("trace_id").and_then(|v| v.as_str())
        && !trace_id.contains("::")
    {
        fail(
            "trace_id",
            format!("trace_id should follow <source>::<scope>::<seq> format, got: '{trace_id}'"),
        );
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value::<LogEntry>(value).map_err(|e| {
        vec![LogValidationError {
            line_number,
            field: "<deserialization>".to_string(),
            message: format!("failed to deserialize: {e}"),
        }]
    })
}

/// Validate an entire JSONL file. Returns the non-empty line count and every
/// validation error found.
pub fn validate_log_file(path: &Path) -> Result<(usize, Vec<LogValidationError>), std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    let mut all_errors = Vec::new();
    let mut line_count = 0;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        line_count += 1;
        if let Err(errs) = validate_log_line(line, i + 1) {
            all_errors.extend(errs);
        }
    }

    Ok((line_count, all_errors))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Approximate UTC timestamp; good enough for ordering log lines.
pub(crate) fn now_utc() -> String {
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        1970 + secs / 31_557_600,
        (secs % 31_557_600) / 2_629_800 + 1,
        (secs % 2_629_800) / 86400 + 1,
        (secs % 86400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
        millis,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_record() -> PoolLogRecord {
        PoolLogRecord {
            decision_id: 7,
            trace_id: "tierpool::allocate::0000000000000007".to_string(),
            level: PoolLogLevel::Info,
            symbol: "allocate",
            event: "pool_purge",
            size: Some(400),
            outcome: "purged",
            details: "pool=small evicted=2".to_string(),
            outstanding_bytes: 1234,
        }
    }

    #[test]
    fn log_entry_serializes_required_fields_only() {
        let entry = LogEntry::new("tierpool-harness::run-1::001", LogLevel::Info, "storm_start");
        let parsed: serde_json::Value = serde_json::from_str(&entry.to_jsonl().unwrap()).unwrap();
        assert!(parsed["timestamp"].is_string());
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["event"], "storm_start");
        assert!(parsed.get("mode").is_none());
        assert!(parsed.get("decision_id").is_none());
    }

    #[test]
    fn pool_record_converts_with_its_trace_id() {
        let entry = LogEntry::from_pool_record(&pool_record());
        assert_eq!(entry.trace_id, "tierpool::allocate::0000000000000007");
        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.decision_id, Some(7));
        assert_eq!(entry.pool_outcome.as_deref(), Some("purged"));
        assert_eq!(entry.outstanding_bytes, Some(1234));
        let line = entry.to_jsonl().unwrap();
        assert!(validate_log_line(&line, 1).is_ok(), "{line}");
    }

    #[test]
    fn validate_rejects_unknown_mode_and_level() {
        let json = r#"{"timestamp":"t","trace_id":"a::b::c","level":"fatal","event":"x","mode":"strict"}"#;
        let errors = validate_log_line(json, 3).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "level"));
        assert!(errors.iter().any(|e| e.field == "mode"));
        assert!(errors.iter().all(|e| e.line_number == 3));
    }

    #[test]
    fn validate_requires_pool_outcome_with_decision_id() {
        let json = r#"{"timestamp":"t","trace_id":"a::b::c","level":"info","event":"x","decision_id":1}"#;
        let errors = validate_log_line(json, 1).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "pool_outcome"));
    }

    #[test]
    fn validate_missing_field_and_bad_json() {
        let errors = validate_log_line(r#"{"level":"info","event":"x"}"#, 1).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "trace_id"));
        assert!(errors.iter().any(|e| e.field == "timestamp"));
        let errors = validate_log_line("{not json", 2).unwrap_err();
        assert_eq!(errors[0].field, "<json>");
        let errors = validate_log_line("[1,2]", 2).unwrap_err();
        assert_eq!(errors[0].field, "<root>");
    }

    #[test]
    fn emitter_generates_sequential_trace_ids() {
        let mut emitter = LogEmitter::to_buffer("run-42");
        let e1 = emitter.emit(LogLevel::Info, "start").unwrap();
        let e2 = emitter.emit(LogLevel::Info, "end").unwrap();
        assert_eq!(e1.trace_id, "tierpool-harness::run-42::001");
        assert!(e2.trace_id.ends_with("::002"));
        assert_eq!(emitter.emit_pool_records(&[pool_record()]).unwrap(), 1);
    }

    #[test]
    fn sha256_of_empty_input() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn artifact_index_serializes() {
        let mut idx = ArtifactIndex::new("run-001");
        idx.add("storm.jsonl", "log", "abc123");
        let parsed: serde_json::Value = serde_json::from_str(&idx.to_json().unwrap()).unwrap();
        assert_eq!(parsed["index_version"], 1);
        assert_eq!(parsed["run_id"], "run-001");
        assert_eq!(parsed["artifacts"].as_array().unwrap().len(), 1);
    }
}
