//! Structured JSONL logging for harness runs.
//!
//! Provides:
//! - [`LogEntry`]: canonical JSONL record with required + optional
//!   fields.
//! - [`LogEmitter`]: writes JSONL lines to a file or stdout.
//! - [`validate_log_line`] / [`validate_log_file`]: schema checks for a
//!   line or a whole file.
//!
//! Required fields: `timestamp`, `trace_id`, `level`, `event`. The
//! optional fields carry allocator context (op, id, offset, size,
//! outcome) so log streams from different runs can be joined and
//! diffed.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Canonical structured log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,
    // Optional allocator context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub op: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// New entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_timestamp(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            op: None,
            id: None,
            offset: None,
            size: None,
            outcome: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Render as one JSONL line (no trailing newline).
    #[must_use]
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

/// Seconds-since-epoch timestamp with millisecond precision.
#[must_use]
pub fn now_timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:03}", now.as_secs(), now.subsec_millis())
}

/// Schema violations found by the validators.
#[derive(Debug, Error)]
pub enum LogSchemaError {
    #[error("line {line}: not valid JSON: {source}")]
    NotJson {
        line: usize,
        source: serde_json::Error,
    },
    #[error("line {line}: missing required field {field:?}")]
    MissingField { line: usize, field: &'static str },
    #[error("line {line}: field {field:?} has the wrong type")]
    WrongType { line: usize, field: &'static str },
}

/// Validate a single JSONL line against the schema.
pub fn validate_log_line(line_no: usize, line: &str) -> Result<(), LogSchemaError> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|source| LogSchemaError::NotJson {
            line: line_no,
            source,
        })?;
    for field in ["timestamp", "trace_id", "level", "event"] {
        match value.get(field) {
            None => return Err(LogSchemaError::MissingField {
                line: line_no,
                field,
            }),
            Some(v) if !v.is_string() => {
                return Err(LogSchemaError::WrongType {
                    line: line_no,
                    field,
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Validate every non-empty line of a JSONL log file.
pub fn validate_log_file(text: &str) -> Result<usize, LogSchemaError> {
    let mut validated = 0;
    for (index, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        validate_log_line(index + 1, line)?;
        validated += 1;
    }
    Ok(validated)
}

enum Sink {
    Stdout,
    File(BufWriter<File>),
}

/// Writes JSONL lines to a file or stdout.
pub struct LogEmitter {
    sink: Sink,
}

impl LogEmitter {
    /// Emitter writing to stdout.
    #[must_use]
    pub fn stdout() -> Self {
        Self { sink: Sink::Stdout }
    }

    /// Emitter writing (truncating) to a file.
    pub fn file(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            sink: Sink::File(BufWriter::new(File::create(path)?)),
        })
    }

    /// Write one entry as a JSONL line.
    pub fn emit(&mut self, entry: &LogEntry) -> std::io::Result<()> {
        let line = entry.to_json_line();
        match &mut self.sink {
            Sink::Stdout => {
                let stdout = std::io::stdout();
                let mut lock = stdout.lock();
                writeln!(lock, "{line}")
            }
            Sink::File(writer) => writeln!(writer, "{line}"),
        }
    }

    /// Flush any buffered output.
    pub fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.sink {
            Sink::Stdout => std::io::stdout().flush(),
            Sink::File(writer) => writer.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_serialize_without_absent_fields() {
        let entry = LogEntry::new("run-1", LogLevel::Info, "alloc")
            .with_op("allocate")
            .with_size(64)
            .with_outcome("ok");
        let line = entry.to_json_line();
        assert!(line.contains(r#""event":"alloc""#));
        assert!(line.contains(r#""size":64"#));
        assert!(!line.contains("details"), "absent optionals must be omitted");
        validate_log_line(1, &line).expect("schema-valid");
    }

    #[test]
    fn validator_rejects_missing_required_fields() {
        let err = validate_log_line(3, r#"{"timestamp":"1.000","level":"info","event":"x"}"#)
            .expect_err("missing trace_id");
        assert!(matches!(
            err,
            LogSchemaError::MissingField {
                line: 3,
                field: "trace_id"
            }
        ));
    }

    #[test]
    fn validator_rejects_non_json() {
        let err = validate_log_line(1, "not json").expect_err("not json");
        assert!(matches!(err, LogSchemaError::NotJson { line: 1, .. }));
    }

    #[test]
    fn validates_whole_files_and_skips_blanks() {
        let a = LogEntry::new("run", LogLevel::Debug, "one").to_json_line();
        let b = LogEntry::new("run", LogLevel::Warn, "two").to_json_line();
        let text = format!("{a}\n\n{b}\n");
        assert_eq!(validate_log_file(&text).expect("valid"), 2);
    }
}
