//! Workload trace formats.
//!
//! A trace is a flat list of allocator operations keyed by caller-chosen
//! ids. Two encodings are supported:
//!
//! - JSON: `{"ops": [{"op": "alloc", "id": 0, "size": 512}, ...]}`
//! - text: one op per line, `a <id> <size>`, `f <id>`, `r <id> <size>`,
//!   `c <id> <count> <elem_size>`; blank lines and `#` comments are
//!   skipped.
//!
//! [`Trace::load`] picks the format by file extension (`.json` is JSON,
//! everything else is text).

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from loading or parsing a trace.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// One allocator operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TraceOp {
    Alloc { id: u64, size: usize },
    Free { id: u64 },
    Realloc { id: u64, size: usize },
    ZeroAlloc { id: u64, count: usize, elem_size: usize },
}

/// An ordered workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub ops: Vec<TraceOp>,
}

impl Trace {
    /// Parse the JSON encoding.
    pub fn from_json(text: &str) -> Result<Self, TraceError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse the line-oriented text encoding.
    pub fn from_text(text: &str) -> Result<Self, TraceError> {
        let mut ops = Vec::new();
        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            let parse = |field: &str| -> Result<usize, TraceError> {
                field.parse().map_err(|_| TraceError::Parse {
                    line,
                    message: format!("bad number {field:?}"),
                })
            };
            let op = match (fields[0], fields.len()) {
                ("a", 3) => TraceOp::Alloc {
                    id: parse(fields[1])? as u64,
                    size: parse(fields[2])?,
                },
                ("f", 2) => TraceOp::Free {
                    id: parse(fields[1])? as u64,
                },
                ("r", 3) => TraceOp::Realloc {
                    id: parse(fields[1])? as u64,
                    size: parse(fields[2])?,
                },
                ("c", 4) => TraceOp::ZeroAlloc {
                    id: parse(fields[1])? as u64,
                    count: parse(fields[2])?,
                    elem_size: parse(fields[3])?,
                },
                _ => {
                    return Err(TraceError::Parse {
                        line,
                        message: format!("unrecognized op line {trimmed:?}"),
                    });
                }
            };
            ops.push(op);
        }
        Ok(Self { ops })
    }

    /// Load from disk, picking the encoding by extension.
    pub fn load(path: &Path) -> Result<Self, TraceError> {
        let text = std::fs::read_to_string(path)?;
        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json(&text)
        } else {
            Self::from_text(&text)
        }
    }

    /// Render as the text encoding.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for op in &self.ops {
            let line = match *op {
                TraceOp::Alloc { id, size } => format!("a {id} {size}"),
                TraceOp::Free { id } => format!("f {id}"),
                TraceOp::Realloc { id, size } => format!("r {id} {size}"),
                TraceOp::ZeroAlloc {
                    id,
                    count,
                    elem_size,
                } => format!("c {id} {count} {elem_size}"),
            };
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}
