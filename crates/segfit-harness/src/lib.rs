//! Workload harness for the segfit allocator.
//!
//! This crate provides:
//! - Trace formats: JSON and line-oriented text workload scripts
//! - Trace replay: run a workload against a live heap with payload
//!   integrity verification and optional periodic audits
//! - Storm generation: deterministic pressure workloads rendered as
//!   ordinary traces
//! - Structured logging: JSONL emission + schema validation

#![forbid(unsafe_code)]

pub mod runner;
pub mod storm;
pub mod structured_log;
pub mod trace;

pub use runner::{RunError, RunOptions, RunReport, TraceRunner};
pub use storm::{StormConfig, StormKind, generate};
pub use structured_log::{LogEmitter, LogEntry, LogLevel};
pub use trace::{Trace, TraceError, TraceOp};
