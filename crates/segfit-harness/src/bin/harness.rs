//! CLI entrypoint for the segfit workload harness.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use segfit_harness::runner::{RunOptions, TraceRunner};
use segfit_harness::storm::{self, StormConfig, StormKind};
use segfit_harness::structured_log::{LogEmitter, LogEntry, LogLevel};
use segfit_harness::trace::Trace;

/// Workload tooling for the segfit allocator.
#[derive(Debug, Parser)]
#[command(name = "segfit-harness")]
#[command(about = "Trace and storm workload harness for the segfit allocator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replay a workload trace against a fresh heap.
    Run {
        /// Trace file (.json, or line-oriented text ops).
        #[arg(long)]
        trace: PathBuf,
        /// Audit the heap every N operations.
        #[arg(long)]
        check_every: Option<usize>,
        /// Output path for the JSON run report (stdout if omitted).
        #[arg(long)]
        report: Option<PathBuf>,
        /// JSONL structured log path for allocator lifecycle records.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Print the final block map to stderr.
        #[arg(long)]
        dump: bool,
    },
    /// Generate and replay a deterministic storm workload.
    Storm {
        /// Storm shape: sawtooth, churn, or thrash.
        #[arg(long, default_value = "churn")]
        kind: String,
        #[arg(long, default_value_t = 1)]
        seed: u64,
        #[arg(long, default_value_t = 10_000)]
        ops: usize,
        #[arg(long, default_value_t = 64)]
        slots: usize,
        /// Audit the heap every N operations.
        #[arg(long)]
        check_every: Option<usize>,
        /// Output path for the JSON run report (stdout if omitted).
        #[arg(long)]
        report: Option<PathBuf>,
        /// Also write the generated trace here for later replay.
        #[arg(long)]
        emit_trace: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("harness: {err}");
            ExitCode::FAILURE
        }
    }
}

fn dispatch(command: Command) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Run {
            trace,
            check_every,
            report,
            log,
            dump,
        } => {
            let workload = Trace::load(&trace)?;
            let trace_id = trace
                .file_stem()
                .map_or_else(|| String::from("trace"), |s| s.to_string_lossy().into_owned());
            replay(&workload, &trace_id, check_every, report.as_deref(), log.as_deref(), dump)
        }
        Command::Storm {
            kind,
            seed,
            ops,
            slots,
            check_every,
            report,
            emit_trace,
        } => {
            let kind = StormKind::from_str_loose(&kind)
                .ok_or_else(|| format!("unknown storm kind {kind:?}"))?;
            let config = StormConfig {
                kind,
                seed,
                ops,
                slots,
                ..StormConfig::default()
            };
            let workload = storm::generate(config);
            if let Some(path) = emit_trace {
                std::fs::write(&path, workload.to_text())?;
            }
            let trace_id = format!("storm-{}-{seed}", kind.as_str());
            replay(&workload, &trace_id, check_every, report.as_deref(), None, false)
        }
    }
}

fn replay(
    workload: &Trace,
    trace_id: &str,
    check_every: Option<usize>,
    report_path: Option<&Path>,
    log_path: Option<&Path>,
    dump: bool,
) -> Result<(), Box<dyn Error>> {
    let options = RunOptions {
        check_every,
        verify_payloads: true,
    };
    let mut runner = TraceRunner::new(options)?;
    let outcome = runner.run(workload);

    if let Some(path) = log_path {
        let mut emitter = LogEmitter::file(path)?;
        for record in runner.drain_records() {
            let mut entry = LogEntry::new(trace_id, LogLevel::Debug, "heap_op")
                .with_op(op_name(record.op))
                .with_outcome(record.outcome);
            if let Some(offset) = record.block {
                entry = entry.with_offset(offset);
            }
            if let Some(size) = record.requested {
                entry = entry.with_size(size);
            }
            emitter.emit(&entry)?;
        }
        let summary = LogEntry::new(trace_id, LogLevel::Info, "run_complete").with_outcome(
            if outcome.is_ok() { "pass" } else { "fail" },
        );
        emitter.emit(&summary)?;
        emitter.flush()?;
    }

    if dump {
        eprint!("{}", runner.heap().dump());
    }

    let report = outcome?;
    let rendered = serde_json::to_string_pretty(&report)?;
    match report_path {
        Some(path) => std::fs::write(path, rendered)?,
        None => println!("{rendered}"),
    }
    Ok(())
}

fn op_name(op: segfit_core::HeapOp) -> &'static str {
    match op {
        segfit_core::HeapOp::Allocate => "allocate",
        segfit_core::HeapOp::Free => "free",
        segfit_core::HeapOp::Reallocate => "reallocate",
        segfit_core::HeapOp::ZeroAllocate => "zero_allocate",
        segfit_core::HeapOp::Extend => "extend",
    }
}
