//! Trace replay against a live heap.
//!
//! The runner binds trace ids to live blocks, fills every allocation
//! with a per-id byte pattern, and verifies the pattern just before the
//! block is freed or moved — any allocator bug that hands out
//! overlapping blocks shows up as a payload corruption error here, not
//! as a silent pass.

use std::collections::HashMap;

use segfit_core::{BlockRef, Heap, HeapError, HeapStats};
use serde::Serialize;
use thiserror::Error;

use crate::trace::{Trace, TraceOp};

/// Errors from replaying a trace.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("heap: {0}")]
    Heap(#[from] HeapError),
    #[error("op {index}: id {id} is already live")]
    DuplicateId { index: usize, id: u64 },
    #[error("op {index}: id {id} is not live")]
    UnknownId { index: usize, id: u64 },
    #[error("op {index}: allocation of {size} bytes failed")]
    AllocationFailed { index: usize, size: usize },
    #[error("op {index}: payload of id {id} was corrupted")]
    PayloadCorrupted { index: usize, id: u64 },
    #[error("op {index}: audit reported {count} findings")]
    AuditFailed { index: usize, count: usize },
}

/// Replay options.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Audit the heap every N operations (and once at the end).
    pub check_every: Option<usize>,
    /// Fill and verify payload patterns.
    pub verify_payloads: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            check_every: None,
            verify_payloads: true,
        }
    }
}

/// Summary of one replay.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub ops_executed: usize,
    pub allocations: usize,
    pub frees: usize,
    pub reallocations: usize,
    pub zero_allocations: usize,
    pub audits_run: usize,
    pub max_live_blocks: usize,
    pub final_stats: HeapStats,
}

struct LiveEntry {
    ptr: BlockRef,
    pattern: u8,
    filled: usize,
}

/// Replays traces against a heap it owns.
pub struct TraceRunner {
    heap: Heap,
    live: HashMap<u64, LiveEntry>,
    options: RunOptions,
}

impl TraceRunner {
    /// Runner over a fresh default heap.
    pub fn new(options: RunOptions) -> Result<Self, HeapError> {
        Ok(Self::with_heap(Heap::new()?, options))
    }

    /// Runner over a caller-configured heap.
    #[must_use]
    pub fn with_heap(heap: Heap, options: RunOptions) -> Self {
        Self {
            heap,
            live: HashMap::new(),
            options,
        }
    }

    /// The underlying heap.
    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Drain the heap's lifecycle records.
    pub fn drain_records(&mut self) -> Vec<segfit_core::LifecycleRecord> {
        self.heap.drain_records()
    }

    fn pattern_for(id: u64) -> u8 {
        (id % 251 + 1) as u8
    }

    fn bind(&mut self, index: usize, id: u64, ptr: BlockRef) -> Result<(), RunError> {
        let pattern = Self::pattern_for(id);
        let filled = if self.options.verify_payloads {
            let payload = self.heap.payload_mut(ptr);
            payload.fill(pattern);
            payload.len()
        } else {
            0
        };
        if self
            .live
            .insert(
                id,
                LiveEntry {
                    ptr,
                    pattern,
                    filled,
                },
            )
            .is_some()
        {
            return Err(RunError::DuplicateId { index, id });
        }
        Ok(())
    }

    fn verify(&self, index: usize, id: u64, entry: &LiveEntry) -> Result<(), RunError> {
        if !self.options.verify_payloads {
            return Ok(());
        }
        let payload = self.heap.payload(entry.ptr);
        if payload[..entry.filled].iter().all(|&b| b == entry.pattern) {
            Ok(())
        } else {
            Err(RunError::PayloadCorrupted { index, id })
        }
    }

    /// Replay `trace` from the heap's current state.
    pub fn run(&mut self, trace: &Trace) -> Result<RunReport, RunError> {
        let mut report = RunReport {
            ops_executed: 0,
            allocations: 0,
            frees: 0,
            reallocations: 0,
            zero_allocations: 0,
            audits_run: 0,
            max_live_blocks: 0,
            final_stats: self.heap.stats(),
        };

        for (index, &op) in trace.ops.iter().enumerate() {
            match op {
                TraceOp::Alloc { id, size } => {
                    if self.live.contains_key(&id) {
                        return Err(RunError::DuplicateId { index, id });
                    }
                    report.allocations += 1;
                    match self.heap.allocate(size) {
                        Some(ptr) => self.bind(index, id, ptr)?,
                        None if size == 0 => {}
                        None => return Err(RunError::AllocationFailed { index, size }),
                    }
                }
                TraceOp::Free { id } => {
                    let entry = self
                        .live
                        .remove(&id)
                        .ok_or(RunError::UnknownId { index, id })?;
                    self.verify(index, id, &entry)?;
                    report.frees += 1;
                    self.heap.free(Some(entry.ptr));
                }
                TraceOp::Realloc { id, size } => {
                    let entry = self
                        .live
                        .remove(&id)
                        .ok_or(RunError::UnknownId { index, id })?;
                    self.verify(index, id, &entry)?;
                    report.reallocations += 1;
                    match self.heap.reallocate(Some(entry.ptr), size) {
                        Some(ptr) => self.bind(index, id, ptr)?,
                        None if size == 0 => {}
                        None => return Err(RunError::AllocationFailed { index, size }),
                    }
                }
                TraceOp::ZeroAlloc {
                    id,
                    count,
                    elem_size,
                } => {
                    if self.live.contains_key(&id) {
                        return Err(RunError::DuplicateId { index, id });
                    }
                    report.zero_allocations += 1;
                    match self.heap.zero_allocate(count, elem_size) {
                        Some(ptr) => self.bind(index, id, ptr)?,
                        None if count == 0 || elem_size == 0 => {}
                        None => {
                            return Err(RunError::AllocationFailed {
                                index,
                                size: count.saturating_mul(elem_size),
                            });
                        }
                    }
                }
            }
            report.ops_executed += 1;
            report.max_live_blocks = report.max_live_blocks.max(self.live.len());

            if let Some(every) = self.options.check_every {
                if every > 0 && report.ops_executed % every == 0 {
                    report.audits_run += 1;
                    let audit = self.heap.audit(index as u64);
                    if !audit.is_clean() {
                        return Err(RunError::AuditFailed {
                            index,
                            count: audit.findings.len(),
                        });
                    }
                }
            }
        }

        if self.options.check_every.is_some() {
            report.audits_run += 1;
            let audit = self.heap.audit(u64::MAX);
            if !audit.is_clean() {
                return Err(RunError::AuditFailed {
                    index: trace.ops.len(),
                    count: audit.findings.len(),
                });
            }
        }

        report.final_stats = self.heap.stats();
        Ok(report)
    }
}
