//! Deterministic storm workload generation.
//!
//! Storms are allocation pressure patterns rendered down to ordinary
//! traces, so the same workload can be replayed, saved, or diffed. The
//! generator tracks which ids are live and only emits well-formed op
//! sequences; every storm ends by draining all live ids.

use crate::trace::{Trace, TraceOp};

/// A deterministic xorshift64* generator; seeds are workload identity.
#[derive(Clone, Copy, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.max(1),
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    pub fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

/// Storm shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StormKind {
    /// Ramp all slots up, tear all down, repeat.
    Sawtooth,
    /// Uniformly random alloc/free/realloc churn.
    RandomChurn,
    /// Alternate sizes across size-class boundaries.
    SizeClassThrash,
}

impl StormKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sawtooth => "sawtooth",
            Self::RandomChurn => "churn",
            Self::SizeClassThrash => "thrash",
        }
    }

    /// Parse from string (case-insensitive); `None` for unknown names.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sawtooth" | "saw" => Some(Self::Sawtooth),
            "churn" | "random" | "random_churn" => Some(Self::RandomChurn),
            "thrash" | "size_class_thrash" => Some(Self::SizeClassThrash),
            _ => None,
        }
    }
}

/// Storm generation parameters.
#[derive(Debug, Clone, Copy)]
pub struct StormConfig {
    pub kind: StormKind,
    pub seed: u64,
    /// Approximate number of ops before the final drain.
    pub ops: usize,
    /// Maximum concurrently live ids.
    pub slots: usize,
    /// Largest single request in bytes.
    pub max_size: usize,
}

impl Default for StormConfig {
    fn default() -> Self {
        Self {
            kind: StormKind::RandomChurn,
            seed: 1,
            ops: 10_000,
            slots: 64,
            max_size: 2048,
        }
    }
}

/// Render a storm into a trace.
#[must_use]
pub fn generate(config: StormConfig) -> Trace {
    let mut rng = XorShift64::new(config.seed);
    let mut ops = Vec::with_capacity(config.ops + config.slots);
    let mut live: Vec<Option<u64>> = vec![None; config.slots.max(1)];
    let mut next_id = 0u64;

    while ops.len() < config.ops {
        match config.kind {
            StormKind::Sawtooth => {
                // Fill every slot, then drain every slot.
                for slot in live.iter_mut() {
                    if ops.len() >= config.ops {
                        break;
                    }
                    if slot.is_none() {
                        let id = next_id;
                        next_id += 1;
                        ops.push(TraceOp::Alloc {
                            id,
                            size: rng.gen_range(1, config.max_size),
                        });
                        *slot = Some(id);
                    }
                }
                for slot in live.iter_mut() {
                    if let Some(id) = slot.take() {
                        ops.push(TraceOp::Free { id });
                    }
                }
            }
            StormKind::RandomChurn => {
                let idx = rng.gen_range(0, live.len() - 1);
                match (live[idx], rng.gen_range(0, 99)) {
                    (None, _) => {
                        let id = next_id;
                        next_id += 1;
                        ops.push(TraceOp::Alloc {
                            id,
                            size: rng.gen_range(1, config.max_size),
                        });
                        live[idx] = Some(id);
                    }
                    (Some(id), 0..=59) => {
                        ops.push(TraceOp::Free { id });
                        live[idx] = None;
                    }
                    (Some(id), _) => {
                        ops.push(TraceOp::Realloc {
                            id,
                            size: rng.gen_range(1, config.max_size),
                        });
                    }
                }
            }
            StormKind::SizeClassThrash => {
                // Bounce between neighboring size classes so blocks
                // split and re-coalesce constantly.
                let idx = rng.gen_range(0, live.len() - 1);
                match live[idx] {
                    None => {
                        let id = next_id;
                        next_id += 1;
                        let class = rng.gen_range(4, 11);
                        let size = (1usize << class) + rng.gen_range(0, 1 << (class - 1));
                        ops.push(TraceOp::ZeroAlloc {
                            id,
                            count: 1,
                            elem_size: size.min(config.max_size.max(16)),
                        });
                        live[idx] = Some(id);
                    }
                    Some(id) => {
                        ops.push(TraceOp::Free { id });
                        live[idx] = None;
                    }
                }
            }
        }
    }

    // Final drain.
    for slot in live.iter_mut() {
        if let Some(id) = slot.take() {
            ops.push(TraceOp::Free { id });
        }
    }

    Trace { ops }
}
