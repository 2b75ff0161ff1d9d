//! Heap consistency checking.
//!
//! A diagnostic-only pass over the whole heap and every free-list
//! bucket. [`Heap::audit`] builds a structured [`CheckReport`] without
//! mutating anything; [`Heap::check_heap`] prints each finding to
//! stderr, tagged with a caller-supplied correlation token that is used
//! for reporting and nothing else.
//!
//! The checker is written to survive the corruption it looks for: all
//! reads are bounds-guarded, a block walk stops at the first
//! non-navigable size, and every bucket walk is preceded by a
//! tortoise-and-hare cycle check so a corrupted list cannot hang it.

use std::fmt;

use segfit_arena::Arena;
use serde::Serialize;

use crate::buckets::{BUCKETS, classify};
use crate::heap::Heap;
use crate::layout::{self, DSIZE, MIN_BLOCK, Tag, WSIZE};

/// One checker finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckFinding {
    /// The prologue sentinel is not an allocated zero-payload block.
    BadPrologue { size: usize, allocated: bool },
    /// The block walk ended on something other than an allocated
    /// zero-size epilogue.
    BadEpilogue {
        offset: usize,
        size: usize,
        allocated: bool,
    },
    /// Header and footer disagree on size or allocated bit.
    TagMismatch {
        offset: usize,
        header_size: usize,
        header_allocated: bool,
        footer_size: usize,
        footer_allocated: bool,
    },
    /// Block size is not a positive aligned multiple at least the
    /// minimum block size.
    BadBlockSize { offset: usize, size: usize },
    /// Two physically adjacent blocks are both free.
    AdjacentFreeBlocks { offset: usize, next_offset: usize },
    /// A block or link reaches outside the heap bounds.
    OutOfBounds { offset: usize },
    /// A bucket's list contains a cycle; its walk was skipped.
    CycleDetected { bucket: usize },
    /// A listed block's stored size classifies into a different bucket.
    WrongBucket {
        offset: usize,
        bucket: usize,
        expected: usize,
    },
    /// A neighbor's back link does not point back at this block.
    AsymmetricLinks { offset: usize, neighbor: usize },
    /// A bucket lists a block whose tags say it is allocated.
    AllocatedInFreeList { bucket: usize, offset: usize },
    /// Free blocks in the heap and free blocks across all buckets do
    /// not agree in number.
    FreeListMismatch {
        heap_free_blocks: usize,
        listed_free_blocks: usize,
    },
}

impl fmt::Display for CheckFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn ab(allocated: bool) -> char {
            if allocated { 'a' } else { 'f' }
        }
        match *self {
            Self::BadPrologue { size, allocated } => {
                write!(f, "prologue damaged: [{size}:{}]", ab(allocated))
            }
            Self::BadEpilogue {
                offset,
                size,
                allocated,
            } => write!(f, "epilogue damaged at {offset}: [{size}:{}]", ab(allocated)),
            Self::TagMismatch {
                offset,
                header_size,
                header_allocated,
                footer_size,
                footer_allocated,
            } => write!(
                f,
                "header/footer mismatch at {offset}: header [{header_size}:{}] footer [{footer_size}:{}]",
                ab(header_allocated),
                ab(footer_allocated)
            ),
            Self::BadBlockSize { offset, size } => {
                write!(f, "bad block size {size} at {offset}")
            }
            Self::AdjacentFreeBlocks {
                offset,
                next_offset,
            } => write!(f, "adjacent free blocks at {offset} and {next_offset}"),
            Self::OutOfBounds { offset } => write!(f, "block at {offset} reaches out of bounds"),
            Self::CycleDetected { bucket } => {
                write!(f, "cycle detected in bucket {bucket}; walk skipped")
            }
            Self::WrongBucket {
                offset,
                bucket,
                expected,
            } => write!(
                f,
                "block at {offset} listed in bucket {bucket} but classifies to {expected}"
            ),
            Self::AsymmetricLinks { offset, neighbor } => {
                write!(f, "free-list links between {offset} and {neighbor} do not match")
            }
            Self::AllocatedInFreeList { bucket, offset } => {
                write!(f, "allocated block at {offset} listed in bucket {bucket}")
            }
            Self::FreeListMismatch {
                heap_free_blocks,
                listed_free_blocks,
            } => write!(
                f,
                "{heap_free_blocks} free blocks in heap but {listed_free_blocks} listed in buckets"
            ),
        }
    }
}

/// Result of one audit pass.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    /// Caller-supplied correlation token, echoed verbatim.
    pub token: u64,
    /// Real blocks visited in the heap walk.
    pub blocks_walked: usize,
    /// Free blocks visited across all bucket walks.
    pub free_listed: usize,
    /// Everything found wrong, in discovery order.
    pub findings: Vec<CheckFinding>,
}

impl CheckReport {
    /// True when no finding was recorded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

fn tag_at(arena: &Arena, offset: usize) -> Option<Tag> {
    (offset + WSIZE <= arena.hi()).then(|| Tag::decode(arena.read_word(offset)))
}

/// Whether a payload offset can have its header and both link slots
/// read without leaving the arena.
fn links_in_bounds(arena: &Arena, bp: usize) -> bool {
    bp >= DSIZE && bp + DSIZE + WSIZE <= arena.hi()
}

// The bucket walks read links directly rather than through the
// free-list accessors: the accessors assert the block is free, and the
// whole point here is examining states where it might not be.

fn raw_prev(arena: &Arena, bp: usize) -> usize {
    arena.read_word(bp) as usize
}

fn raw_next(arena: &Arena, bp: usize) -> usize {
    arena.read_word(bp + DSIZE) as usize
}

/// Tortoise and hare over a bucket's next-chain. The hare advances two
/// links per step; if the cursors ever meet the list is cyclic.
fn has_cycle(arena: &Arena, head: Option<usize>) -> bool {
    let step = |bp: usize| -> Option<usize> {
        if !links_in_bounds(arena, bp) {
            return None;
        }
        let next = raw_next(arena, bp);
        (next != 0).then_some(next)
    };
    let Some(start) = head else {
        return false;
    };
    let mut tortoise = start;
    let mut hare = start;
    loop {
        tortoise = match step(tortoise) {
            Some(bp) => bp,
            None => return false,
        };
        hare = match step(hare).and_then(step) {
            Some(bp) => bp,
            None => return false,
        };
        if tortoise == hare {
            return true;
        }
    }
}

impl Heap {
    /// Walk the heap and every bucket, collecting invariant violations.
    /// Never mutates, never panics on corrupted state, always
    /// terminates.
    #[must_use]
    pub fn audit(&self, token: u64) -> CheckReport {
        let arena = self.arena();
        let mut findings = Vec::new();
        let mut blocks_walked = 0;
        let mut heap_free_blocks = 0;

        // Prologue sentinel.
        let prologue = layout::header(arena, self.base());
        if prologue.size != DSIZE || !prologue.allocated {
            findings.push(CheckFinding::BadPrologue {
                size: prologue.size,
                allocated: prologue.allocated,
            });
        }

        // Heap walk: first real block through the epilogue.
        let mut bp = self.base() + DSIZE;
        loop {
            let Some(header) = tag_at(arena, layout::header_off(bp)) else {
                findings.push(CheckFinding::OutOfBounds { offset: bp });
                break;
            };
            if header.size == 0 {
                if !header.allocated {
                    findings.push(CheckFinding::BadEpilogue {
                        offset: bp,
                        size: header.size,
                        allocated: header.allocated,
                    });
                }
                break;
            }
            blocks_walked += 1;
            if !header.allocated {
                heap_free_blocks += 1;
            }
            if header.size % DSIZE != 0 || header.size < MIN_BLOCK {
                // Navigation cannot be trusted past a bad size.
                findings.push(CheckFinding::BadBlockSize {
                    offset: bp,
                    size: header.size,
                });
                break;
            }
            let Some(footer) = tag_at(arena, bp + header.size - DSIZE) else {
                findings.push(CheckFinding::OutOfBounds { offset: bp });
                break;
            };
            if footer != header {
                findings.push(CheckFinding::TagMismatch {
                    offset: bp,
                    header_size: header.size,
                    header_allocated: header.allocated,
                    footer_size: footer.size,
                    footer_allocated: footer.allocated,
                });
            }
            let next_bp = bp + header.size;
            if let Some(next) = tag_at(arena, layout::header_off(next_bp)) {
                if !header.allocated && !next.allocated {
                    findings.push(CheckFinding::AdjacentFreeBlocks {
                        offset: bp,
                        next_offset: next_bp,
                    });
                }
            }
            bp = next_bp;
        }

        // Bucket walks.
        let mut free_listed = 0;
        for bucket in 0..BUCKETS {
            let head = self.bucket_table().head(bucket);
            if has_cycle(arena, head) {
                findings.push(CheckFinding::CycleDetected { bucket });
                continue;
            }
            let mut cursor = head;
            while let Some(bp) = cursor {
                if !links_in_bounds(arena, bp) {
                    findings.push(CheckFinding::OutOfBounds { offset: bp });
                    break;
                }
                free_listed += 1;
                let tag = layout::header(arena, bp);
                if tag.allocated {
                    findings.push(CheckFinding::AllocatedInFreeList { bucket, offset: bp });
                }
                if classify(tag.size) != bucket {
                    findings.push(CheckFinding::WrongBucket {
                        offset: bp,
                        bucket,
                        expected: classify(tag.size),
                    });
                }
                let prev = raw_prev(arena, bp);
                let next = raw_next(arena, bp);
                if next != 0
                    && (!links_in_bounds(arena, next) || raw_prev(arena, next) != bp)
                {
                    findings.push(CheckFinding::AsymmetricLinks {
                        offset: bp,
                        neighbor: next,
                    });
                }
                if prev != 0
                    && (!links_in_bounds(arena, prev) || raw_next(arena, prev) != bp)
                {
                    findings.push(CheckFinding::AsymmetricLinks {
                        offset: bp,
                        neighbor: prev,
                    });
                }
                cursor = (next != 0).then_some(next);
            }
        }

        if heap_free_blocks != free_listed {
            findings.push(CheckFinding::FreeListMismatch {
                heap_free_blocks,
                listed_free_blocks: free_listed,
            });
        }

        CheckReport {
            token,
            blocks_walked,
            free_listed,
            findings,
        }
    }

    /// Run an audit and print every finding to stderr. Diagnostic only:
    /// state is never mutated and the process never aborts.
    pub fn check_heap(&self, token: u64) {
        let report = self.audit(token);
        for finding in &report.findings {
            eprintln!("heap check [token {token}]: {finding}");
        }
    }
}
