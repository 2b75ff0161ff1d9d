//! The heap: allocator front end and growth management.
//!
//! A [`Heap`] owns one arena, one bucket table, and nothing else; it is
//! an explicit value, so independent heaps can coexist (one per test,
//! typically). All access is `&mut self` — the allocator is
//! single-threaded by contract and exclusivity is enforced by the
//! borrow checker rather than by locks.
//!
//! The heap begins with an allocated zero-payload prologue and ends
//! with an allocated zero-size epilogue. The sentinels make every real
//! block's physical neighbors readable without bounds special-casing;
//! the epilogue is displaced upward each time the heap grows.

use std::fmt;

use segfit_arena::{Arena, ArenaError};
use serde::Serialize;

use crate::buckets::{BucketTable, classify};
use crate::error::HeapError;
use crate::layout::{self, DSIZE, MIN_BLOCK, Tag, WSIZE};
use crate::record::{HeapOp, LifecycleRecord, RecordRing};

/// Default heap growth chunk in bytes: when `find_fit` misses, the heap
/// grows by at least this much.
pub const CHUNK_SIZE: usize = 4096;

/// Heap construction parameters.
#[derive(Debug, Clone, Copy)]
pub struct HeapConfig {
    /// Minimum growth amount per extension.
    pub chunk_size: usize,
    /// Arena configuration (growth limit).
    pub arena: segfit_arena::ArenaConfig,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            arena: segfit_arena::ArenaConfig::default(),
        }
    }
}

/// Handle to an allocated block: its payload offset in the arena.
///
/// Only the heap that returned a `BlockRef` can interpret it. The type
/// is deliberately opaque; `offset` exists for reporting and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef(pub(crate) usize);

impl BlockRef {
    /// Arena payload offset of the block.
    #[must_use]
    pub const fn offset(self) -> usize {
        self.0
    }
}

/// One block of the heap, as seen by [`Heap::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockInfo {
    /// Payload offset.
    pub offset: usize,
    /// Full block size, tags included.
    pub size: usize,
    /// Allocated bit.
    pub allocated: bool,
}

impl fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: [{}:{}]",
            self.offset,
            self.size,
            if self.allocated { 'a' } else { 'f' }
        )
    }
}

/// Point-in-time heap counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeapStats {
    /// Currently allocated blocks.
    pub live_blocks: usize,
    /// Currently allocated bytes, tag overhead included.
    pub live_bytes: usize,
    /// Highest `live_bytes` ever observed.
    pub peak_live_bytes: usize,
    /// Total arena bytes granted so far.
    pub heap_extent: usize,
    /// Number of successful heap extensions.
    pub growths: u64,
}

/// A segregated-fit heap over a growable arena.
pub struct Heap {
    arena: Arena,
    buckets: BucketTable,
    /// Prologue payload offset; block walks start here.
    base: usize,
    chunk_size: usize,
    live_blocks: usize,
    live_bytes: usize,
    peak_live_bytes: usize,
    growths: u64,
    records: RecordRing,
}

impl Heap {
    /// Build a heap with default configuration: zeroed bucket table,
    /// sentinels written, and one initial chunk of free space.
    pub fn new() -> Result<Self, HeapError> {
        Self::with_config(HeapConfig::default())
    }

    /// Build a heap with explicit configuration.
    pub fn with_config(config: HeapConfig) -> Result<Self, HeapError> {
        let mut heap = Self {
            arena: Arena::with_config(config.arena),
            buckets: BucketTable::new(),
            base: DSIZE,
            chunk_size: config.chunk_size,
            live_blocks: 0,
            live_bytes: 0,
            peak_live_bytes: 0,
            growths: 0,
            records: RecordRing::new(),
        };
        heap.arena.grow(4 * WSIZE)?;
        // Word 0 is alignment padding and stays zero. Prologue header
        // and footer, then the initial epilogue.
        heap.arena.write_word(WSIZE, Tag::new(DSIZE, true).pack());
        heap.arena.write_word(2 * WSIZE, Tag::new(DSIZE, true).pack());
        heap.arena.write_word(3 * WSIZE, Tag::new(0, true).pack());
        heap.extend(heap.chunk_size)?;
        Ok(heap)
    }

    /// Grow the heap by at least `bytes` (rounded up to an even word
    /// count), installing a fresh epilogue past the new free block.
    /// Returns the payload offset of the new block after merging with a
    /// free predecessor. On arena refusal, nothing is mutated.
    pub(crate) fn extend(&mut self, bytes: usize) -> Result<usize, ArenaError> {
        let size = layout::round_even_words(bytes);
        let bp = self.arena.grow(size)?;
        self.growths += 1;
        // The new block's header lands on the old epilogue.
        layout::set_block(&mut self.arena, bp, size, false);
        self.arena
            .write_word(layout::header_off(bp + size), Tag::new(0, true).pack());
        let merged = self.coalesce(bp);
        let merged_size = layout::header(&self.arena, merged).size;
        self.record(HeapOp::Extend, Some(bytes), Some(merged), Some(merged_size), "ok");
        Ok(merged)
    }

    /// Allocate a block with at least `size` payload bytes.
    ///
    /// `size == 0` is not an error; it yields `None` with no side
    /// effects. Returns `None` when the arena cannot grow far enough,
    /// leaving every existing block untouched.
    pub fn allocate(&mut self, size: usize) -> Option<BlockRef> {
        if size == 0 {
            self.record(HeapOp::Allocate, Some(0), None, None, "null_request");
            return None;
        }
        let Some(asize) = layout::adjust_request(size) else {
            self.record(HeapOp::Allocate, Some(size), None, None, "oom");
            return None;
        };
        let bp = match self.buckets.find_fit(&self.arena, asize) {
            Some(bp) => bp,
            None => {
                let grow_by = asize.max(self.chunk_size);
                match self.extend(grow_by) {
                    Ok(bp) => bp,
                    Err(_) => {
                        self.record(HeapOp::Allocate, Some(size), None, None, "oom");
                        return None;
                    }
                }
            }
        };
        let granted = self.place(bp, asize);
        self.live_blocks += 1;
        self.live_bytes += granted;
        self.peak_live_bytes = self.peak_live_bytes.max(self.live_bytes);
        self.record(HeapOp::Allocate, Some(size), Some(bp), Some(granted), "ok");
        Some(BlockRef(bp))
    }

    /// Carve `asize` bytes out of the free block at `bp`. Splits when
    /// the leftover could stand as a block of its own; otherwise the
    /// whole block is granted, accepting the internal fragmentation.
    /// Returns the granted block size.
    fn place(&mut self, bp: usize, asize: usize) -> usize {
        let csize = layout::header(&self.arena, bp).size;
        self.remove_free(bp);
        if csize - asize >= MIN_BLOCK {
            self.set_block(bp, asize, true);
            let remainder = bp + asize;
            self.set_block(remainder, csize - asize, false);
            self.insert_free(remainder);
            asize
        } else {
            self.set_block(bp, csize, true);
            csize
        }
    }

    /// Free a block. `None` is a no-op.
    pub fn free(&mut self, ptr: Option<BlockRef>) {
        let Some(ptr) = ptr else {
            self.record(HeapOp::Free, None, None, None, "noop_null");
            return;
        };
        let bp = ptr.0;
        let tag = layout::header(&self.arena, bp);
        debug_assert!(tag.allocated, "free of a block that is not allocated");
        debug_assert_eq!(
            layout::footer(&self.arena, bp),
            tag,
            "boundary tags disagree at free"
        );
        let size = tag.size;
        self.set_block(bp, size, false);

        let prev_allocated = Tag::decode(self.arena.read_word(bp - DSIZE)).allocated;
        let next_bp = bp + size;
        let next_allocated = layout::header(&self.arena, next_bp).allocated;

        // Fast path: target bucket is empty and both physical neighbors
        // are allocated, so the coalescer would insert the block
        // unchanged anyway.
        let final_bp = if self.buckets.is_empty(classify(size)) && prev_allocated && next_allocated
        {
            self.insert_free(bp);
            bp
        } else {
            self.coalesce(bp)
        };

        self.live_blocks -= 1;
        self.live_bytes -= size;
        let final_size = layout::header(&self.arena, final_bp).size;
        self.record(HeapOp::Free, None, Some(final_bp), Some(final_size), "ok");
    }

    /// Resize a block. `None` behaves as `allocate(size)`; `size == 0`
    /// behaves as `free` and returns `None`. Otherwise a new block is
    /// allocated, `min(old payload, size)` bytes are copied, and the
    /// old block is freed. If the new allocation fails the original
    /// block is left completely untouched.
    pub fn reallocate(&mut self, ptr: Option<BlockRef>, size: usize) -> Option<BlockRef> {
        let Some(old) = ptr else {
            return self.allocate(size);
        };
        if size == 0 {
            self.free(Some(old));
            self.record(HeapOp::Reallocate, Some(0), Some(old.0), None, "freed");
            return None;
        }
        let old_capacity = layout::payload_capacity(layout::header(&self.arena, old.0).size);
        let Some(new) = self.allocate(size) else {
            self.record(HeapOp::Reallocate, Some(size), Some(old.0), None, "oom");
            return None;
        };
        let copy_len = old_capacity.min(size);
        self.arena.copy_within(old.0..old.0 + copy_len, new.0);
        self.free(Some(old));
        let new_size = layout::header(&self.arena, new.0).size;
        self.record(HeapOp::Reallocate, Some(size), Some(new.0), Some(new_size), "ok");
        Some(new)
    }

    /// Allocate `count * elem_size` bytes with the entire payload
    /// zero-filled. The multiply is overflow-checked.
    pub fn zero_allocate(&mut self, count: usize, elem_size: usize) -> Option<BlockRef> {
        let Some(total) = count.checked_mul(elem_size) else {
            self.record(HeapOp::ZeroAllocate, None, None, None, "overflow");
            return None;
        };
        let ptr = self.allocate(total);
        match ptr {
            Some(p) => {
                let capacity = self.payload_capacity(p);
                self.arena.fill_zero(p.0..p.0 + capacity);
                self.record(
                    HeapOp::ZeroAllocate,
                    Some(total),
                    Some(p.0),
                    Some(capacity + DSIZE),
                    "ok",
                );
            }
            None => {
                let outcome = if total == 0 { "null_request" } else { "oom" };
                self.record(HeapOp::ZeroAllocate, Some(total), None, None, outcome);
            }
        }
        ptr
    }

    /// Usable payload bytes of an allocated block. At least the size
    /// requested at allocation, possibly more after rounding or an
    /// unsplit placement.
    #[must_use]
    pub fn payload_capacity(&self, ptr: BlockRef) -> usize {
        layout::payload_capacity(layout::header(&self.arena, ptr.0).size)
    }

    /// Borrow an allocated block's payload.
    #[must_use]
    pub fn payload(&self, ptr: BlockRef) -> &[u8] {
        debug_assert!(layout::header(&self.arena, ptr.0).allocated);
        let capacity = self.payload_capacity(ptr);
        self.arena.bytes(ptr.0..ptr.0 + capacity)
    }

    /// Mutably borrow an allocated block's payload.
    pub fn payload_mut(&mut self, ptr: BlockRef) -> &mut [u8] {
        debug_assert!(layout::header(&self.arena, ptr.0).allocated);
        let capacity = self.payload_capacity(ptr);
        self.arena.bytes_mut(ptr.0..ptr.0 + capacity)
    }

    /// Every real block between the sentinels, in address order.
    #[must_use]
    pub fn blocks(&self) -> Vec<BlockInfo> {
        let mut out = Vec::new();
        let mut bp = layout::next_payload(&self.arena, self.base);
        loop {
            let tag = layout::header(&self.arena, bp);
            if tag.size == 0 {
                break;
            }
            out.push(BlockInfo {
                offset: bp,
                size: tag.size,
                allocated: tag.allocated,
            });
            bp += tag.size;
        }
        out
    }

    /// Render the block list one per line, sentinel-to-sentinel.
    #[must_use]
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for block in self.blocks() {
            out.push_str(&block.to_string());
            out.push('\n');
        }
        out.push_str(&format!("{}: EOL\n", self.arena.hi()));
        out
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            live_blocks: self.live_blocks,
            live_bytes: self.live_bytes,
            peak_live_bytes: self.peak_live_bytes,
            heap_extent: self.arena.hi(),
            growths: self.growths,
        }
    }

    /// Total arena bytes granted so far.
    #[must_use]
    pub fn extent(&self) -> usize {
        self.arena.hi()
    }

    /// Iterate the retained lifecycle records, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &LifecycleRecord> {
        self.records.iter()
    }

    /// Drain the retained lifecycle records.
    pub fn drain_records(&mut self) -> Vec<LifecycleRecord> {
        self.records.drain()
    }

    fn record(
        &mut self,
        op: HeapOp,
        requested: Option<usize>,
        block: Option<usize>,
        block_size: Option<usize>,
        outcome: &'static str,
    ) {
        self.records.push(LifecycleRecord {
            decision_id: 0,
            op,
            requested,
            block,
            block_size,
            outcome,
            live_blocks: self.live_blocks,
            live_bytes: self.live_bytes,
            heap_extent: self.arena.hi(),
        });
    }

    // Internal accessors shared with the coalescer and the checker.

    pub(crate) fn arena(&self) -> &Arena {
        &self.arena
    }

    #[cfg(test)]
    pub(crate) fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    pub(crate) fn bucket_table(&self) -> &BucketTable {
        &self.buckets
    }

    pub(crate) fn base(&self) -> usize {
        self.base
    }

    pub(crate) fn set_block(&mut self, bp: usize, size: usize, allocated: bool) {
        layout::set_block(&mut self.arena, bp, size, allocated);
    }

    pub(crate) fn insert_free(&mut self, bp: usize) {
        self.buckets.insert(&mut self.arena, bp);
    }

    pub(crate) fn remove_free(&mut self, bp: usize) {
        self.buckets.remove(&mut self.arena, bp);
    }
}
