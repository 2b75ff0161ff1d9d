//! Boundary-tag coalescing.
//!
//! The only path by which two physically adjacent free blocks can ever
//! coexist is mid-coalesce; this routine eliminates that state before
//! returning. The prologue and epilogue sentinels are permanently
//! allocated, so neighbor probes never need bounds special-casing.

use crate::heap::Heap;
use crate::layout::{self, Tag};

impl Heap {
    /// Merge the free block at `bp` with whichever physical neighbors
    /// are free, insert the result into its bucket, and return its
    /// payload offset.
    ///
    /// Four cases:
    /// - both neighbors allocated: insert `bp` as-is;
    /// - successor free: absorb it, keep `bp`;
    /// - predecessor free: absorb `bp` into it, result is the
    ///   predecessor;
    /// - both free: one span from predecessor through successor.
    pub(crate) fn coalesce(&mut self, bp: usize) -> usize {
        let arena = self.arena();
        let prev_tag = Tag::decode(arena.read_word(bp - layout::DSIZE));
        let next_bp = layout::next_payload(arena, bp);
        let next_tag = layout::header(arena, next_bp);

        let mut start = bp;
        let mut size = layout::header(arena, bp).size;

        // Remove neighbors while their tags are still intact; the merged
        // tags are written once, over the final span.
        if !next_tag.allocated {
            self.remove_free(next_bp);
            size += next_tag.size;
        }
        if !prev_tag.allocated {
            let prev_bp = layout::prev_payload(self.arena(), bp);
            self.remove_free(prev_bp);
            size += prev_tag.size;
            start = prev_bp;
        }

        self.set_block(start, size, false);
        self.insert_free(start);
        start
    }
}

#[cfg(test)]
mod tests {
    use crate::heap::{Heap, HeapConfig};
    use crate::layout::MIN_BLOCK;

    fn heap() -> Heap {
        Heap::with_config(HeapConfig::default()).expect("heap")
    }

    /// Three adjacent allocated blocks; returns their refs.
    fn three_blocks(heap: &mut Heap) -> [crate::BlockRef; 3] {
        let a = heap.allocate(16).expect("a");
        let b = heap.allocate(16).expect("b");
        let c = heap.allocate(16).expect("c");
        [a, b, c]
    }

    #[test]
    fn no_merge_when_both_neighbors_allocated() {
        let mut heap = heap();
        let [_, b, _] = three_blocks(&mut heap);
        heap.free(Some(b));
        let free_sizes: Vec<usize> = heap
            .blocks()
            .iter()
            .filter(|blk| !blk.allocated)
            .map(|blk| blk.size)
            .collect();
        assert!(free_sizes.contains(&MIN_BLOCK), "b stays its own block");
    }

    #[test]
    fn merges_with_free_successor() {
        let mut heap = heap();
        let [_, b, c] = three_blocks(&mut heap);
        heap.free(Some(c));
        // c merged with the remainder block above it; freeing b must now
        // absorb that whole span forward.
        heap.free(Some(b));
        assert!(
            heap.audit(0).is_clean(),
            "no adjacent free blocks after forward merge"
        );
        let free_count = heap.blocks().iter().filter(|blk| !blk.allocated).count();
        assert_eq!(free_count, 1, "b, c, and the tail remainder form one span");
    }

    #[test]
    fn merges_with_free_predecessor() {
        let mut heap = heap();
        let [a, b, _] = three_blocks(&mut heap);
        heap.free(Some(a));
        heap.free(Some(b));
        assert!(heap.audit(0).is_clean());
        let frees: Vec<usize> = heap
            .blocks()
            .iter()
            .filter(|blk| !blk.allocated)
            .map(|blk| blk.size)
            .collect();
        assert!(
            frees.contains(&(2 * MIN_BLOCK)),
            "a and b merged into one {} byte span, got {frees:?}",
            2 * MIN_BLOCK
        );
    }

    #[test]
    fn merges_both_directions_into_one_span() {
        let mut heap = heap();
        let [a, b, c] = three_blocks(&mut heap);
        heap.free(Some(a));
        heap.free(Some(c));
        heap.free(Some(b));
        assert!(heap.audit(0).is_clean());
        let free_count = heap.blocks().iter().filter(|blk| !blk.allocated).count();
        assert_eq!(free_count, 1, "whole heap collapses back to one free span");
    }
}
