use segfit_core::{BlockRef, CHUNK_SIZE, DSIZE, Heap};

#[test]
fn coalesced_neighbors_satisfy_larger_request_without_growth() {
    // The literal scenario: two one-byte allocations freed in order,
    // then a request spanning two alignment units must come out of the
    // coalesced space.
    let mut heap = Heap::new().expect("heap");
    let a = heap.allocate(1).expect("a");
    let b = heap.allocate(1).expect("b");
    let growths_before = heap.stats().growths;
    heap.free(Some(a));
    heap.free(Some(b));
    let c = heap.allocate(2 * DSIZE).expect("c");
    assert_eq!(heap.stats().growths, growths_before, "no growth allowed");
    assert_eq!(
        c.offset(),
        a.offset(),
        "request must be carved from the coalesced span"
    );
    assert!(heap.audit(0).is_clean());
}

#[test]
fn coalescing_reassembles_a_full_heap() {
    // Fill the initial chunk exactly with two blocks, so the follow-up
    // request can only succeed if freeing both merges them back into
    // one span.
    let mut heap = Heap::new().expect("heap");
    let a = heap.allocate(2040).expect("a"); // 2048-byte block
    let b = heap.allocate(2032).expect("b"); // rest of the chunk
    assert!(
        heap.blocks().iter().all(|blk| blk.allocated),
        "setup must leave no free block"
    );
    let growths_before = heap.stats().growths;
    heap.free(Some(a));
    heap.free(Some(b));
    let big = heap.allocate(4000).expect("big");
    assert_eq!(heap.stats().growths, growths_before, "no growth allowed");
    assert!(heap.payload_capacity(big) >= 4000);
    assert!(heap.audit(0).is_clean());
}

#[test]
fn invariant_no_adjacent_free_blocks_after_every_free() {
    let mut heap = Heap::new().expect("heap");
    let ptrs: Vec<BlockRef> = (0..24)
        .map(|i| heap.allocate(16 + i * 8).expect("alloc"))
        .collect();
    // Free in an order that produces every coalesce case: evens first
    // (isolated frees), then odds (each bridging two free neighbors).
    for (i, &ptr) in ptrs.iter().enumerate() {
        if i % 2 == 0 {
            heap.free(Some(ptr));
            let report = heap.audit(i as u64);
            assert!(report.is_clean(), "after even free {i}: {:?}", report.findings);
        }
    }
    for (i, &ptr) in ptrs.iter().enumerate() {
        if i % 2 == 1 {
            heap.free(Some(ptr));
            let report = heap.audit(i as u64);
            assert!(report.is_clean(), "after odd free {i}: {:?}", report.findings);
        }
    }
    assert_eq!(heap.blocks().len(), 1, "full drain coalesces to one span");
}

#[test]
fn refill_after_partial_free_stays_within_high_water_plus_one_chunk() {
    const N: usize = 64;
    const S: usize = 128;

    let mut heap = Heap::new().expect("heap");
    let first_pass: Vec<BlockRef> = (0..N).map(|_| heap.allocate(S).expect("alloc")).collect();
    let high_water = heap.extent();

    for ptr in first_pass.iter().step_by(2) {
        heap.free(Some(*ptr));
    }
    let refill: Vec<BlockRef> = (0..N / 2).map(|_| heap.allocate(S).expect("refill")).collect();

    assert!(
        heap.extent() <= high_water + CHUNK_SIZE,
        "extent {} exceeds high water {} plus one chunk",
        heap.extent(),
        high_water
    );
    assert!(heap.audit(0).is_clean());

    for ptr in first_pass.iter().skip(1).step_by(2) {
        heap.free(Some(*ptr));
    }
    for ptr in refill {
        heap.free(Some(ptr));
    }
    assert_eq!(heap.stats().live_blocks, 0);
}

#[test]
fn sawtooth_churn_reuses_freed_space() {
    // Repeatedly build up and tear down; the heap footprint must
    // stabilize after the first cycle rather than creep.
    let mut heap = Heap::new().expect("heap");
    let mut peak_extent = 0;
    for cycle in 0..8 {
        let ptrs: Vec<BlockRef> = (0..32)
            .map(|i| heap.allocate(32 + (i % 7) * 48).expect("alloc"))
            .collect();
        if cycle == 0 {
            peak_extent = heap.extent();
        } else {
            assert_eq!(
                heap.extent(),
                peak_extent,
                "cycle {cycle}: identical workload must not grow the heap"
            );
        }
        for ptr in ptrs {
            heap.free(Some(ptr));
        }
        assert!(heap.audit(cycle as u64).is_clean());
    }
}
