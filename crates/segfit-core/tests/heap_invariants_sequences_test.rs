use segfit_core::{BlockRef, Heap};
use serde_json::json;

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range(&mut self, low: usize, high_inclusive: usize) -> usize {
        assert!(low <= high_inclusive);
        let span = high_inclusive - low + 1;
        low + (self.next_u64() as usize % span)
    }
}

#[derive(Clone, Copy, Debug)]
struct LiveBlock {
    ptr: BlockRef,
    pattern: u8,
    filled: usize,
}

fn fill(heap: &mut Heap, ptr: BlockRef, pattern: u8) -> usize {
    let payload = heap.payload_mut(ptr);
    payload.fill(pattern);
    payload.len()
}

fn verify(heap: &Heap, block: &LiveBlock, seed: u64, step: usize) {
    let payload = heap.payload(block.ptr);
    assert!(
        payload[..block.filled].iter().all(|&b| b == block.pattern),
        "seed={seed} step={step}: payload of block at {} corrupted",
        block.ptr.offset()
    );
}

#[test]
fn deterministic_sequences_hold_heap_invariants() {
    // Deterministic, bounded, and intentionally simple: invariant
    // pressure across the whole allocate/free/reallocate/zero-allocate
    // surface, with payload shadowing to catch any block overlap.
    const SEEDS: [u64; 4] = [1, 2, 3, 4];
    const STEPS: usize = 2_000;
    const SLOTS: usize = 32;
    const AUDIT_EVERY: usize = 256;

    let mut total_ops = 0usize;
    let mut total_audits = 0usize;

    for seed in SEEDS {
        let mut heap = Heap::new().expect("heap");
        let mut slots: [Option<LiveBlock>; SLOTS] = [None; SLOTS];
        let mut rng = XorShift64::new(seed);
        let mut next_pattern = 1u8;

        for step in 0..STEPS {
            let op = rng.gen_range(0, 99);
            let idx = rng.gen_range(0, SLOTS - 1);
            total_ops += 1;

            match op {
                // allocate (biased)
                0..=44 => {
                    if slots[idx].is_some() {
                        continue;
                    }
                    let size = rng.gen_range(1, 2048);
                    let ptr = heap.allocate(size).expect("allocation should succeed");
                    assert!(
                        heap.payload_capacity(ptr) >= size,
                        "seed={seed} step={step}: short payload"
                    );
                    let pattern = next_pattern;
                    next_pattern = next_pattern.wrapping_add(1).max(1);
                    let filled = fill(&mut heap, ptr, pattern);
                    slots[idx] = Some(LiveBlock {
                        ptr,
                        pattern,
                        filled,
                    });
                }
                // free
                45..=69 => {
                    let Some(block) = slots[idx].take() else {
                        continue;
                    };
                    verify(&heap, &block, seed, step);
                    heap.free(Some(block.ptr));
                }
                // reallocate
                70..=84 => {
                    let Some(block) = slots[idx].take() else {
                        continue;
                    };
                    verify(&heap, &block, seed, step);
                    let new_size = rng.gen_range(1, 2048);
                    let ptr = heap
                        .reallocate(Some(block.ptr), new_size)
                        .expect("reallocate should succeed");
                    let preserved = block.filled.min(new_size);
                    assert!(
                        heap.payload(ptr)[..preserved]
                            .iter()
                            .all(|&b| b == block.pattern),
                        "seed={seed} step={step}: reallocate lost prefix bytes"
                    );
                    let pattern = next_pattern;
                    next_pattern = next_pattern.wrapping_add(1).max(1);
                    let filled = fill(&mut heap, ptr, pattern);
                    slots[idx] = Some(LiveBlock {
                        ptr,
                        pattern,
                        filled,
                    });
                }
                // zero-allocate
                85..=94 => {
                    if slots[idx].is_some() {
                        continue;
                    }
                    let count = rng.gen_range(1, 64);
                    let elem = rng.gen_range(1, 24);
                    let ptr = heap
                        .zero_allocate(count, elem)
                        .expect("zero-allocate should succeed");
                    assert!(
                        heap.payload(ptr).iter().all(|&b| b == 0),
                        "seed={seed} step={step}: zero-allocate left stale bytes"
                    );
                    let filled = fill(&mut heap, ptr, 0);
                    slots[idx] = Some(LiveBlock {
                        ptr,
                        pattern: 0,
                        filled,
                    });
                }
                // null-pointer no-ops
                _ => {
                    heap.free(None);
                    assert!(heap.allocate(0).is_none());
                }
            }

            if step % AUDIT_EVERY == 0 {
                let report = heap.audit(step as u64);
                total_audits += 1;
                assert!(
                    report.is_clean(),
                    "seed={seed} step={step}: audit found {:?}",
                    report.findings
                );
            }
        }

        // Drain everything; the heap must collapse to one free span.
        for slot in slots.iter_mut() {
            if let Some(block) = slot.take() {
                verify(&heap, &block, seed, STEPS);
                heap.free(Some(block.ptr));
            }
        }
        let report = heap.audit(u64::MAX);
        assert!(
            report.is_clean(),
            "seed={seed}: final audit found {:?}",
            report.findings
        );
        assert_eq!(heap.stats().live_blocks, 0, "seed={seed}");
        assert_eq!(heap.stats().live_bytes, 0, "seed={seed}");
        assert_eq!(
            heap.blocks().len(),
            1,
            "seed={seed}: full drain must coalesce to a single span"
        );
    }

    eprintln!(
        "{}",
        json!({
            "test": "deterministic_sequences_hold_heap_invariants",
            "seeds": SEEDS.len(),
            "ops": total_ops,
            "audits": total_audits,
        })
    );
}

#[test]
fn interleaved_heaps_stay_independent() {
    let mut left = Heap::new().expect("left heap");
    let mut right = Heap::new().expect("right heap");

    let a = left.allocate(100).expect("left alloc");
    let b = right.allocate(100).expect("right alloc");
    left.payload_mut(a).fill(0xAA);
    right.payload_mut(b).fill(0xBB);

    left.free(Some(a));
    assert!(
        right.payload(b).iter().all(|&x| x == 0xBB),
        "freeing in one heap must not disturb another"
    );
    assert!(left.audit(0).is_clean());
    assert!(right.audit(0).is_clean());
}
