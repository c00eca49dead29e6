//! Randomized alloc/evict/realloc stress over a small arena.
//!
//! Any bookkeeping inconsistency surfaces as a panic inside the allocator
//! or as a failed `verify()` walk; after every round the arena must drain
//! back to its pristine single-free-block state.

use memalloc::Memalloc;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::ptr::NonNull;

const ARENA_SIZE: usize = 4 * 1024 * 1024;
const MIN_ALLOC_SIZE: usize = 4;
const MAX_ALLOC_SIZE: usize = 1024 * 1024;

fn run_rounds(rounds: usize, ops_per_round: usize, seed: u64) {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    let mut allocator = Memalloc::new(ARENA_SIZE);
    let pristine = allocator.verify();
    let mut live: Vec<NonNull<u8>> = Vec::with_capacity(ops_per_round);

    for _ in 0..rounds {
        for _ in 0..ops_per_round {
            let size = rng.gen_range(MIN_ALLOC_SIZE..=MAX_ALLOC_SIZE);

            // allocate, letting the allocator retire our own older blocks
            let ptr = allocator.alloc_or_evict(size, true, |victim| {
                let at = live
                    .iter()
                    .position(|&p| p == victim)
                    .expect("evicted pointer not in the live set");
                live.swap_remove(at);
            });
            if let Some(ptr) = ptr {
                live.push(ptr);
            }

            // free a random live block with 40% probability
            if !live.is_empty() && rng.gen_bool(0.40) {
                let at = rng.gen_range(0..live.len());
                let ptr = live.swap_remove(at);
                allocator.free(ptr);
            }

            // resize a random live block in place with 60% probability
            if !live.is_empty() && rng.gen_bool(0.60) {
                let at = rng.gen_range(0..live.len());
                allocator.realloc_inplace(live[at], rng.gen_range(MIN_ALLOC_SIZE..=MAX_ALLOC_SIZE));
            }
        }

        // drain: the arena must fold back into one free interior block
        while let Some(ptr) = live.pop() {
            allocator.free(ptr);
        }
        assert_eq!(allocator.verify(), pristine);
    }
}

#[test]
fn stress_short() {
    run_rounds(5, 10_000, 0x5EED);
}

// The full-size scenario: 50 rounds of 100k operations.
#[test]
#[ignore = "long-running; use --ignored for the full sweep"]
fn stress_full() {
    run_rounds(50, 100_000, 0x5EED_F011);
}
