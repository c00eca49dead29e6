//! Key hashing.

use std::hash::BuildHasher;

// Fixed seeds keep the hash stable for the process lifetime, which is all
// the index needs; the protocol and the cache must agree on the function.
const SEEDS: (u64, u64, u64, u64) = (
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
);

/// Hash a key the way the cache index expects.
#[inline]
pub fn hash_key(key: &[u8]) -> u64 {
    ahash::RandomState::with_seeds(SEEDS.0, SEEDS.1, SEEDS.2, SEEDS.3).hash_one(key)
}
