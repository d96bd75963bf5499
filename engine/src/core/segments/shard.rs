//! Shard Key Assignment
//!
//! `shard_key = (fnv1a64(routing_context) mod K + sequence_index mod K) mod K`
//!
//! `fnv1a64` is 64-bit FNV-1a over the UTF-8 bytes of the routing context.
//! The hash is fixed so assignments are reproducible across runs and
//! platforms. Consecutive segments of one routing context rotate through all
//! `K` lanes, and sequence indices congruent modulo `K` share a lane.

use crate::core::{SequenceIndex, ShardKey};

/// FNV-1a 64-bit offset basis
const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;

/// FNV-1a 64-bit prime
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Stable 64-bit hash of a routing context (FNV-1a)
pub fn routing_hash(routing_context: &str) -> u64 {
    routing_context
        .as_bytes()
        .iter()
        .fold(FNV_OFFSET_BASIS, |hash, byte| {
            (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME)
        })
}

/// Shard key for a segment; `key_range_size` must be non-zero.
pub fn shard_key(
    routing_context: &str,
    sequence_index: SequenceIndex,
    key_range_size: u32,
) -> ShardKey {
    debug_assert!(key_range_size > 0, "key range size must be positive");
    let range = u64::from(key_range_size.max(1));
    let base = routing_hash(routing_context) % range;
    ((base + sequence_index % range) % range) as ShardKey
}
