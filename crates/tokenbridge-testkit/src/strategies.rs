//! Proptest strategies

use proptest::prelude::*;
use tokenbridge_core::CHUNK_SIZE_BYTES;

/// File sizes from empty up to a little over four nominal chunks
pub fn file_size() -> impl Strategy<Value = u64> {
    prop_oneof![
        Just(0u64),
        1u64..=1024,
        (CHUNK_SIZE_BYTES - 16)..=(CHUNK_SIZE_BYTES + 16),
        0u64..=(4 * CHUNK_SIZE_BYTES + 1),
    ]
}

/// Distinct recipient ids
pub fn recipient_ids(max: usize) -> impl Strategy<Value = Vec<String>> {
    (0..=max).prop_map(|count| (0..count).map(|index| format!("user-{index}")).collect())
}

/// Chunk sizes an agent might use for a file of `size` bytes, never zero
pub fn chunk_lengths(size: u64) -> impl Strategy<Value = Vec<u64>> {
    proptest::collection::vec(1u64..=(CHUNK_SIZE_BYTES), 1..8).prop_map(move |weights| {
        let mut lengths = Vec::new();
        let mut remaining = size;
        for weight in weights {
            if remaining == 0 {
                break;
            }
            let take = weight.min(remaining);
            lengths.push(take);
            remaining -= take;
        }
        if remaining > 0 {
            lengths.push(remaining);
        }
        lengths
    })
}
