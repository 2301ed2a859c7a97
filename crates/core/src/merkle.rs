//! Merkle root computation for transaction commitments.

use crate::hash::{hash_concat, Hash};

/// Compute the merkle root of a list of hashes.
///
/// Adjacent hashes are paired and the concatenation hashed, level by level.
/// When a level has an odd count, the unmatched trailing hash is carried up to
/// the next level unchanged. Returns the zero hash for an empty list and the
/// leaf itself for a single entry.
pub fn merkle_root(hashes: &[Hash]) -> Hash {
    if hashes.is_empty() {
        return Hash::ZERO;
    }

    let mut current_level: Vec<Hash> = hashes.to_vec();

    while current_level.len() > 1 {
        current_level = next_level(&current_level);
    }

    current_level[0]
}

fn next_level(level: &[Hash]) -> Vec<Hash> {
    level
        .chunks(2)
        .map(|chunk| match chunk {
            [left, right] => hash_concat(&[left.as_ref(), right.as_ref()]),
            [single] => *single,
            _ => unreachable!("chunks(2) yields one or two elements"),
        })
        .collect()
}
