//! Merkle commitment over transaction hashes.
use crate::crypto::{sha3_256, sha3_256_concat};
use crate::types::Hash;

/// Root of an empty transaction list: SHA3-256 of the empty string.
pub fn empty_root() -> Hash {
    sha3_256(b"")
}

/// Leaves are taken in the given order. A level with an odd count pairs
/// its last hash with itself; parents are `H(left ++ right)` over raw bytes.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return empty_root();
    }
    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            next.push(sha3_256_concat(&[left.as_bytes(), right.as_bytes()]));
        }
        level = next;
    }
    level[0]
}
