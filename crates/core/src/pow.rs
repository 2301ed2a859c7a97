//! Proof-of-work prefixes and nonce search.
//!
//! Both transactions and blocks pay for admission by finding a nonce whose
//! content hash starts with a required byte prefix. The search is a plain
//! brute-force walk over the nonce space starting at zero; it has no internal
//! timeout. Callers that need to give up early use [`search_nonce_until`] and
//! raise the abandon flag from another thread.

use crate::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};

/// How many attempts are made between two reads of the abandon flag.
const ABANDON_CHECK_INTERVAL: u64 = 1024;

/// The leading bytes a hash must carry to satisfy proof-of-work.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PowPrefix(Vec<u8>);

impl PowPrefix {
    /// Use an explicit byte prefix.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// A prefix of `complexity` copies of `value`, e.g. `repeat(0, 2)` = `[0, 0]`.
    pub fn repeat(value: u8, complexity: usize) -> Self {
        Self(vec![value; complexity])
    }

    /// The empty prefix, satisfied by every hash.
    pub fn none() -> Self {
        Self(Vec::new())
    }

    /// Required bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of required bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `hash` carries this prefix.
    pub fn is_satisfied_by(&self, hash: &Hash) -> bool {
        hash.starts_with(&self.0)
    }
}

/// Walk nonces upward from zero until `hash_at(nonce)` satisfies `prefix`.
///
/// Runs until it succeeds. The expected number of attempts is `256^len`.
pub fn search_nonce<F>(prefix: &PowPrefix, mut hash_at: F) -> u64
where
    F: FnMut(u64) -> Hash,
{
    let mut nonce = 0u64;
    loop {
        if prefix.is_satisfied_by(&hash_at(nonce)) {
            return nonce;
        }
        nonce = nonce.wrapping_add(1);
    }
}

/// Same walk as [`search_nonce`], but returns `None` once `abandon` is set.
pub fn search_nonce_until<F>(prefix: &PowPrefix, abandon: &AtomicBool, mut hash_at: F) -> Option<u64>
where
    F: FnMut(u64) -> Hash,
{
    let mut nonce = 0u64;
    loop {
        if nonce % ABANDON_CHECK_INTERVAL == 0 && abandon.load(Ordering::Relaxed) {
            return None;
        }
        if prefix.is_satisfied_by(&hash_at(nonce)) {
            return Some(nonce);
        }
        nonce = nonce.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash;

    #[test]
    fn test_repeat_prefix() {
        assert_eq!(PowPrefix::repeat(0, 2).as_bytes(), &[0, 0]);
        assert_eq!(PowPrefix::repeat(7, 1).len(), 1);
        assert!(PowPrefix::none().is_empty());
    }

    #[test]
    fn test_empty_prefix_accepts_anything() {
        let nonce = search_nonce(&PowPrefix::none(), |n| hash(&n.to_be_bytes()));
        assert_eq!(nonce, 0);
    }

    #[test]
    fn test_search_finds_one_byte_prefix() {
        let prefix = PowPrefix::repeat(0, 1);
        let mut attempts = 0u64;
        let nonce = search_nonce(&prefix, |n| {
            attempts += 1;
            hash_concat_nonce(b"payload", n)
        });

        assert!(prefix.is_satisfied_by(&hash_concat_nonce(b"payload", nonce)));
        // Expected 256 attempts; the chance of needing more than 8192 is below 1e-13.
        assert!(attempts <= 8192, "took {attempts} attempts");
    }

    #[test]
    fn test_search_is_deterministic() {
        let prefix = PowPrefix::repeat(0, 1);
        let a = search_nonce(&prefix, |n| hash_concat_nonce(b"abc", n));
        let b = search_nonce(&prefix, |n| hash_concat_nonce(b"abc", n));
        assert_eq!(a, b);
    }

    #[test]
    fn test_abandoned_search_returns_none() {
        let abandon = AtomicBool::new(true);
        // An impossible prefix: longer than any digest.
        let prefix = PowPrefix::repeat(0, 33);
        assert_eq!(search_nonce_until(&prefix, &abandon, |n| hash(&n.to_be_bytes())), None);
    }

    #[test]
    fn test_search_until_matches_unbounded_search() {
        let abandon = AtomicBool::new(false);
        let prefix = PowPrefix::repeat(0, 1);
        let bounded = search_nonce_until(&prefix, &abandon, |n| hash_concat_nonce(b"x", n));
        let unbounded = search_nonce(&prefix, |n| hash_concat_nonce(b"x", n));
        assert_eq!(bounded, Some(unbounded));
    }

    fn hash_concat_nonce(data: &[u8], nonce: u64) -> Hash {
        crate::hash::hash_concat(&[data, &nonce.to_be_bytes()])
    }
}
