//! Blake3 digests for transactions, blocks and merkle nodes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Width in bytes of every digest on the wire.
pub const HASH_SIZE: usize = 32;

pub type H256 = [u8; HASH_SIZE];

/// A 256-bit Blake3 digest. Displays as `0x`-prefixed hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash(pub H256);

impl Hash {
    /// Previous-block hash of a genesis block.
    pub const ZERO: Self = Self([0u8; HASH_SIZE]);

    pub fn from_bytes(bytes: H256) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &H256 {
        &self.0
    }

    pub fn starts_with(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }

    pub fn leading_zero_bytes(&self) -> usize {
        self.0.iter().position(|b| *b != 0).unwrap_or(HASH_SIZE)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse exactly 64 hex digits, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let mut out = Self::ZERO;
        hex::decode_to_slice(digits, &mut out.0)?;
        Ok(out)
    }
}

impl FromStr for Hash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First four bytes are enough to tell blocks apart in logs.
        write!(f, "Hash({}..)", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl From<H256> for Hash {
    fn from(bytes: H256) -> Self {
        Self(bytes)
    }
}

impl From<Hash> for H256 {
    fn from(digest: Hash) -> Self {
        digest.0
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

pub fn hash(data: &[u8]) -> Hash {
    Hash(*blake3::hash(data).as_bytes())
}

/// Digest of the concatenation of `parts`, without building the joined buffer.
pub fn hash_concat(parts: &[&[u8]]) -> Hash {
    let digest = parts
        .iter()
        .fold(blake3::Hasher::new(), |mut hasher, part| {
            hasher.update(part);
            hasher
        })
        .finalize();
    Hash(*digest.as_bytes())
}
