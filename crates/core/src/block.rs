//! Blocks: a signed, proof-of-work sealed header over an ordered transaction list.

use crate::crypto::{Keypair, PublicKey, Signature};
use crate::hash::Hash;
use crate::merkle::merkle_root;
use crate::pow::{search_nonce, search_nonce_until, PowPrefix};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use thiserror::Error;

/// Reasons a block fails verification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("merkle root does not match the transactions")]
    InvalidMerkleRoot,
    #[error("header hash {0} does not meet the proof-of-work prefix")]
    InsufficientWork(Hash),
    #[error("block has no origin")]
    MissingOrigin,
    #[error("block signature verification failed")]
    InvalidSignature,
}

/// Fields covered by the block hash.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Hash of the previous block (zero for the first block).
    pub prev_block_hash: Hash,
    /// Root over the transaction hashes, `Hash::ZERO` for an empty block.
    pub merkle_root: Hash,
    /// Key of whoever sealed and signed the block.
    pub origin: Option<PublicKey>,
    /// Proof-of-work nonce.
    pub nonce: u64,
    /// Unix timestamp in seconds, stamped at sealing.
    pub timestamp: u32,
}

#[derive(Serialize)]
struct HeaderView<'a> {
    prev_block_hash: &'a Hash,
    merkle_root: &'a Hash,
    origin: Option<&'a PublicKey>,
    nonce: u64,
    timestamp: u32,
}

impl BlockHeader {
    /// Blake3 over the bincode form of the header.
    pub fn hash(&self) -> Hash {
        self.hash_with_nonce(self.nonce)
    }

    fn hash_with_nonce(&self, nonce: u64) -> Hash {
        let view = HeaderView {
            prev_block_hash: &self.prev_block_hash,
            merkle_root: &self.merkle_root,
            origin: self.origin.as_ref(),
            nonce,
            timestamp: self.timestamp,
        };
        let mut hasher = blake3::Hasher::new();
        bincode::serialize_into(&mut hasher, &view).expect("serialization should not fail");
        Hash(hasher.finalize().into())
    }
}

/// A header with its transactions and the origin's signature over the header hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    /// Transactions in inclusion order.
    pub transactions: Vec<Transaction>,
    /// Origin signature over the header hash.
    pub signature: Signature,
}

impl Block {
    /// Create an empty, unsealed block on top of `prev_block_hash`.
    pub fn new(prev_block_hash: Hash) -> Self {
        Self::with_capacity(prev_block_hash, 0)
    }

    /// Create an empty block with room for `capacity` transactions.
    pub fn with_capacity(prev_block_hash: Hash, capacity: usize) -> Self {
        Self {
            header: BlockHeader {
                prev_block_hash,
                ..BlockHeader::default()
            },
            transactions: Vec::with_capacity(capacity),
            signature: Signature::default(),
        }
    }

    /// Append a transaction. The merkle root is only refreshed at sealing.
    pub fn add_transaction(&mut self, tx: Transaction) {
        self.transactions.push(tx);
    }

    /// Identity of the block. Transactions enter only through the merkle root.
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Recompute the merkle root over the current transactions.
    pub fn generate_merkle_root(&self) -> Hash {
        let tx_hashes: Vec<Hash> = self.transactions.iter().map(|tx| tx.hash()).collect();
        merkle_root(&tx_hashes)
    }

    /// Find a nonce whose header hash starts with `prefix`.
    pub fn generate_nonce(&self, prefix: &PowPrefix) -> u64 {
        search_nonce(prefix, |nonce| self.header.hash_with_nonce(nonce))
    }

    /// Like [`Block::generate_nonce`], giving up once `abandon` is set.
    pub fn generate_nonce_until(&self, prefix: &PowPrefix, abandon: &AtomicBool) -> Option<u64> {
        search_nonce_until(prefix, abandon, |nonce| self.header.hash_with_nonce(nonce))
    }

    /// Sign the header hash.
    pub fn sign(&self, keypair: &Keypair) -> Signature {
        keypair.sign_hash(&self.hash())
    }

    /// Verify the signature against the header's origin.
    pub fn verify_signature(&self) -> bool {
        self.header
            .origin
            .as_ref()
            .is_some_and(|origin| origin.verify_hash(&self.hash(), &self.signature))
    }

    /// Whether the stored merkle root still matches the transactions.
    pub fn verify_merkle_root(&self) -> bool {
        self.generate_merkle_root() == self.header.merkle_root
    }

    /// Check merkle root, proof-of-work and signature, reporting the first failure.
    pub fn validate(&self, prefix: &PowPrefix) -> Result<(), BlockError> {
        if !self.verify_merkle_root() {
            return Err(BlockError::InvalidMerkleRoot);
        }
        let hash = self.hash();
        if !prefix.is_satisfied_by(&hash) {
            return Err(BlockError::InsufficientWork(hash));
        }
        let origin = self.header.origin.as_ref().ok_or(BlockError::MissingOrigin)?;
        if !origin.verify_hash(&hash, &self.signature) {
            return Err(BlockError::InvalidSignature);
        }
        Ok(())
    }

    /// True iff all of merkle root, proof-of-work and signature check out.
    pub fn verify_block(&self, prefix: &PowPrefix) -> bool {
        self.validate(prefix).is_ok()
    }

    /// Finalize the block: stamp, commit transactions, mine and sign.
    pub fn seal(&mut self, keypair: &Keypair, prefix: &PowPrefix, timestamp: u32) {
        self.prepare_seal(keypair, timestamp);
        self.header.nonce = self.generate_nonce(prefix);
        self.signature = self.sign(keypair);
    }

    /// [`Block::seal`] that can be abandoned; returns `false` if it was.
    ///
    /// An abandoned block is left unsigned.
    pub fn seal_until(
        &mut self,
        keypair: &Keypair,
        prefix: &PowPrefix,
        timestamp: u32,
        abandon: &AtomicBool,
    ) -> bool {
        self.prepare_seal(keypair, timestamp);
        match self.generate_nonce_until(prefix, abandon) {
            Some(nonce) => {
                self.header.nonce = nonce;
                self.signature = self.sign(keypair);
                true
            }
            None => false,
        }
    }

    fn prepare_seal(&mut self, keypair: &Keypair, timestamp: u32) {
        self.header.timestamp = timestamp;
        self.header.origin = Some(keypair.public_key.clone());
        self.header.merkle_root = self.generate_merkle_root();
    }
}
