//! Transaction types, proof-of-work and signing.

use crate::crypto::{Keypair, PublicKey, Signature};
use crate::hash::Hash;
use crate::pow::{search_nonce, search_nonce_until, PowPrefix};
use serde::{Deserialize, Serialize};
use std::sync::atomic::AtomicBool;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Reasons a transaction fails admission.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction has no sender")]
    MissingSender,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("hash {0} does not meet the proof-of-work prefix")]
    InsufficientWork(Hash),
}

/// Current Unix time in seconds, as carried in headers.
pub fn current_timestamp() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or_default()
}

/// Fields covered by the proof-of-work besides the identities and payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionHeader {
    /// Proof-of-work nonce.
    pub nonce: u64,
    /// Unix timestamp in seconds.
    pub timestamp: u32,
}

/// An opaque payload with optional sender and recipient, mined and signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub header: TransactionHeader,
    /// Signer of the transaction; `None` for an anonymous (unsignable) one.
    pub sender: Option<PublicKey>,
    pub recipient: Option<PublicKey>,
    /// Opaque application payload.
    pub payload: Vec<u8>,
    /// Sender's signature over [`Transaction::hash`].
    pub signature: Signature,
}

/// Borrowed view of everything except the signature (for hashing).
#[derive(Serialize)]
struct UnsignedTransaction<'a> {
    header: TransactionHeader,
    sender: Option<&'a PublicKey>,
    recipient: Option<&'a PublicKey>,
    payload: &'a [u8],
}

impl Transaction {
    /// Create a new unsigned transaction with nonce zero.
    pub fn new(sender: Option<PublicKey>, recipient: Option<PublicKey>, payload: Vec<u8>) -> Self {
        Self {
            header: TransactionHeader {
                nonce: 0,
                timestamp: current_timestamp(),
            },
            sender,
            recipient,
            payload,
            signature: Signature::default(),
        }
    }

    /// Content hash over header, identities and payload. Excludes the signature.
    pub fn hash(&self) -> Hash {
        self.hash_with_nonce(self.header.nonce)
    }

    fn hash_with_nonce(&self, nonce: u64) -> Hash {
        let unsigned = UnsignedTransaction {
            header: TransactionHeader {
                nonce,
                ..self.header
            },
            sender: self.sender.as_ref(),
            recipient: self.recipient.as_ref(),
            payload: &self.payload,
        };
        let mut hasher = blake3::Hasher::new();
        bincode::serialize_into(&mut hasher, &unsigned).expect("serialization should not fail");
        Hash(hasher.finalize().into())
    }

    /// Find a nonce whose hash starts with `prefix`. Does not modify `self`.
    pub fn generate_nonce(&self, prefix: &PowPrefix) -> u64 {
        search_nonce(prefix, |nonce| self.hash_with_nonce(nonce))
    }

    /// Like [`Transaction::generate_nonce`], giving up once `abandon` is set.
    pub fn generate_nonce_until(&self, prefix: &PowPrefix, abandon: &AtomicBool) -> Option<u64> {
        search_nonce_until(prefix, abandon, |nonce| self.hash_with_nonce(nonce))
    }

    /// Search and store a proof-of-work nonce.
    pub fn mined(mut self, prefix: &PowPrefix) -> Self {
        self.header.nonce = self.generate_nonce(prefix);
        self
    }

    /// Sign the transaction hash.
    ///
    /// The nonce is part of the hash, so sign after mining.
    pub fn sign(&self, keypair: &Keypair) -> Signature {
        keypair.sign_hash(&self.hash())
    }

    /// Builder form of [`Transaction::sign`].
    pub fn signed(mut self, keypair: &Keypair) -> Self {
        self.signature = self.sign(keypair);
        self
    }

    /// Verify the signature against `public_key`.
    pub fn verify_signature(&self, public_key: &PublicKey) -> bool {
        public_key.verify_hash(&self.hash(), &self.signature)
    }

    /// Check signature and proof-of-work, reporting the first failure.
    pub fn validate(&self, prefix: &PowPrefix) -> Result<(), TransactionError> {
        let sender = self.sender.as_ref().ok_or(TransactionError::MissingSender)?;
        let hash = self.hash();
        if !sender.verify_hash(&hash, &self.signature) {
            return Err(TransactionError::VerificationFailed);
        }
        if !prefix.is_satisfied_by(&hash) {
            return Err(TransactionError::InsufficientWork(hash));
        }
        Ok(())
    }

    /// True iff the signature verifies and the hash satisfies `prefix`.
    pub fn verify_transaction(&self, prefix: &PowPrefix) -> bool {
        self.validate(prefix).is_ok()
    }
}
