//! Core blockchain primitives for tpschain.
//!
//! This crate provides the types every other part of the node agrees on:
//! - Cryptographic primitives (hashing, signing)
//! - Proof-of-work prefixes and nonce search
//! - Transactions
//! - Blocks, block headers and merkle roots
//! - The canonical binary codec and the outbound message envelope

pub mod block;
pub mod codec;
pub mod crypto;
pub mod hash;
pub mod merkle;
pub mod message;
pub mod pow;
pub mod transaction;

// Re-export commonly used types at the crate root
pub use block::{Block, BlockError, BlockHeader};
pub use codec::{CodecError, KEY_FIELD_SIZE};
pub use crypto::{CryptoError, Keypair, PublicKey, Signature};
pub use hash::{hash, hash_concat, Hash, H256};
pub use merkle::merkle_root;
pub use message::{Message, MessageKind};
pub use pow::PowPrefix;
pub use transaction::{current_timestamp, Transaction, TransactionError, TransactionHeader};
