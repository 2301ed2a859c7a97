//! Canonical binary encoding for transactions and blocks.
//!
//! Integers are big-endian. Hash fields are 32 bytes, key and signature fields
//! are [`KEY_FIELD_SIZE`] bytes, zero-padded on the left. Every field goes
//! through [`fit_bytes_into`] on the way out. Key and signature fields are
//! narrowed back to their natural width on the way in, so a value that lost
//! its leading zero bytes still compares equal after decoding.
//!
//! ```text
//! transaction: nonce u64 | timestamp u32 | sender[64] | recipient[64]
//!              | payload_len u32 | payload | signature[64]
//! block:       prev_block_hash[32] | merkle_root[32] | origin[64] | nonce u64
//!              | timestamp u32 | signature[64] | tx_count u32 | (tx_len u32 | tx)*
//! ```

use crate::block::{Block, BlockHeader};
use crate::crypto::{PublicKey, Signature, PUBLIC_KEY_SIZE, SIGNATURE_SIZE};
use crate::hash::{Hash, HASH_SIZE};
use crate::transaction::{Transaction, TransactionHeader};
use thiserror::Error;

/// Width of public key and signature fields on the wire.
pub const KEY_FIELD_SIZE: usize = 64;

/// Smallest possible encoded transaction (empty payload).
const MIN_TRANSACTION_SIZE: usize = 8 + 4 + KEY_FIELD_SIZE * 3 + 4;

/// Errors produced while encoding or decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("invalid public key field")]
    InvalidPublicKey,

    #[error("value of {len} bytes does not fit a {width}-byte field")]
    FieldOverflow { len: usize, width: usize },

    #[error("{0} trailing bytes after encoded value")]
    TrailingBytes(usize),

    #[error("unknown message kind {0}")]
    UnknownMessageKind(u8),
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Left-pad `bytes` with zeros to exactly `width` bytes.
pub fn fit_bytes_into(bytes: &[u8], width: usize) -> Result<Vec<u8>> {
    if bytes.len() > width {
        return Err(CodecError::FieldOverflow {
            len: bytes.len(),
            width,
        });
    }
    let mut out = vec![0u8; width];
    out[width - bytes.len()..].copy_from_slice(bytes);
    Ok(out)
}

/// Drop leading zero bytes.
pub fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn put_len(out: &mut Vec<u8>, len: usize) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| CodecError::FieldOverflow {
        len,
        width: u32::MAX as usize,
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

fn put_hash(out: &mut Vec<u8>, hash: &Hash) -> Result<()> {
    out.extend_from_slice(&fit_bytes_into(hash.as_ref(), HASH_SIZE)?);
    Ok(())
}

fn put_key(out: &mut Vec<u8>, key: Option<&PublicKey>) -> Result<()> {
    let raw = key.map(|k| k.as_bytes().to_vec()).unwrap_or_default();
    out.extend_from_slice(&fit_bytes_into(&raw, KEY_FIELD_SIZE)?);
    Ok(())
}

fn put_signature(out: &mut Vec<u8>, signature: &Signature) -> Result<()> {
    out.extend_from_slice(&fit_bytes_into(signature.as_bytes(), KEY_FIELD_SIZE)?);
    Ok(())
}

/// Cursor over an input buffer.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8]> {
        if needed > self.buf.len() {
            return Err(CodecError::UnexpectedEof {
                needed,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(needed);
        self.buf = tail;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32> {
        let mut arr = [0u8; 4];
        arr.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(arr))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut arr = [0u8; 8];
        arr.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(arr))
    }

    fn hash(&mut self) -> Result<Hash> {
        // The field is already full width, leading zeros included.
        let mut arr = [0u8; HASH_SIZE];
        arr.copy_from_slice(self.take(HASH_SIZE)?);
        Ok(Hash::from_bytes(arr))
    }

    fn key(&mut self) -> Result<Option<PublicKey>> {
        let significant = strip_leading_zeros(self.take(KEY_FIELD_SIZE)?);
        if significant.is_empty() {
            return Ok(None);
        }
        let raw = fit_bytes_into(significant, PUBLIC_KEY_SIZE)
            .map_err(|_| CodecError::InvalidPublicKey)?;
        let mut arr = [0u8; PUBLIC_KEY_SIZE];
        arr.copy_from_slice(&raw);
        PublicKey::from_bytes(&arr)
            .map(Some)
            .map_err(|_| CodecError::InvalidPublicKey)
    }

    fn signature(&mut self) -> Result<Signature> {
        let significant = strip_leading_zeros(self.take(KEY_FIELD_SIZE)?);
        let raw = fit_bytes_into(significant, SIGNATURE_SIZE)?;
        let mut arr = [0u8; SIGNATURE_SIZE];
        arr.copy_from_slice(&raw);
        Ok(Signature::from_bytes(arr))
    }

    fn finish(self) -> Result<()> {
        match self.buf.len() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

impl Transaction {
    /// Encode into the canonical binary form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(MIN_TRANSACTION_SIZE + self.payload.len());
        self.encode_into(&mut out)?;
        Ok(out)
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.header.nonce.to_be_bytes());
        out.extend_from_slice(&self.header.timestamp.to_be_bytes());
        put_key(out, self.sender.as_ref())?;
        put_key(out, self.recipient.as_ref())?;
        put_len(out, self.payload.len())?;
        out.extend_from_slice(&self.payload);
        put_signature(out, &self.signature)
    }

    /// Decode a transaction; the whole input must be consumed.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let tx = Self::decode_from(&mut reader)?;
        reader.finish()?;
        Ok(tx)
    }

    fn decode_from(reader: &mut Reader<'_>) -> Result<Self> {
        let nonce = reader.u64()?;
        let timestamp = reader.u32()?;
        let sender = reader.key()?;
        let recipient = reader.key()?;
        let payload_len = reader.u32()? as usize;
        let payload = reader.take(payload_len)?.to_vec();
        let signature = reader.signature()?;
        Ok(Self {
            header: TransactionHeader { nonce, timestamp },
            sender,
            recipient,
            payload,
            signature,
        })
    }
}

impl Block {
    /// Encode into the canonical binary form.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        put_hash(&mut out, &self.header.prev_block_hash)?;
        put_hash(&mut out, &self.header.merkle_root)?;
        put_key(&mut out, self.header.origin.as_ref())?;
        out.extend_from_slice(&self.header.nonce.to_be_bytes());
        out.extend_from_slice(&self.header.timestamp.to_be_bytes());
        put_signature(&mut out, &self.signature)?;

        put_len(&mut out, self.transactions.len())?;
        let mut scratch = Vec::new();
        for tx in &self.transactions {
            scratch.clear();
            tx.encode_into(&mut scratch)?;
            put_len(&mut out, scratch.len())?;
            out.extend_from_slice(&scratch);
        }
        Ok(out)
    }

    /// Decode a block; the whole input must be consumed.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let prev_block_hash = reader.hash()?;
        let merkle_root = reader.hash()?;
        let origin = reader.key()?;
        let nonce = reader.u64()?;
        let timestamp = reader.u32()?;
        let signature = reader.signature()?;

        let count = reader.u32()? as usize;
        // Never trust the declared count for the allocation size.
        let mut transactions = Vec::with_capacity(count.min(reader.remaining() / MIN_TRANSACTION_SIZE));
        for _ in 0..count {
            let len = reader.u32()? as usize;
            transactions.push(Transaction::decode(reader.take(len)?)?);
        }
        reader.finish()?;

        Ok(Self {
            header: BlockHeader {
                prev_block_hash,
                merkle_root,
                origin,
                nonce,
                timestamp,
            },
            transactions,
            signature,
        })
    }
}
