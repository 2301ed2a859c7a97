//! Envelope for everything that leaves the node.

use crate::block::Block;
use crate::codec::{CodecError, Result};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};

/// What a [`Message`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageKind {
    SendTransaction = 1,
    SendBlock = 2,
}

impl MessageKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::SendTransaction),
            2 => Ok(Self::SendBlock),
            other => Err(CodecError::UnknownMessageKind(other)),
        }
    }
}

/// An outbound message: a kind tag plus the canonical encoding of its body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub data: Vec<u8>,
}

impl Message {
    pub fn transaction(tx: &Transaction) -> Result<Self> {
        Ok(Self {
            kind: MessageKind::SendTransaction,
            data: tx.encode()?,
        })
    }

    pub fn block(block: &Block) -> Result<Self> {
        Ok(Self {
            kind: MessageKind::SendBlock,
            data: block.encode()?,
        })
    }

    /// Wire form: `kind u8 | data`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.data.len());
        out.push(self.kind.as_u8());
        out.extend_from_slice(&self.data);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&tag, data) = bytes.split_first().ok_or(CodecError::UnexpectedEof {
            needed: 1,
            remaining: 0,
        })?;
        Ok(Self {
            kind: MessageKind::try_from(tag)?,
            data: data.to_vec(),
        })
    }

    /// Decode the body as a transaction, if that is what this message carries.
    pub fn to_transaction(&self) -> Option<Result<Transaction>> {
        (self.kind == MessageKind::SendTransaction).then(|| Transaction::decode(&self.data))
    }

    /// Decode the body as a block, if that is what this message carries.
    pub fn to_block(&self) -> Option<Result<Block>> {
        (self.kind == MessageKind::SendBlock).then(|| Block::decode(&self.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;
    use crate::hash::Hash;
    use crate::pow::PowPrefix;

    #[test]
    fn test_block_message_carries_block() {
        let keypair = Keypair::generate();
        let mut block = Block::new(Hash::ZERO);
        block.seal(&keypair, &PowPrefix::none(), 7);

        let msg = Message::block(&block).unwrap();
        assert_eq!(msg.kind, MessageKind::SendBlock);
        assert!(msg.to_transaction().is_none());

        let wire = msg.encode();
        assert_eq!(wire[0], 2);
        let decoded = Message::decode(&wire).unwrap();
        assert_eq!(decoded.to_block().unwrap().unwrap().hash(), block.hash());
    }

    #[test]
    fn test_transaction_message_carries_transaction() {
        let keypair = Keypair::generate();
        let tx = Transaction::new(Some(keypair.public_key.clone()), None, b"relay".to_vec())
            .signed(&keypair);

        let msg = Message::transaction(&tx).unwrap();
        assert_eq!(msg.encode()[0], 1);
        assert_eq!(msg.to_transaction().unwrap().unwrap(), tx);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert_eq!(
            Message::decode(&[9, 1, 2]),
            Err(CodecError::UnknownMessageKind(9))
        );
        assert!(matches!(
            Message::decode(&[]),
            Err(CodecError::UnexpectedEof { .. })
        ));
    }
}
