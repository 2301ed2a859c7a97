//! Reconciling blocks received from peers with the local pending set.

use crate::chain_state::ChainState;
use serde::Serialize;
use std::fmt;
use tpschain_core::{Block, BlockError, Hash, PowPrefix, Transaction};

/// The span between our head and a received block whose parent we lack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MissingRange {
    pub local_head: Hash,
    pub received: Hash,
    pub received_prev: Hash,
}

impl fmt::Display for MissingRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} .. {} (parent {})",
            self.local_head, self.received, self.received_prev
        )
    }
}

/// What happened to an inbound block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Already in the local chain.
    Known,
    /// Failed verification.
    Rejected(BlockError),
    /// Extended the local head; `residual` is what stays pending.
    Accepted { residual: Vec<Transaction> },
    /// Does not build on the local head.
    Gap(MissingRange),
}

/// Decide the fate of `block` and apply it to `chain`.
///
/// Only an accepted block changes the chain. The caller rebuilds its pending
/// block from the returned residual set.
pub fn reconcile(
    chain: &mut ChainState,
    pending: &[Transaction],
    block: Block,
    prefix: &PowPrefix,
) -> Reconciliation {
    let hash = block.hash();
    if chain.contains(&hash) {
        return Reconciliation::Known;
    }
    if let Err(err) = block.validate(prefix) {
        return Reconciliation::Rejected(err);
    }

    let local_head = chain.head_hash();
    if block.header.prev_block_hash != local_head {
        return Reconciliation::Gap(MissingRange {
            local_head,
            received: hash,
            received_prev: block.header.prev_block_hash,
        });
    }

    let residual = diff_transaction_slices(pending, &block.transactions);
    chain.push_head(block);
    Reconciliation::Accepted { residual }
}

/// Transactions of `a` whose signature is not found in `b`.
///
/// Both slices are assumed to share an order: the scan over `b` resumes
/// from the last match instead of restarting.
pub fn diff_transaction_slices(a: &[Transaction], b: &[Transaction]) -> Vec<Transaction> {
    let mut diff = Vec::new();
    let mut cursor = 0;
    for tx in a {
        match b[cursor..].iter().position(|other| other.signature == tx.signature) {
            Some(offset) => cursor += offset,
            None => diff.push(tx.clone()),
        }
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpschain_core::Keypair;

    fn pow() -> PowPrefix {
        PowPrefix::repeat(0, 1)
    }

    fn txs(keypair: &Keypair, n: u8) -> Vec<Transaction> {
        (0..n)
            .map(|i| {
                Transaction::new(Some(keypair.public_key.clone()), None, vec![i])
                    .mined(&pow())
                    .signed(keypair)
            })
            .collect()
    }

    fn peer_block(peer: &Keypair, prev: Hash, included: &[Transaction]) -> Block {
        let mut block = Block::new(prev);
        for tx in included {
            block.add_transaction(tx.clone());
        }
        block.seal(peer, &pow(), 1_700_000_000);
        block
    }

    fn signatures(txs: &[Transaction]) -> Vec<tpschain_core::Signature> {
        txs.iter().map(|tx| tx.signature).collect()
    }

    #[test]
    fn test_diff_keeps_unmatched_in_order() {
        let keypair = Keypair::generate();
        let all = txs(&keypair, 5);
        let included = vec![all[1].clone(), all[3].clone()];

        let diff = diff_transaction_slices(&all, &included);
        assert_eq!(
            signatures(&diff),
            signatures(&[all[0].clone(), all[2].clone(), all[4].clone()])
        );
    }

    #[test]
    fn test_diff_against_empty_and_self() {
        let keypair = Keypair::generate();
        let all = txs(&keypair, 3);
        assert_eq!(diff_transaction_slices(&all, &[]).len(), 3);
        assert!(diff_transaction_slices(&all, &all).is_empty());
        assert!(diff_transaction_slices(&[], &all).is_empty());
    }

    #[test]
    fn test_diff_cursor_does_not_rewind() {
        let keypair = Keypair::generate();
        let all = txs(&keypair, 3);
        // Once all[2] matched, all[1] sits behind the cursor and is not found.
        let a = vec![all[0].clone(), all[2].clone(), all[1].clone()];
        let diff = diff_transaction_slices(&a, &all);
        assert_eq!(signatures(&diff), signatures(&[all[1].clone()]));
    }

    #[test]
    fn test_accept_block_on_head() {
        let local = Keypair::generate();
        let peer = Keypair::generate();
        let pending = txs(&local, 4);
        let mut chain = ChainState::new();

        let block = peer_block(&peer, Hash::ZERO, &pending[..2]);
        let hash = block.hash();

        match reconcile(&mut chain, &pending, block, &pow()) {
            Reconciliation::Accepted { residual } => {
                assert_eq!(signatures(&residual), signatures(&pending[2..]));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(chain.head_hash(), hash);
    }

    #[test]
    fn test_known_block_ignored() {
        let peer = Keypair::generate();
        let mut chain = ChainState::new();
        let block = peer_block(&peer, Hash::ZERO, &[]);

        chain.push_head(block.clone());
        assert_eq!(
            reconcile(&mut chain, &[], block, &pow()),
            Reconciliation::Known
        );
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn test_invalid_block_rejected() {
        let peer = Keypair::generate();
        let mut chain = ChainState::new();
        let mut block = peer_block(&peer, Hash::ZERO, &txs(&peer, 2));
        block.transactions.pop();

        assert_eq!(
            reconcile(&mut chain, &[], block, &pow()),
            Reconciliation::Rejected(BlockError::InvalidMerkleRoot)
        );
        assert!(chain.is_empty());
    }

    #[test]
    fn test_unknown_parent_is_gap() {
        let peer = Keypair::generate();
        let mut chain = ChainState::new();
        let parent = tpschain_core::hash(b"somewhere else");
        let block = peer_block(&peer, parent, &[]);
        let hash = block.hash();

        assert_eq!(
            reconcile(&mut chain, &[], block, &pow()),
            Reconciliation::Gap(MissingRange {
                local_head: Hash::ZERO,
                received: hash,
                received_prev: parent,
            })
        );
        assert!(chain.is_empty());
    }
}
