//! Block assembly.
//!
//! One task owns the pending block and the local chain. It pulls accepted
//! transactions until the block is full or the generation timeout fires,
//! seals the block, and hands it to the broadcaster. Inbound blocks are
//! reconciled here too, so nothing else ever touches the pending set.

use crate::broadcast::SealedBlock;
use crate::chain_state::ChainState;
use crate::error::Result;
use crate::reconcile::{reconcile, MissingRange, Reconciliation};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use tpschain_core::{current_timestamp, Block, Hash, Keypair, Message, PowPrefix, Transaction};

/// Upper bound on the transaction slots reserved up front for a pending block.
const PRESIZED_SLOTS: usize = 1024;

/// Why a seal was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SealTrigger {
    Full,
    Timeout,
    Shutdown,
}

/// Where the assembler left the chain when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblerSummary {
    pub blocks_sealed: u64,
    pub blocks_accepted: u64,
    pub height: usize,
    pub head: Hash,
}

pub(crate) struct AssemblerSettings {
    pub block_tx_num: usize,
    pub block_gen_timeout: Duration,
    pub block_prefix: PowPrefix,
    pub skip_first_seal: bool,
    pub relay_transactions: bool,
}

impl AssemblerSettings {
    fn presized_slots(&self) -> usize {
        self.block_tx_num.min(PRESIZED_SLOTS)
    }
}

pub(crate) struct Assembler {
    settings: AssemblerSettings,
    keypair: Keypair,
    chain: ChainState,
    pending: Block,
    skip_next_trigger: bool,
    abandon: Arc<AtomicBool>,
    sealed: mpsc::Sender<SealedBlock>,
    outbound: mpsc::UnboundedSender<Message>,
    gaps: mpsc::UnboundedSender<MissingRange>,
    blocks_sealed: u64,
    blocks_accepted: u64,
}

impl Assembler {
    pub(crate) fn new(
        settings: AssemblerSettings,
        keypair: Keypair,
        abandon: Arc<AtomicBool>,
        sealed: mpsc::Sender<SealedBlock>,
        outbound: mpsc::UnboundedSender<Message>,
        gaps: mpsc::UnboundedSender<MissingRange>,
    ) -> Self {
        let chain = ChainState::new();
        let pending = Block::with_capacity(chain.head_hash(), settings.presized_slots());
        Self {
            skip_next_trigger: settings.skip_first_seal,
            settings,
            keypair,
            chain,
            pending,
            abandon,
            sealed,
            outbound,
            gaps,
            blocks_sealed: 0,
            blocks_accepted: 0,
        }
    }

    /// Assemble until the accepted queue closes, then flush what is pending.
    pub(crate) async fn run(
        mut self,
        mut accepted: mpsc::Receiver<Transaction>,
        mut inbound: mpsc::Receiver<Block>,
    ) -> Result<AssemblerSummary> {
        let timeout = self.settings.block_gen_timeout;
        let timer = sleep(timeout);
        tokio::pin!(timer);
        let mut inbound_open = true;

        loop {
            let has_room = self.pending.tx_count() < self.settings.block_tx_num;
            tokio::select! {
                next = accepted.recv(), if has_room => {
                    let Some(tx) = next else { break };
                    self.include(tx);
                    let full = self.pending.tx_count() >= self.settings.block_tx_num;
                    if full && self.trigger(SealTrigger::Full).await? {
                        timer.as_mut().reset(Instant::now() + timeout);
                    }
                }
                () = &mut timer => {
                    self.trigger(SealTrigger::Timeout).await?;
                    timer.as_mut().reset(Instant::now() + timeout);
                }
                next = inbound.recv(), if inbound_open => match next {
                    Some(block) => self.on_inbound(block),
                    None => inbound_open = false,
                },
            }
        }

        if !self.pending.is_empty() {
            self.trigger(SealTrigger::Shutdown).await?;
        }

        Ok(AssemblerSummary {
            blocks_sealed: self.blocks_sealed,
            blocks_accepted: self.blocks_accepted,
            height: self.chain.height(),
            head: self.chain.head_hash(),
        })
    }

    fn include(&mut self, tx: Transaction) {
        if self.settings.relay_transactions {
            match Message::transaction(&tx) {
                Ok(msg) => {
                    if self.outbound.send(msg).is_err() {
                        debug!(hash = %tx.hash(), "outbound boundary closed, transaction not relayed");
                    }
                }
                Err(e) => warn!(hash = %tx.hash(), error = %e, "failed to encode transaction for relay"),
            }
        }
        self.pending.add_transaction(tx);
    }

    /// Handle a seal trigger. Returns whether a block was sealed.
    async fn trigger(&mut self, trigger: SealTrigger) -> Result<bool> {
        if self.skip_next_trigger && trigger != SealTrigger::Shutdown {
            self.skip_next_trigger = false;
            debug!(?trigger, pending = self.pending.tx_count(), "discarding first seal trigger");
            return Ok(false);
        }
        self.skip_next_trigger = false;
        self.seal_pending(trigger).await
    }

    async fn seal_pending(&mut self, trigger: SealTrigger) -> Result<bool> {
        let sealing_started = Instant::now();
        let mut block = std::mem::replace(&mut self.pending, Block::new(Hash::ZERO));
        let keypair = self.keypair.clone();
        let prefix = self.settings.block_prefix.clone();
        let abandon = Arc::clone(&self.abandon);
        let timestamp = current_timestamp();

        let (block, sealed) = tokio::task::spawn_blocking(move || {
            let sealed = block.seal_until(&keypair, &prefix, timestamp, &abandon);
            (block, sealed)
        })
        .await?;

        if !sealed {
            // Abandoned mid-search; the node is going away.
            self.pending = block;
            return Ok(false);
        }

        let hash = self.chain.push_head(block.clone());
        self.pending = Block::with_capacity(hash, self.settings.presized_slots());
        self.blocks_sealed += 1;
        info!(
            %hash,
            ?trigger,
            txs = block.tx_count(),
            height = self.chain.height(),
            nonce = block.header.nonce,
            "sealed block"
        );

        if self.sealed.send(SealedBlock { block, sealing_started }).await.is_err() {
            warn!(%hash, "broadcaster stopped, sealed block not handed off");
        }
        Ok(true)
    }

    fn on_inbound(&mut self, block: Block) {
        let hash = block.hash();
        let outcome = reconcile(
            &mut self.chain,
            &self.pending.transactions,
            block,
            &self.settings.block_prefix,
        );
        match outcome {
            Reconciliation::Known => debug!(%hash, "ignoring known block"),
            Reconciliation::Rejected(reason) => warn!(%hash, %reason, "dropping invalid inbound block"),
            Reconciliation::Accepted { residual } => {
                self.blocks_accepted += 1;
                let mut next = Block::with_capacity(hash, self.settings.presized_slots());
                let dropped = self.pending.tx_count() - residual.len();
                for tx in residual {
                    next.add_transaction(tx);
                }
                self.pending = next;
                info!(%hash, height = self.chain.height(), dropped, "accepted inbound block");
            }
            Reconciliation::Gap(range) => {
                warn!(%range, "inbound block does not extend local head");
                if self.gaps.send(range).is_err() {
                    debug!(%hash, "gap boundary closed, missing range not reported");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Harness {
        accepted: mpsc::Sender<Transaction>,
        inbound: mpsc::Sender<Block>,
        sealed: mpsc::Receiver<SealedBlock>,
        outbound: mpsc::UnboundedReceiver<Message>,
        gaps: mpsc::UnboundedReceiver<MissingRange>,
        task: tokio::task::JoinHandle<Result<AssemblerSummary>>,
    }

    fn settings(block_tx_num: usize, timeout: Duration, skip_first_seal: bool) -> AssemblerSettings {
        AssemblerSettings {
            block_tx_num,
            block_gen_timeout: timeout,
            block_prefix: PowPrefix::none(),
            skip_first_seal,
            relay_transactions: true,
        }
    }

    fn start(settings: AssemblerSettings) -> Harness {
        let (accepted, accepted_rx) = mpsc::channel(64);
        let (inbound, inbound_rx) = mpsc::channel(8);
        let (sealed_tx, sealed) = mpsc::channel(1);
        let (outbound_tx, outbound) = mpsc::unbounded_channel();
        let (gaps_tx, gaps) = mpsc::unbounded_channel();
        let assembler = Assembler::new(
            settings,
            Keypair::generate(),
            Arc::new(AtomicBool::new(false)),
            sealed_tx,
            outbound_tx,
            gaps_tx,
        );
        let task = tokio::spawn(assembler.run(accepted_rx, inbound_rx));
        Harness { accepted, inbound, sealed, outbound, gaps, task }
    }

    fn tx(keypair: &Keypair, i: u8) -> Transaction {
        Transaction::new(Some(keypair.public_key.clone()), None, vec![i]).signed(keypair)
    }

    #[tokio::test]
    async fn test_full_block_seals_immediately() {
        let keypair = Keypair::generate();
        let mut h = start(settings(3, Duration::from_secs(60), false));
        let start = Instant::now();

        for i in 0..3 {
            h.accepted.send(tx(&keypair, i)).await.unwrap();
        }
        let sealed = h.sealed.recv().await.unwrap();
        assert_eq!(sealed.block.tx_count(), 3);
        assert_eq!(sealed.block.header.prev_block_hash, Hash::ZERO);
        assert!(sealed.block.verify_block(&PowPrefix::none()));
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_seals_partial_block_after_skip() {
        let keypair = Keypair::generate();
        let mut h = start(settings(3, Duration::from_secs(2), true));
        let start = Instant::now();

        h.accepted.send(tx(&keypair, 0)).await.unwrap();
        let sealed = h.sealed.recv().await.unwrap();

        assert_eq!(sealed.block.tx_count(), 1);
        // The first timeout is discarded; the second seals.
        assert!(start.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_keeps_size_bound() {
        let keypair = Keypair::generate();
        let mut h = start(settings(2, Duration::from_secs(5), true));

        for i in 0..5 {
            h.accepted.send(tx(&keypair, i)).await.unwrap();
        }
        let first = h.sealed.recv().await.unwrap().block;
        let second = h.sealed.recv().await.unwrap().block;
        assert_eq!(first.tx_count(), 2);
        assert_eq!(second.tx_count(), 2);
        assert_eq!(second.header.prev_block_hash, first.hash());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_block_sealed_on_timeout() {
        let mut h = start(settings(3, Duration::from_secs(1), false));
        let sealed = h.sealed.recv().await.unwrap();
        assert!(sealed.block.is_empty());
        assert_eq!(sealed.block.header.merkle_root, Hash::ZERO);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_pending_and_relays() {
        let keypair = Keypair::generate();
        let mut h = start(settings(10, Duration::from_secs(60), true));

        h.accepted.send(tx(&keypair, 1)).await.unwrap();
        h.accepted.send(tx(&keypair, 2)).await.unwrap();
        drop(h.accepted);

        let sealed = h.sealed.recv().await.unwrap();
        assert_eq!(sealed.block.tx_count(), 2);
        let summary = h.task.await.unwrap().unwrap();
        assert_eq!(summary.blocks_sealed, 1);
        assert_eq!(summary.head, sealed.block.hash());

        let relayed: Vec<Message> = std::iter::from_fn(|| h.outbound.try_recv().ok()).collect();
        assert_eq!(relayed.len(), 2);
        assert!(relayed.iter().all(|m| m.kind == tpschain_core::MessageKind::SendTransaction));
    }

    #[tokio::test]
    async fn test_closed_boundaries_do_not_stop_assembly() {
        let keypair = Keypair::generate();
        let peer = Keypair::generate();
        let mut h = start(settings(10, Duration::from_secs(60), false));
        drop(h.outbound);
        drop(h.gaps);

        let mut orphan = Block::new(tpschain_core::hash(b"unknown parent"));
        orphan.seal(&peer, &PowPrefix::none(), 1);
        h.inbound.send(orphan).await.unwrap();
        h.accepted.send(tx(&keypair, 1)).await.unwrap();
        drop(h.accepted);

        let flushed = h.sealed.recv().await.unwrap().block;
        assert_eq!(flushed.tx_count(), 1);
        let summary = h.task.await.unwrap().unwrap();
        assert_eq!(summary.blocks_sealed, 1);
        assert_eq!(summary.blocks_accepted, 0);
    }

    #[test]
    fn test_presized_slots_capped() {
        assert_eq!(settings(3, Duration::from_secs(1), false).presized_slots(), 3);
        assert_eq!(
            settings(usize::MAX, Duration::from_secs(1), false).presized_slots(),
            PRESIZED_SLOTS
        );
    }

    #[tokio::test]
    async fn test_inbound_block_replaces_pending() {
        let local = Keypair::generate();
        let peer = Keypair::generate();
        let mut h = start(settings(10, Duration::from_secs(60), false));

        let txs: Vec<Transaction> = (0..3).map(|i| tx(&local, i)).collect();
        for t in &txs {
            h.accepted.send(t.clone()).await.unwrap();
        }
        // Each included transaction is relayed, so three relays mean three pending.
        for _ in 0..3 {
            h.outbound.recv().await.unwrap();
        }

        let mut peer_block = Block::new(Hash::ZERO);
        peer_block.add_transaction(txs[0].clone());
        peer_block.add_transaction(txs[1].clone());
        peer_block.seal(&peer, &PowPrefix::none(), 1);
        let peer_hash = peer_block.hash();
        h.inbound.send(peer_block.clone()).await.unwrap();
        // A repeat of the same block is ignored.
        h.inbound.send(peer_block).await.unwrap();

        let mut orphan = Block::new(tpschain_core::hash(b"unknown parent"));
        orphan.seal(&peer, &PowPrefix::none(), 1);
        h.inbound.send(orphan.clone()).await.unwrap();
        let gap = h.gaps.recv().await.unwrap();
        assert_eq!(gap.local_head, peer_hash);
        assert_eq!(gap.received, orphan.hash());

        drop(h.accepted);
        let flushed = h.sealed.recv().await.unwrap().block;
        assert_eq!(flushed.header.prev_block_hash, peer_hash);
        assert_eq!(flushed.tx_count(), 1);
        assert_eq!(flushed.transactions[0].signature, txs[2].signature);

        let summary = h.task.await.unwrap().unwrap();
        assert_eq!(summary.blocks_accepted, 1);
        assert_eq!(summary.height, 2);
    }
}
