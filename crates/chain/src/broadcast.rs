//! Broadcast stage: paces sealed blocks onto the outbound boundary and keeps
//! the throughput counters.

use crate::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::report::{self, ReportSink};
use std::future::pending;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use tpschain_core::{Block, Message};

/// A block fresh from the assembler.
#[derive(Debug)]
pub struct SealedBlock {
    pub block: Block,
    /// When sealing started; the first observation of the block.
    pub sealing_started: Instant,
}

pub(crate) struct Broadcaster {
    interval: Duration,
    outbound: mpsc::UnboundedSender<Message>,
    metrics: MetricsAggregator,
    snapshots: watch::Sender<MetricsSnapshot>,
    report: Option<ReportSink>,
    dump_every: Option<Interval>,
}

impl Broadcaster {
    pub(crate) fn new(
        interval: Duration,
        outbound: mpsc::UnboundedSender<Message>,
        snapshots: watch::Sender<MetricsSnapshot>,
        report: Option<ReportSink>,
        dump_interval: Option<Duration>,
    ) -> Self {
        let dump_every = dump_interval.map(|period| {
            let mut tick = interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick
        });
        Self {
            interval,
            outbound,
            metrics: MetricsAggregator::new(),
            snapshots,
            report,
            dump_every,
        }
    }

    /// Broadcast until the hand-off closes, then write a final dump.
    pub(crate) async fn run(mut self, mut sealed: mpsc::Receiver<SealedBlock>) -> MetricsSnapshot {
        loop {
            tokio::select! {
                next = sealed.recv() => match next {
                    Some(block) => self.broadcast(block).await,
                    None => break,
                },
                _ = next_dump(&mut self.dump_every) => self.dump(),
            }
        }

        self.dump();
        self.metrics.snapshot()
    }

    async fn broadcast(&mut self, sealed: SealedBlock) {
        let SealedBlock { block, sealing_started } = sealed;
        let hash = block.hash();
        self.metrics.observe(hash, sealing_started);

        match Message::block(&block) {
            Ok(msg) => {
                if self.outbound.send(msg).is_err() {
                    debug!(%hash, "outbound boundary closed, block not sent");
                }
            }
            Err(e) => warn!(%hash, error = %e, "failed to encode block"),
        }

        let snapshot = self.metrics.record_broadcast(&hash, block.tx_count(), Instant::now());
        info!(
            %hash,
            txs = block.tx_count(),
            total_blocks = snapshot.total_blocks,
            total_txs = snapshot.total_txs,
            per_block_tps = snapshot.per_block_tps,
            avg_tps = snapshot.avg_tps,
            "block broadcast"
        );
        self.snapshots.send_replace(snapshot);
        if let Some(report) = &self.report {
            report.write(report::block_line(&snapshot));
        }

        tokio::time::sleep(self.interval).await;
    }

    fn dump(&self) {
        if let Some(report) = &self.report {
            report.write(report::dump_line(&self.metrics.snapshot()));
        }
    }
}

async fn next_dump(dump_every: &mut Option<Interval>) {
    match dump_every {
        Some(tick) => {
            tick.tick().await;
        }
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tpschain_core::{Hash, Keypair, PowPrefix, Transaction};

    fn block_with(keypair: &Keypair, prev: Hash, n: u8) -> Block {
        let mut block = Block::new(prev);
        for i in 0..n {
            block.add_transaction(
                Transaction::new(Some(keypair.public_key.clone()), None, vec![i]).signed(keypair),
            );
        }
        block.seal(keypair, &PowPrefix::none(), 1);
        block
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_over_two_blocks() {
        let keypair = Keypair::generate();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (snap_tx, snap_rx) = watch::channel(MetricsSnapshot::default());
        let (sealed_tx, sealed_rx) = mpsc::channel(1);

        let broadcaster = Broadcaster::new(Duration::from_millis(100), out_tx, snap_tx, None, None);
        let task = tokio::spawn(broadcaster.run(sealed_rx));

        let first = block_with(&keypair, Hash::ZERO, 5);
        let second = block_with(&keypair, first.hash(), 7);
        for block in [first.clone(), second.clone()] {
            sealed_tx
                .send(SealedBlock { block, sealing_started: Instant::now() })
                .await
                .unwrap();
        }
        drop(sealed_tx);

        let final_snapshot = task.await.unwrap();
        assert_eq!(final_snapshot.total_blocks, 2);
        assert_eq!(final_snapshot.total_txs, 12);
        assert_eq!(final_snapshot.last_block_txs, 7);
        assert_eq!(*snap_rx.borrow(), final_snapshot);

        let sent: Vec<Block> = std::iter::from_fn(|| out_rx.try_recv().ok())
            .map(|msg| msg.to_block().unwrap().unwrap())
            .collect();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].hash(), first.hash());
        assert_eq!(sent[1].hash(), second.hash());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcasts_are_paced() {
        let keypair = Keypair::generate();
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (snap_tx, _snap_rx) = watch::channel(MetricsSnapshot::default());
        let (sealed_tx, sealed_rx) = mpsc::channel(1);

        let interval = Duration::from_secs(1);
        let task = tokio::spawn(Broadcaster::new(interval, out_tx, snap_tx, None, None).run(sealed_rx));

        let start = Instant::now();
        for n in 1..=3 {
            let block = block_with(&keypair, Hash::ZERO, n);
            sealed_tx.send(SealedBlock { block, sealing_started: Instant::now() }).await.unwrap();
        }
        drop(sealed_tx);
        task.await.unwrap();

        // Three broadcasts, each followed by the pause.
        assert!(start.elapsed() >= interval * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_lines_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tps.log");
        let (sink, writer) = report::spawn_writer(path.clone());

        let keypair = Keypair::generate();
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let (snap_tx, _snap_rx) = watch::channel(MetricsSnapshot::default());
        let (sealed_tx, sealed_rx) = mpsc::channel(1);
        let task = tokio::spawn(
            Broadcaster::new(Duration::ZERO, out_tx, snap_tx, Some(sink), None).run(sealed_rx),
        );

        let block = block_with(&keypair, Hash::ZERO, 2);
        sealed_tx.send(SealedBlock { block, sealing_started: Instant::now() }).await.unwrap();
        drop(sealed_tx);
        task.await.unwrap();
        writer.await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3, "{contents}");
        assert!(lines[0].starts_with("--- TPS Reporter Started at "));
        assert!(lines[1].contains("] Block 1: tx=2, per_block_tps=0.00, total_tx=2"));
        assert!(lines[2].starts_with("--- Dump at "));
        assert!(lines[2].contains("total_blocks=1 total_txs=2"));
    }
}
