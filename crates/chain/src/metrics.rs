//! Throughput accounting for broadcast blocks.

use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tpschain_core::Hash;

/// Point-in-time view of the aggregator, published after every broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_blocks: u64,
    pub total_txs: u64,
    /// Seconds spent between sealing start and broadcast, summed over blocks.
    pub total_time: f64,
    /// Transactions in the most recent block.
    pub last_block_txs: u64,
    /// Transactions of the most recent block over the time since the previous broadcast.
    pub per_block_tps: f64,
    pub avg_tps: f64,
}

/// Counters owned by the broadcaster.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    total_blocks: u64,
    total_txs: u64,
    total_time: Duration,
    last_block_txs: u64,
    per_block_tps: f64,
    first_seen: HashMap<Hash, Instant>,
    last_broadcast: Option<Instant>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember when `hash` was first seen. Later observations are ignored.
    pub fn observe(&mut self, hash: Hash, at: Instant) {
        self.first_seen.entry(hash).or_insert(at);
    }

    /// Account for a broadcast block of `tx_count` transactions at `now`.
    pub fn record_broadcast(&mut self, hash: &Hash, tx_count: usize, now: Instant) -> MetricsSnapshot {
        let tx_count = tx_count as u64;
        let elapsed = self
            .first_seen
            .remove(hash)
            .map(|seen| now.saturating_duration_since(seen))
            .unwrap_or_default();

        self.total_blocks += 1;
        self.total_txs += tx_count;
        self.total_time += elapsed;
        self.last_block_txs = tx_count;
        self.per_block_tps = match self.last_broadcast {
            Some(prev) => rate(tx_count, now.saturating_duration_since(prev)),
            None => 0.0,
        };
        self.last_broadcast = Some(now);

        self.snapshot()
    }

    pub fn avg_tps(&self) -> f64 {
        rate(self.total_txs, self.total_time)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_blocks: self.total_blocks,
            total_txs: self.total_txs,
            total_time: self.total_time.as_secs_f64(),
            last_block_txs: self.last_block_txs,
            per_block_tps: self.per_block_tps,
            avg_tps: self.avg_tps(),
        }
    }
}

fn rate(count: u64, over: Duration) -> f64 {
    let secs = over.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}
