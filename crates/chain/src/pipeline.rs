//! Wiring of the admission, assembly and broadcast stages.
//!
//! ```text
//! producers -> intake -> workers -> accepted -> assembler -> sealed -> broadcaster -> outbound
//!                                                  ^
//!                                   inbound blocks-+--> gaps
//! ```

use crate::admission::{self, AdmissionStats};
use crate::assembler::{Assembler, AssemblerSettings, AssemblerSummary};
use crate::broadcast::Broadcaster;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::metrics::MetricsSnapshot;
use crate::reconcile::MissingRange;
use crate::report;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tpschain_core::{Block, Keypair, Message, Transaction};

const INBOUND_CAPACITY: usize = 64;

/// Producer side of the intake queue.
#[derive(Debug, Clone)]
pub struct IntakeSender {
    tx: mpsc::Sender<Transaction>,
}

impl IntakeSender {
    /// Queue a transaction, waiting while the intake is full.
    pub async fn submit(&self, tx: Transaction) -> Result<()> {
        self.tx.send(tx).await.map_err(|_| PipelineError::Closed)
    }

    /// Queue a transaction without waiting.
    pub fn try_submit(&self, tx: Transaction) -> Result<()> {
        self.tx.try_send(tx).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PipelineError::Full,
            mpsc::error::TrySendError::Closed(_) => PipelineError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Network side of the inbound block queue.
#[derive(Debug, Clone)]
pub struct InboundSender {
    tx: mpsc::Sender<Block>,
}

impl InboundSender {
    pub async fn deliver(&self, block: Block) -> Result<()> {
        self.tx.send(block).await.map_err(|_| PipelineError::Closed)
    }

    /// Decode a block from its wire form and deliver it.
    ///
    /// Malformed input is logged and dropped; the decode error is returned.
    pub async fn deliver_encoded(&self, bytes: &[u8]) -> Result<()> {
        match Block::decode(bytes) {
            Ok(block) => self.deliver(block).await,
            Err(e) => {
                warn!(len = bytes.len(), error = %e, "dropping malformed inbound block");
                Err(e.into())
            }
        }
    }
}

/// Receiving ends of the boundaries the node writes to.
#[derive(Debug)]
pub struct Boundaries {
    /// Outgoing `SendBlock` and `SendTransaction` messages.
    pub outbound: mpsc::UnboundedReceiver<Message>,
    /// Ranges the node would need to fetch to follow a peer.
    pub gaps: mpsc::UnboundedReceiver<MissingRange>,
}

/// What a clean shutdown leaves behind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ShutdownReport {
    pub admission: AdmissionStats,
    pub blocks_sealed: u64,
    pub blocks_accepted: u64,
    pub height: usize,
    pub metrics: MetricsSnapshot,
}

/// Control handle for a running node.
pub struct NodeHandle {
    intake: IntakeSender,
    inbound: InboundSender,
    shutdown: watch::Sender<bool>,
    metrics: watch::Receiver<MetricsSnapshot>,
    abandon: Arc<AtomicBool>,
    workers: Vec<JoinHandle<AdmissionStats>>,
    assembler: JoinHandle<Result<AssemblerSummary>>,
    broadcaster: JoinHandle<MetricsSnapshot>,
    report: Option<JoinHandle<()>>,
}

/// Validate `config` and start every stage on the current runtime.
pub fn spawn(config: PipelineConfig, keypair: Keypair) -> Result<(NodeHandle, Boundaries)> {
    config.validate()?;

    let (intake_tx, intake_rx) = mpsc::channel(config.txpool_size);
    let (accepted_tx, accepted_rx) = mpsc::channel(config.txpool_size);
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let (sealed_tx, sealed_rx) = mpsc::channel(1);
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (gaps_tx, gaps_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (metrics_tx, metrics_rx) = watch::channel(MetricsSnapshot::default());
    let abandon = Arc::new(AtomicBool::new(false));

    let (report_sink, report_task) = match &config.report_path {
        Some(path) => {
            let (sink, task) = report::spawn_writer(path.clone());
            (Some(sink), Some(task))
        }
        None => (None, None),
    };

    let workers = admission::spawn_workers(
        config.validation_workers,
        intake_rx,
        accepted_tx,
        config.transaction_prefix(),
        shutdown_rx,
    );

    let assembler = Assembler::new(
        AssemblerSettings {
            block_tx_num: config.block_tx_num,
            block_gen_timeout: config.block_gen_timeout,
            block_prefix: config.block_prefix(),
            skip_first_seal: config.skip_first_seal,
            relay_transactions: config.relay_transactions,
        },
        keypair,
        Arc::clone(&abandon),
        sealed_tx,
        outbound_tx.clone(),
        gaps_tx,
    );
    let assembler = tokio::spawn(assembler.run(accepted_rx, inbound_rx));

    let broadcaster = Broadcaster::new(
        config.broadcast_interval,
        outbound_tx,
        metrics_tx,
        report_sink,
        config.report_dump_interval,
    );
    let broadcaster = tokio::spawn(broadcaster.run(sealed_rx));

    info!(
        workers = config.validation_workers,
        block_tx_num = config.block_tx_num,
        block_gen_timeout = ?config.block_gen_timeout,
        "pipeline started"
    );

    let handle = NodeHandle {
        intake: IntakeSender { tx: intake_tx },
        inbound: InboundSender { tx: inbound_tx },
        shutdown: shutdown_tx,
        metrics: metrics_rx,
        abandon,
        workers,
        assembler,
        broadcaster,
        report: report_task,
    };
    let boundaries = Boundaries {
        outbound: outbound_rx,
        gaps: gaps_rx,
    };
    Ok((handle, boundaries))
}

impl NodeHandle {
    pub fn intake(&self) -> IntakeSender {
        self.intake.clone()
    }

    pub fn inbound(&self) -> InboundSender {
        self.inbound.clone()
    }

    /// The snapshot published after the most recent broadcast.
    pub fn metrics(&self) -> MetricsSnapshot {
        *self.metrics.borrow()
    }

    pub fn subscribe_metrics(&self) -> watch::Receiver<MetricsSnapshot> {
        self.metrics.clone()
    }

    /// Stop intake, drain every stage and wait for it to finish.
    ///
    /// Transactions already queued are still validated, and a non-empty
    /// pending block is sealed and broadcast before this returns.
    pub async fn shutdown(self) -> Result<ShutdownReport> {
        info!("pipeline shutting down");
        self.shutdown.send_replace(true);

        let mut admission = AdmissionStats::default();
        for worker in self.workers {
            admission += worker.await?;
        }
        let summary = self.assembler.await??;
        let metrics = self.broadcaster.await?;
        if let Some(report) = self.report {
            report.await?;
        }

        info!(
            accepted = admission.accepted,
            rejected = admission.rejected,
            blocks = metrics.total_blocks,
            txs = metrics.total_txs,
            "pipeline stopped"
        );
        Ok(ShutdownReport {
            admission,
            blocks_sealed: summary.blocks_sealed,
            blocks_accepted: summary.blocks_accepted,
            height: summary.height,
            metrics,
        })
    }

    /// Stop immediately. Any proof-of-work search in progress gives up and
    /// nothing pending is sealed.
    pub fn abort(self) {
        self.abandon.store(true, Ordering::Relaxed);
        for worker in &self.workers {
            worker.abort();
        }
        self.assembler.abort();
        self.broadcaster.abort();
        if let Some(report) = &self.report {
            report.abort();
        }
    }
}
