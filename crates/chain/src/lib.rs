//! Transaction admission, block assembly and broadcast for tpschain.
//!
//! This crate runs the node's processing pipeline on tokio:
//! - **Admission**: a fixed worker pool checks proof-of-work and signatures
//! - **Assembler**: accumulates accepted transactions and seals blocks on size or timeout
//! - **Broadcaster**: paces sealed blocks onto the outbound boundary and keeps throughput metrics
//! - **Reconciliation**: folds valid peer blocks into the local chain
//!
//! # Example
//!
//! ```rust,no_run
//! use tpschain_chain::{spawn, PipelineConfig};
//! use tpschain_core::{Keypair, Transaction};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::from_toml_str("block_tx_num = 100")?;
//! let (node, mut boundaries) = spawn(config.clone(), Keypair::generate())?;
//!
//! let user = Keypair::generate();
//! let tx = Transaction::new(Some(user.public_key.clone()), None, b"hello".to_vec())
//!     .mined(&config.transaction_prefix())
//!     .signed(&user);
//! node.intake().submit(tx).await?;
//!
//! let report = node.shutdown().await?;
//! println!("{} transactions in {} blocks", report.metrics.total_txs, report.metrics.total_blocks);
//! while let Some(msg) = boundaries.outbound.recv().await {
//!     println!("{:?}: {} bytes", msg.kind, msg.data.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod assembler;
pub mod broadcast;
pub mod chain_state;
pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod reconcile;
pub mod report;
pub mod telemetry;

// Re-export commonly used types
pub use admission::AdmissionStats;
pub use assembler::AssemblerSummary;
pub use chain_state::ChainState;
pub use config::{ConfigError, PipelineConfig, PowConfig};
pub use error::PipelineError;
pub use metrics::{MetricsAggregator, MetricsSnapshot};
pub use pipeline::{spawn, Boundaries, InboundSender, IntakeSender, NodeHandle, ShutdownReport};
pub use reconcile::{diff_transaction_slices, reconcile, MissingRange, Reconciliation};
