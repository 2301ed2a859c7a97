//! Append-only metrics log.
//!
//! Lines are handed to a dedicated writer task so a slow or failing disk
//! never holds up sealing. Write failures are logged and the line is lost.

use crate::metrics::MetricsSnapshot;
use chrono::{SecondsFormat, Utc};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn start_line() -> String {
    format!("--- TPS Reporter Started at {} ---", timestamp())
}

pub fn block_line(snapshot: &MetricsSnapshot) -> String {
    format!(
        "[{}] Block {}: tx={}, per_block_tps={:.2}, total_tx={}, avg_tps={:.2}",
        timestamp(),
        snapshot.total_blocks,
        snapshot.last_block_txs,
        snapshot.per_block_tps,
        snapshot.total_txs,
        snapshot.avg_tps,
    )
}

pub fn dump_line(snapshot: &MetricsSnapshot) -> String {
    format!(
        "--- Dump at {}: total_blocks={} total_txs={} total_time={:.3} avg_tps={:.2} ---",
        timestamp(),
        snapshot.total_blocks,
        snapshot.total_txs,
        snapshot.total_time,
        snapshot.avg_tps,
    )
}

/// Sender half of the log. Cheap to clone; dropping every clone stops the writer.
#[derive(Debug, Clone)]
pub struct ReportSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ReportSink {
    pub fn write(&self, line: String) {
        // The writer only goes away at shutdown.
        let _ = self.tx.send(line);
    }
}

/// Spawn the writer for `path`. The start marker is the first line written.
pub fn spawn_writer(path: PathBuf) -> (ReportSink, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let handle = tokio::spawn(async move {
        append(&path, &start_line()).await;
        while let Some(line) = rx.recv().await {
            append(&path, &line).await;
        }
    });
    (ReportSink { tx }, handle)
}

async fn append(path: &Path, line: &str) {
    let result = async {
        let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await
    }
    .await;

    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "failed to write metrics log");
    }
}
