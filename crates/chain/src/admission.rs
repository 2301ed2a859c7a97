//! Transaction admission.
//!
//! A fixed pool of workers shares one intake receiver. Each transaction is
//! validated exactly once; survivors go to the accepted queue and failures are
//! logged and dropped.

use serde::Serialize;
use std::ops::{Add, AddAssign};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use tpschain_core::{PowPrefix, Transaction};

/// Per-worker outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionStats {
    pub accepted: u64,
    pub rejected: u64,
}

impl AdmissionStats {
    pub fn total(&self) -> u64 {
        self.accepted + self.rejected
    }
}

impl Add for AdmissionStats {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            accepted: self.accepted + rhs.accepted,
            rejected: self.rejected + rhs.rejected,
        }
    }
}

impl AddAssign for AdmissionStats {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Start `count` workers draining `intake` into `accepted`.
///
/// Raising `shutdown` closes the intake; workers finish what was already
/// queued and then exit.
pub(crate) fn spawn_workers(
    count: usize,
    intake: mpsc::Receiver<Transaction>,
    accepted: mpsc::Sender<Transaction>,
    prefix: PowPrefix,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<AdmissionStats>> {
    let intake = Arc::new(Mutex::new(intake));
    let prefix = Arc::new(prefix);
    (0..count)
        .map(|id| {
            tokio::spawn(run_worker(
                id,
                Arc::clone(&intake),
                accepted.clone(),
                Arc::clone(&prefix),
                shutdown.clone(),
            ))
        })
        .collect()
}

async fn run_worker(
    id: usize,
    intake: Arc<Mutex<mpsc::Receiver<Transaction>>>,
    accepted: mpsc::Sender<Transaction>,
    prefix: Arc<PowPrefix>,
    mut shutdown: watch::Receiver<bool>,
) -> AdmissionStats {
    let mut stats = AdmissionStats::default();
    let mut closing = *shutdown.borrow();

    loop {
        let next = {
            let mut rx = intake.lock().await;
            if closing {
                rx.close();
                rx.recv().await
            } else {
                tokio::select! {
                    tx = rx.recv() => tx,
                    _ = shutdown.changed() => {
                        closing = true;
                        continue;
                    }
                }
            }
        };

        let Some(tx) = next else { break };

        match tx.validate(&prefix) {
            Ok(()) => {
                debug!(worker = id, hash = %tx.hash(), "transaction accepted");
                if accepted.send(tx).await.is_err() {
                    // Nothing is assembling blocks any more.
                    break;
                }
                stats.accepted += 1;
            }
            Err(reason) => {
                warn!(worker = id, hash = %tx.hash(), %reason, "transaction rejected");
                stats.rejected += 1;
            }
        }
    }

    trace!(worker = id, accepted = stats.accepted, rejected = stats.rejected, "admission worker stopped");
    stats
}
