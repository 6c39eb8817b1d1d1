//! Recovers entries stranded in `SENDING` by a crashed or stalled worker.

use chrono::TimeDelta;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::WorkerConfig;
use crate::error::{OutboxError, OutboxResult};
use crate::metrics::OutboxMetrics;
use crate::processor::{EntryOutcome, OutboxProcessor};
use crate::store::OutboxStore;

pub struct Reconciler {
    store: Arc<dyn OutboxStore>,
    processor: Arc<OutboxProcessor>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
    interval: Duration,
    batch_size: u64,
    metrics: OutboxMetrics,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        processor: Arc<OutboxProcessor>,
        clock: Arc<dyn Clock>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            store,
            processor,
            clock,
            stale_after: config.stale_claim_after,
            interval: config.reconcile_interval,
            batch_size: config.batch_size,
            metrics: OutboxMetrics::new(),
        }
    }

    /// Return every claim older than the lease to the failure path.
    /// Returns how many entries were taken back.
    pub async fn reconcile_once(&self) -> OutboxResult<usize> {
        let lease = TimeDelta::from_std(self.stale_after)
            .map_err(|e| OutboxError::Config(format!("stale claim lease out of range: {e}")))?;
        let claimed_before = self.clock.now() - lease;

        let stale = self.store.list_stale(claimed_before, self.batch_size).await?;
        let mut reclaimed = 0;
        for entry in &stale {
            match self.processor.reclaim(entry).await {
                EntryOutcome::Retrying { .. } | EntryOutcome::Cancelled { .. } => {
                    warn!(
                        outbox_id = %entry.id,
                        claimed_at = ?entry.claimed_at,
                        "Reclaimed stale entry"
                    );
                    reclaimed += 1;
                }
                // The original worker finished in the meantime
                _ => {}
            }
        }

        self.metrics.reclaimed(reclaimed);
        Ok(reclaimed)
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            stale_after_secs = self.stale_after.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Starting stale claim reconciler"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.reconcile_once().await {
                        self.metrics.loop_error("reconciler");
                        error!(error = %e, "Reconcile pass failed");
                    }
                }
            }
        }

        info!("Reconciler stopped");
    }
}
