//! Polling loop that claims due entries and hands them to the processor.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::WorkerConfig;
use crate::error::{OutboxError, OutboxResult};
use crate::metrics::OutboxMetrics;
use crate::models::OutboxEntry;
use crate::processor::{EntryOutcome, OutboxProcessor};
use crate::store::OutboxStore;

/// Tally of one [`OutboxWorker::run_once`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub cancelled: usize,
    pub skipped: usize,
    pub superseded: usize,
    pub stranded: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: &EntryOutcome) {
        match outcome {
            EntryOutcome::Sent { .. } => self.sent += 1,
            EntryOutcome::Retrying { .. } => self.retried += 1,
            EntryOutcome::Cancelled { .. } => self.cancelled += 1,
            EntryOutcome::Skipped => self.skipped += 1,
            EntryOutcome::Superseded => self.superseded += 1,
            EntryOutcome::Stranded => self.stranded += 1,
        }
    }
}

pub struct OutboxWorker {
    store: Arc<dyn OutboxStore>,
    processor: Arc<OutboxProcessor>,
    clock: Arc<dyn Clock>,
    batch_size: u64,
    poll_interval: Duration,
    metrics: OutboxMetrics,
}

impl OutboxWorker {
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
            batch_size: config.batch_size,
            poll_interval: config.poll_interval,
            metrics: OutboxMetrics::new(),
        }
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// A failed pass is logged and retried on the next tick; the loop itself
    /// never returns an error. Shutdown is only observed between passes, so an
    /// entry that is mid-send always gets finalized.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Starting outbox worker"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(report) if report.claimed > 0 => info!(
                    claimed = report.claimed,
                    sent = report.sent,
                    retried = report.retried,
                    cancelled = report.cancelled,
                    skipped = report.skipped,
                    "Processed outbox batch"
                ),
                Ok(_) => debug!("No entries due"),
                Err(e) => {
                    self.metrics.loop_error("worker");
                    error!(error = %e, "Outbox pass failed, retrying next tick");
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("Outbox worker stopped");
    }

    /// List up to one batch of due entries and process them in order.
    ///
    /// Each entry is claimed only when its turn comes, so its lease covers
    /// its own send and never the sends queued ahead of it. Entries finished
    /// before a store error stay finalized; the error is returned afterwards.
    pub async fn run_once(&self) -> OutboxResult<BatchReport> {
        let candidates = self
            .store
            .list_eligible(self.batch_size, self.clock.now())
            .await?;

        let mut report = BatchReport::default();
        let result = self.drain(candidates, &mut report).await;
        self.metrics.batch_claimed(report.claimed);
        result.map(|()| report)
    }

    async fn drain(
        &self,
        candidates: Vec<OutboxEntry>,
        report: &mut BatchReport,
    ) -> OutboxResult<()> {
        for entry in candidates {
            if !self.store.mark_sending(entry.id, self.clock.now()).await? {
                self.metrics.claim_lost();
                debug!(outbox_id = %entry.id, "Entry claimed by another worker");
                continue;
            }
            report.claimed += 1;

            let outcome = self.process_isolated(&entry).await;
            self.metrics.entry_finished(outcome.label());
            report.record(&outcome);
        }
        Ok(())
    }

    /// Process one entry so that neither an error nor a panic reaches the batch.
    async fn process_isolated(&self, entry: &OutboxEntry) -> EntryOutcome {
        let message = match AssertUnwindSafe(self.processor.process(entry))
            .catch_unwind()
            .await
        {
            Ok(Ok(outcome)) => return outcome,
            Ok(Err(e)) => {
                warn!(outbox_id = %entry.id, error = %e, "Processing failed");
                e.to_string()
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(outbox_id = %entry.id, panic = %message, "Processing panicked");
                OutboxError::Internal(format!("processing panicked: {message}")).to_string()
            }
        };

        self.processor.fail_after_error(entry, &message).await
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
