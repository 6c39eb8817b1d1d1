//! Prometheus metrics for the outbox worker.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::info;

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Later calls reuse the first handle.
pub fn init_metrics() -> Result<&'static PrometheusHandle, BuildError> {
    PROMETHEUS_HANDLE.get_or_try_init(|| {
        let handle = PrometheusBuilder::new().install_recorder()?;
        info!("Prometheus metrics initialized");
        Ok(handle)
    })
}

/// Render metrics in Prometheus text format; empty before [`init_metrics`].
pub fn render_metrics() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(|h| h.render())
        .unwrap_or_default()
}

/// Counters and timings recorded by the worker, processor and reconciler.
#[derive(Debug, Clone, Default)]
pub struct OutboxMetrics;

impl OutboxMetrics {
    pub fn new() -> Self {
        Self
    }

    /// `outcome` is one of `sent`, `retrying`, `cancelled`, `skipped`, `superseded`, `stranded`.
    pub fn entry_finished(&self, outcome: &'static str) {
        counter!("outbox_entries_processed_total", "outcome" => outcome).increment(1);
    }

    pub fn send_attempt(&self, provider: &'static str, duration: Duration, result: &'static str) {
        counter!(
            "outbox_send_attempts_total",
            "provider" => provider,
            "result" => result
        )
        .increment(1);
        histogram!("outbox_send_duration_seconds", "provider" => provider)
            .record(duration.as_secs_f64());
    }

    pub fn batch_claimed(&self, claimed: usize) {
        counter!("outbox_batches_total").increment(1);
        gauge!("outbox_batch_size").set(claimed as f64);
    }

    pub fn claim_lost(&self) {
        counter!("outbox_claims_lost_total").increment(1);
    }

    pub fn loop_error(&self, component: &'static str) {
        counter!("outbox_loop_errors_total", "component" => component).increment(1);
    }

    pub fn reclaimed(&self, n: usize) {
        counter!("outbox_reclaimed_total").increment(n as u64);
    }

    pub fn audit_write_failed(&self) {
        counter!("outbox_audit_failures_total").increment(1);
    }
}
