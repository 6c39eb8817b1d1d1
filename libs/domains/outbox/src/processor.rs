//! Drives one claimed entry through render → send → finalize → audit.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::audit::AuditSink;
use crate::clock::Clock;
use crate::config::{MissingTemplatePolicy, WorkerConfig};
use crate::error::{DeliveryError, OutboxResult};
use crate::metrics::OutboxMetrics;
use crate::models::{AuditAction, OutboxEntry};
use crate::preferences::{PreferenceStore, recipient_key};
use crate::providers::{DeliveryProvider, OutgoingEmail};
use crate::renderer::render_template;
use crate::retry::{FailureDecision, RetryPolicy};
use crate::store::OutboxStore;
use crate::templates::TemplateStore;

/// Cause recorded in audit metadata when the template does not resolve.
pub const CAUSE_TEMPLATE_NOT_FOUND: &str = "template_not_found";
pub const CAUSE_DELIVERY: &str = "delivery";
pub const CAUSE_INTERNAL: &str = "internal";
pub const CAUSE_CLAIM_EXPIRED: &str = "claim_expired";

/// Result of one processing pass over a claimed entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Sent { provider_message_id: String },
    Retrying { attempts: i32, next_scheduled_at: DateTime<Utc> },
    Cancelled { attempts: i32 },
    Skipped,
    /// The finalize write matched no row: someone else already moved the entry on
    Superseded,
    /// The finalize write itself failed; the entry stays `SENDING` until reclaimed
    Stranded,
}

impl EntryOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            EntryOutcome::Sent { .. } => "sent",
            EntryOutcome::Retrying { .. } => "retrying",
            EntryOutcome::Cancelled { .. } => "cancelled",
            EntryOutcome::Skipped => "skipped",
            EntryOutcome::Superseded => "superseded",
            EntryOutcome::Stranded => "stranded",
        }
    }
}

/// Sender identity and per-entry limits.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub from_email: String,
    pub from_name: String,
    pub send_timeout: Duration,
    pub missing_template: MissingTemplatePolicy,
}

impl From<&WorkerConfig> for ProcessorSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            from_email: config.from_email.clone(),
            from_name: config.from_name.clone(),
            send_timeout: config.send_timeout,
            missing_template: config.missing_template,
        }
    }
}

/// Failure about to be written for an entry.
struct Failure<'a> {
    attempts: i32,
    error: &'a str,
    cause: &'static str,
    category: Option<&'static str>,
}

pub struct OutboxProcessor {
    store: Arc<dyn OutboxStore>,
    templates: Arc<dyn TemplateStore>,
    preferences: Arc<dyn PreferenceStore>,
    audit: Arc<dyn AuditSink>,
    provider: Arc<dyn DeliveryProvider>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    settings: ProcessorSettings,
    metrics: OutboxMetrics,
}

impl OutboxProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn OutboxStore>,
        templates: Arc<dyn TemplateStore>,
        preferences: Arc<dyn PreferenceStore>,
        audit: Arc<dyn AuditSink>,
        provider: Arc<dyn DeliveryProvider>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            store,
            templates,
            preferences,
            audit,
            provider,
            clock,
            policy,
            settings,
            metrics: OutboxMetrics::new(),
        }
    }

    /// Process an entry this worker has just moved to `SENDING`.
    ///
    /// Delivery failures become `FAILED`/`CANCELLED` transitions and are not
    /// errors. An `Err` means a store or lookup call failed and the entry is
    /// still `SENDING`; the caller should hand it to [`Self::fail_after_error`].
    #[instrument(
        skip_all,
        fields(
            outbox_id = %entry.id,
            template = %entry.template_key,
            attempt = entry.attempts + 1
        )
    )]
    pub async fn process(&self, entry: &OutboxEntry) -> OutboxResult<EntryOutcome> {
        if !self.preferences.can_send(&recipient_key(&entry.to_email)).await? {
            return self.skip(entry).await;
        }

        let attempts = entry.attempts + 1;

        let Some(template) = self
            .templates
            .get(&entry.template_key, entry.template_version)
            .await?
        else {
            let error = format!(
                "template {} v{} not found",
                entry.template_key, entry.template_version
            );
            warn!(error = %error, policy = %self.settings.missing_template, "Cannot render entry");
            let failure = Failure {
                attempts,
                error: &error,
                cause: CAUSE_TEMPLATE_NOT_FOUND,
                category: None,
            };
            return Ok(match self.settings.missing_template {
                MissingTemplatePolicy::Cancel => self.cancel(entry, failure).await,
                MissingTemplatePolicy::Retry => self.fail(entry, failure).await,
            });
        };

        let rendered = render_template(&template, &entry.payload);
        let email = OutgoingEmail {
            from_email: self.settings.from_email.clone(),
            from_name: self.settings.from_name.clone(),
            to_email: entry.to_email.clone(),
            to_name: entry.to_name.clone(),
            subject: rendered.subject,
            html: rendered.html,
            text: rendered.text,
        };

        let started = Instant::now();
        let timeout = self.settings.send_timeout;
        let result = match tokio::time::timeout(timeout, self.provider.send(&email)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout(timeout)),
        };
        let provider = self.provider.name();
        self.metrics.send_attempt(
            provider,
            started.elapsed(),
            result.as_ref().map_or_else(DeliveryError::category, |_| "ok"),
        );

        match result {
            Ok(receipt) => Ok(self.finish_sent(entry, attempts, &receipt.message_id).await),
            Err(err) => {
                warn!(provider, category = err.category(), error = %err, "Delivery attempt failed");
                let error = err.to_string();
                Ok(self
                    .fail(
                        entry,
                        Failure {
                            attempts,
                            error: &error,
                            cause: CAUSE_DELIVERY,
                            category: Some(err.category()),
                        },
                    )
                    .await)
            }
        }
    }

    /// Count a failed pass for an entry whose processing errored or panicked.
    pub async fn fail_after_error(&self, entry: &OutboxEntry, error: &str) -> EntryOutcome {
        self.fail(
            entry,
            Failure {
                attempts: entry.attempts + 1,
                error,
                cause: CAUSE_INTERNAL,
                category: None,
            },
        )
        .await
    }

    /// Take back a `SENDING` entry whose claim outlived the lease.
    ///
    /// The abandoned pass counts as an attempt: it may or may not have
    /// reached the provider.
    pub async fn reclaim(&self, entry: &OutboxEntry) -> EntryOutcome {
        let now = self.clock.now();
        let attempts = entry.attempts + 1;
        let error = "claim expired before the attempt finished";
        let decision = self.policy.decide(attempts, now);
        let next_scheduled_at = match decision {
            FailureDecision::Retry { next_scheduled_at } => Some(next_scheduled_at),
            FailureDecision::Cancel => None,
        };

        match self
            .store
            .mark_failed_or_cancelled(entry.id, attempts, error, next_scheduled_at)
            .await
        {
            Ok(true) => {}
            Ok(false) => return EntryOutcome::Superseded,
            Err(e) => {
                warn!(outbox_id = %entry.id, error = %e, "Failed to reclaim stale entry");
                return EntryOutcome::Stranded;
            }
        }

        let outcome = match next_scheduled_at {
            Some(next_scheduled_at) => EntryOutcome::Retrying {
                attempts,
                next_scheduled_at,
            },
            None => EntryOutcome::Cancelled { attempts },
        };
        self.record(
            entry,
            AuditAction::Reclaimed,
            json!({
                "error": error,
                "cause": CAUSE_CLAIM_EXPIRED,
                "attempt": attempts,
                "claimed_at": entry.claimed_at,
                "result": outcome.label(),
                "next_scheduled_at": next_scheduled_at,
            }),
            now,
        )
        .await;
        outcome
    }

    async fn skip(&self, entry: &OutboxEntry) -> OutboxResult<EntryOutcome> {
        let reason = "recipient opted out of email";
        if !self.store.mark_skipped(entry.id, reason).await? {
            return Ok(EntryOutcome::Superseded);
        }

        info!("Recipient opted out, entry skipped");
        self.record(
            entry,
            AuditAction::Skipped,
            json!({ "reason": reason, "attempts": entry.attempts }),
            self.clock.now(),
        )
        .await;
        Ok(EntryOutcome::Skipped)
    }

    async fn finish_sent(
        &self,
        entry: &OutboxEntry,
        attempts: i32,
        message_id: &str,
    ) -> EntryOutcome {
        let now = self.clock.now();
        match self.store.mark_sent(entry.id, message_id, attempts, now).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(message_id, "Entry finalized elsewhere after a successful send");
                return EntryOutcome::Superseded;
            }
            Err(e) => {
                // Delivered but not recorded: the reconciler will retry it, so the
                // recipient may get a duplicate
                warn!(message_id, error = %e, "Failed to record successful send");
                return EntryOutcome::Stranded;
            }
        }

        debug!(message_id, "Entry sent");
        self.record(
            entry,
            AuditAction::Sent,
            json!({
                "provider": self.provider.name(),
                "provider_message_id": message_id,
                "attempt": attempts,
            }),
            now,
        )
        .await;
        EntryOutcome::Sent {
            provider_message_id: message_id.to_string(),
        }
    }

    /// Run a failed attempt through the retry policy.
    async fn fail(&self, entry: &OutboxEntry, failure: Failure<'_>) -> EntryOutcome {
        let now = self.clock.now();
        match self.policy.decide(failure.attempts, now) {
            FailureDecision::Cancel => self.cancel(entry, failure).await,
            FailureDecision::Retry { next_scheduled_at } => {
                match self
                    .store
                    .mark_failed_or_cancelled(
                        entry.id,
                        failure.attempts,
                        failure.error,
                        Some(next_scheduled_at),
                    )
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => return EntryOutcome::Superseded,
                    Err(e) => {
                        warn!(error = %e, "Failed to record failed attempt");
                        return EntryOutcome::Stranded;
                    }
                }

                self.record(
                    entry,
                    AuditAction::Failed,
                    failure_metadata(&failure, Some(next_scheduled_at)),
                    now,
                )
                .await;
                EntryOutcome::Retrying {
                    attempts: failure.attempts,
                    next_scheduled_at,
                }
            }
        }
    }

    async fn cancel(&self, entry: &OutboxEntry, failure: Failure<'_>) -> EntryOutcome {
        let now = self.clock.now();
        match self
            .store
            .mark_failed_or_cancelled(entry.id, failure.attempts, failure.error, None)
            .await
        {
            Ok(true) => {}
            Ok(false) => return EntryOutcome::Superseded,
            Err(e) => {
                warn!(error = %e, "Failed to record cancellation");
                return EntryOutcome::Stranded;
            }
        }

        warn!(attempts = failure.attempts, cause = failure.cause, "Entry cancelled");
        self.record(entry, AuditAction::Cancelled, failure_metadata(&failure, None), now)
            .await;
        EntryOutcome::Cancelled {
            attempts: failure.attempts,
        }
    }

    /// Audit writes never change an entry's outcome.
    async fn record(
        &self,
        entry: &OutboxEntry,
        action: AuditAction,
        metadata: Value,
        now: DateTime<Utc>,
    ) {
        if let Err(e) = self.audit.append(entry.id, action, metadata, now).await {
            self.metrics.audit_write_failed();
            warn!(outbox_id = %entry.id, %action, error = %e, "Failed to write audit record");
        }
    }
}

fn failure_metadata(failure: &Failure<'_>, next_scheduled_at: Option<DateTime<Utc>>) -> Value {
    json!({
        "error": failure.error,
        "cause": failure.cause,
        "category": failure.category,
        "attempt": failure.attempts,
        "next_scheduled_at": next_scheduled_at,
    })
}
