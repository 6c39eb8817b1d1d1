use chrono::{DateTime, NaiveDate, Utc};
use lettre::Address;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{OutboxError, OutboxResult};
use crate::models::{NewOutboxEntry, OutboxEntry, StatusCounts};
use crate::store::OutboxStore;
use crate::templates::keys;

/// Producer-facing side of the outbox: LMS features queue email here and
/// return immediately; delivery happens in the worker.
#[derive(Clone)]
pub struct OutboxService {
    store: Arc<dyn OutboxStore>,
    clock: Arc<dyn Clock>,
}

impl OutboxService {
    pub fn new(store: Arc<dyn OutboxStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Queue an email. The recipient address must parse; nothing else about
    /// the entry is checked until it is processed.
    pub async fn enqueue(&self, entry: NewOutboxEntry) -> OutboxResult<OutboxEntry> {
        let address = entry.to_email.trim().to_string();
        address
            .parse::<Address>()
            .map_err(|e| OutboxError::InvalidEmail(format!("{address}: {e}")))?;
        let entry = NewOutboxEntry {
            to_email: address,
            ..entry
        };

        let queued = self.store.enqueue(entry, self.clock.now()).await?;
        debug!(
            outbox_id = %queued.id,
            template = %queued.template_key,
            scheduled_at = %queued.scheduled_at,
            "Queued email"
        );
        Ok(queued)
    }

    pub async fn get(&self, id: Uuid) -> OutboxResult<OutboxEntry> {
        self.store.get(id).await?.ok_or(OutboxError::NotFound(id))
    }

    pub async fn stats(&self) -> OutboxResult<StatusCounts> {
        self.store.counts_by_status().await
    }

    pub async fn queue_invite(
        &self,
        to_email: &str,
        name: &str,
        hospital_name: &str,
        invite_url: &str,
    ) -> OutboxResult<OutboxEntry> {
        self.enqueue(
            NewOutboxEntry::new(to_email, keys::INVITE, 1)
                .with_name(name)
                .with_value("name", name)
                .with_value("hospital_name", hospital_name)
                .with_value("invite_url", invite_url),
        )
        .await
    }

    pub async fn queue_assignment_due_soon(
        &self,
        to_email: &str,
        name: &str,
        course_title: &str,
        due_date: NaiveDate,
        course_url: &str,
    ) -> OutboxResult<OutboxEntry> {
        self.enqueue(
            NewOutboxEntry::new(to_email, keys::ASSIGNMENT_DUE_SOON, 1)
                .with_name(name)
                .with_value("name", name)
                .with_value("course_title", course_title)
                .with_value("due_date", due_date.format("%B %-d, %Y").to_string())
                .with_value("course_url", course_url),
        )
        .await
    }

    pub async fn queue_certificate_issued(
        &self,
        to_email: &str,
        name: &str,
        course_title: &str,
        completed_on: NaiveDate,
        certificate_url: &str,
    ) -> OutboxResult<OutboxEntry> {
        self.enqueue(
            NewOutboxEntry::new(to_email, keys::CERTIFICATE_ISSUED, 1)
                .with_name(name)
                .with_value("name", name)
                .with_value("course_title", course_title)
                .with_value("completed_on", completed_on.format("%B %-d, %Y").to_string())
                .with_value("certificate_url", certificate_url),
        )
        .await
    }

    /// Queue a review notice, optionally held back until `send_at`.
    pub async fn queue_review_scheduled(
        &self,
        to_email: &str,
        name: &str,
        competency: &str,
        review_at: DateTime<Utc>,
        reviewer_name: &str,
        send_at: Option<DateTime<Utc>>,
    ) -> OutboxResult<OutboxEntry> {
        let mut entry = NewOutboxEntry::new(to_email, keys::REVIEW_SCHEDULED, 1)
            .with_name(name)
            .with_value("name", name)
            .with_value("competency", competency)
            .with_value("review_at", review_at.format("%B %-d, %Y at %H:%M UTC").to_string())
            .with_value("reviewer_name", reviewer_name);
        if let Some(at) = send_at {
            entry = entry.scheduled_for(at);
        }
        self.enqueue(entry).await
    }
}
