//! Domain models for the email outbox.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumIter, EnumString};
use uuid::Uuid;

/// Placeholder name → value. Values are coerced to text at render time.
pub type Payload = Map<String, Value>;

/// Lifecycle of an outbox entry.
///
/// ```text
/// PENDING ──claim──▶ SENDING ──▶ SENT
///    ▲                  │ └────▶ CANCELLED (attempts exhausted)
///    │                  │ └────▶ SKIPPED   (recipient opted out)
///  FAILED ◀─────────────┘
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    #[default]
    Pending,
    Sending,
    Sent,
    Failed,
    Cancelled,
    Skipped,
}

impl OutboxStatus {
    /// Statuses a worker may claim.
    pub const CLAIMABLE: [OutboxStatus; 2] = [OutboxStatus::Pending, OutboxStatus::Failed];

    /// No transition leaves a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OutboxStatus::Sent | OutboxStatus::Cancelled | OutboxStatus::Skipped
        )
    }

    pub fn is_claimable(&self) -> bool {
        Self::CLAIMABLE.contains(self)
    }
}

/// One queued or completed send request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub to_email: String,
    pub to_name: Option<String>,
    pub template_key: String,
    pub template_version: i32,
    pub payload: Payload,
    pub status: OutboxStatus,
    /// Earliest time the entry may be claimed
    pub scheduled_at: DateTime<Utc>,
    /// Start of the current claim lease; only set while `SENDING`
    pub claimed_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// Materialize a producer request as a fresh `PENDING` entry.
    pub fn from_new(new: NewOutboxEntry, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            to_email: new.to_email,
            to_name: new.to_name,
            template_key: new.template_key,
            template_version: new.template_version,
            payload: new.payload,
            status: OutboxStatus::Pending,
            scheduled_at: new.scheduled_at.unwrap_or(now),
            claimed_at: None,
            sent_at: None,
            attempts: 0,
            last_error: None,
            provider_message_id: None,
            created_at: now,
        }
    }

    /// Whether a worker looking at the store at `now` may claim this entry.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.scheduled_at <= now
    }
}

/// Producer-side request to queue an email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxEntry {
    pub to_email: String,
    pub to_name: Option<String>,
    pub template_key: String,
    pub template_version: i32,
    pub payload: Payload,
    /// Defaults to the enqueue time
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl NewOutboxEntry {
    pub fn new(
        to_email: impl Into<String>,
        template_key: impl Into<String>,
        template_version: i32,
    ) -> Self {
        Self {
            to_email: to_email.into(),
            to_name: None,
            template_key: template_key.into(),
            template_version,
            payload: Payload::new(),
            scheduled_at: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.to_name = Some(name.into());
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Add a single placeholder value.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

/// Subject and bodies for one `(key, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub key: String,
    pub version: i32,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// What happened to an entry, as recorded in the audit trail.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Sent,
    Failed,
    Cancelled,
    Skipped,
    /// A stale `SENDING` claim was taken back by the reconciler
    Reclaimed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub outbox_id: Uuid,
    pub action: AuditAction,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Entry totals per status, for the stats endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub sending: u64,
    pub sent: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub skipped: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: OutboxStatus, n: u64) {
        let slot = match status {
            OutboxStatus::Pending => &mut self.pending,
            OutboxStatus::Sending => &mut self.sending,
            OutboxStatus::Sent => &mut self.sent,
            OutboxStatus::Failed => &mut self.failed,
            OutboxStatus::Cancelled => &mut self.cancelled,
            OutboxStatus::Skipped => &mut self.skipped,
        };
        *slot += n;
    }

    pub fn get(&self, status: OutboxStatus) -> u64 {
        match status {
            OutboxStatus::Pending => self.pending,
            OutboxStatus::Sending => self.sending,
            OutboxStatus::Sent => self.sent,
            OutboxStatus::Failed => self.failed,
            OutboxStatus::Cancelled => self.cancelled,
            OutboxStatus::Skipped => self.skipped,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.sending + self.sent + self.failed + self.cancelled + self.skipped
    }
}
