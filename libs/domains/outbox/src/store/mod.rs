//! Durable queue of send requests and the status transitions on it.
//!
//! Every `mark_*` call is a compare-and-set on the entry's current status and
//! reports whether it changed anything. `false` means another worker (or the
//! reconciler) got there first, or the entry is already terminal; callers
//! treat it as a no-op, never as an error.

mod memory;

pub use memory::InMemoryOutboxStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::OutboxResult;
use crate::models::{NewOutboxEntry, OutboxEntry, StatusCounts};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Persist a new `PENDING` entry.
    async fn enqueue(&self, entry: NewOutboxEntry, now: DateTime<Utc>) -> OutboxResult<OutboxEntry>;

    async fn get(&self, id: Uuid) -> OutboxResult<Option<OutboxEntry>>;

    /// Up to `limit` claimable entries due at `now`, oldest `scheduled_at`
    /// first, ties in arrival order.
    async fn list_eligible(&self, limit: u64, now: DateTime<Utc>) -> OutboxResult<Vec<OutboxEntry>>;

    /// `PENDING | FAILED → SENDING`, starting the claim lease at `now`.
    async fn mark_sending(&self, id: Uuid, now: DateTime<Utc>) -> OutboxResult<bool>;

    /// `SENDING → SENT`.
    async fn mark_sent(
        &self,
        id: Uuid,
        provider_message_id: &str,
        attempts: i32,
        now: DateTime<Utc>,
    ) -> OutboxResult<bool>;

    /// `SENDING → FAILED` with a new schedule, or `SENDING → CANCELLED` when
    /// `next_scheduled_at` is `None` (the schedule is then left alone).
    async fn mark_failed_or_cancelled(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
        next_scheduled_at: Option<DateTime<Utc>>,
    ) -> OutboxResult<bool>;

    /// Any non-terminal status `→ SKIPPED`. Attempts are not touched.
    async fn mark_skipped(&self, id: Uuid, reason: &str) -> OutboxResult<bool>;

    /// `SENDING` entries whose claim started before `claimed_before`.
    async fn list_stale(
        &self,
        claimed_before: DateTime<Utc>,
        limit: u64,
    ) -> OutboxResult<Vec<OutboxEntry>>;

    async fn counts_by_status(&self) -> OutboxResult<StatusCounts>;
}
