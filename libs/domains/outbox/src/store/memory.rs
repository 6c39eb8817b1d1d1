use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::OutboxStore;
use crate::error::OutboxResult;
use crate::models::{NewOutboxEntry, OutboxEntry, OutboxStatus, StatusCounts};

#[derive(Debug, Default)]
struct State {
    entries: HashMap<Uuid, (u64, OutboxEntry)>,
    next_seq: u64,
}

impl State {
    fn push(&mut self, entry: OutboxEntry) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(entry.id, (seq, entry));
    }

    fn sorted<'a>(
        &'a self,
        filter: impl Fn(&OutboxEntry) -> bool,
        key: impl Fn(&OutboxEntry) -> DateTime<Utc>,
    ) -> Vec<&'a (u64, OutboxEntry)> {
        let mut rows: Vec<_> = self.entries.values().filter(|(_, e)| filter(e)).collect();
        rows.sort_by_key(|(seq, e)| (key(e), *seq));
        rows
    }
}

/// In-memory outbox for development and tests.
///
/// A single write lock makes each transition atomic, which gives the same
/// compare-and-set behaviour as the conditional `UPDATE` in Postgres.
#[derive(Debug, Default, Clone)]
pub struct InMemoryOutboxStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully-formed entry as-is (fixtures, imports).
    pub async fn insert(&self, entry: OutboxEntry) {
        self.state.write().await.push(entry);
    }

    /// All entries in arrival order.
    pub async fn all(&self) -> Vec<OutboxEntry> {
        let state = self.state.read().await;
        let mut rows: Vec<_> = state.entries.values().collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, e)| e.clone()).collect()
    }

    async fn transition(
        &self,
        id: Uuid,
        guard: impl Fn(&OutboxEntry) -> bool,
        apply: impl FnOnce(&mut OutboxEntry),
    ) -> bool {
        let mut state = self.state.write().await;
        match state.entries.get_mut(&id) {
            Some((_, entry)) if guard(entry) => {
                apply(entry);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn enqueue(
        &self,
        entry: NewOutboxEntry,
        now: DateTime<Utc>,
    ) -> OutboxResult<OutboxEntry> {
        let entry = OutboxEntry::from_new(entry, now);
        self.state.write().await.push(entry.clone());
        Ok(entry)
    }

    async fn get(&self, id: Uuid) -> OutboxResult<Option<OutboxEntry>> {
        let state = self.state.read().await;
        Ok(state.entries.get(&id).map(|(_, e)| e.clone()))
    }

    async fn list_eligible(
        &self,
        limit: u64,
        now: DateTime<Utc>,
    ) -> OutboxResult<Vec<OutboxEntry>> {
        let state = self.state.read().await;
        Ok(state
            .sorted(|e| e.is_eligible(now), |e| e.scheduled_at)
            .into_iter()
            .take(limit as usize)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn mark_sending(&self, id: Uuid, now: DateTime<Utc>) -> OutboxResult<bool> {
        Ok(self
            .transition(id, |e| e.is_eligible(now), |e| {
                e.status = OutboxStatus::Sending;
                e.claimed_at = Some(now);
            })
            .await)
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        provider_message_id: &str,
        attempts: i32,
        now: DateTime<Utc>,
    ) -> OutboxResult<bool> {
        Ok(self
            .transition(id, |e| e.status == OutboxStatus::Sending, |e| {
                e.status = OutboxStatus::Sent;
                e.sent_at = Some(now);
                e.provider_message_id = Some(provider_message_id.to_string());
                e.attempts = e.attempts.max(attempts);
                e.claimed_at = None;
            })
            .await)
    }

    async fn mark_failed_or_cancelled(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
        next_scheduled_at: Option<DateTime<Utc>>,
    ) -> OutboxResult<bool> {
        Ok(self
            .transition(id, |e| e.status == OutboxStatus::Sending, |e| {
                e.attempts = e.attempts.max(attempts);
                e.last_error = Some(error.to_string());
                e.claimed_at = None;
                match next_scheduled_at {
                    Some(at) => {
                        e.status = OutboxStatus::Failed;
                        e.scheduled_at = at;
                    }
                    None => e.status = OutboxStatus::Cancelled,
                }
            })
            .await)
    }

    async fn mark_skipped(&self, id: Uuid, reason: &str) -> OutboxResult<bool> {
        Ok(self
            .transition(id, |e| !e.status.is_terminal(), |e| {
                e.status = OutboxStatus::Skipped;
                e.last_error = Some(reason.to_string());
                e.claimed_at = None;
            })
            .await)
    }

    async fn list_stale(
        &self,
        claimed_before: DateTime<Utc>,
        limit: u64,
    ) -> OutboxResult<Vec<OutboxEntry>> {
        let state = self.state.read().await;
        Ok(state
            .sorted(
                |e| {
                    e.status == OutboxStatus::Sending
                        && e.claimed_at.is_some_and(|at| at < claimed_before)
                },
                |e| e.claimed_at.unwrap_or(e.created_at),
            )
            .into_iter()
            .take(limit as usize)
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn counts_by_status(&self) -> OutboxResult<StatusCounts> {
        let state = self.state.read().await;
        let mut counts = StatusCounts::default();
        for (_, entry) in state.entries.values() {
            counts.add(entry.status, 1);
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn request(to: &str) -> NewOutboxEntry {
        NewOutboxEntry::new(to, "invite", 1)
    }

    #[tokio::test]
    async fn test_list_eligible_orders_by_schedule_then_arrival() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();

        let late = store
            .enqueue(request("late@example.org").scheduled_for(now - TimeDelta::seconds(5)), now)
            .await
            .unwrap();
        let tie = now - TimeDelta::seconds(30);
        let first_tie = store
            .enqueue(request("a@example.org").scheduled_for(tie), now)
            .await
            .unwrap();
        let second_tie = store
            .enqueue(request("b@example.org").scheduled_for(tie), now)
            .await
            .unwrap();
        store
            .enqueue(request("future@example.org").scheduled_for(now + TimeDelta::seconds(1)), now)
            .await
            .unwrap();

        let ids: Vec<_> = store
            .list_eligible(10, now)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![first_tie.id, second_tie.id, late.id]);

        let one = store.list_eligible(1, now).await.unwrap();
        assert_eq!(one[0].id, first_tie.id);
    }

    #[tokio::test]
    async fn test_claim_is_compare_and_set() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let entry = store.enqueue(request("a@example.org"), now).await.unwrap();

        assert!(store.mark_sending(entry.id, now).await.unwrap());
        assert!(!store.mark_sending(entry.id, now).await.unwrap());

        let claimed = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(claimed.status, OutboxStatus::Sending);
        assert_eq!(claimed.claimed_at, Some(now));
        assert!(store.list_eligible(10, now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_sent_twice_is_rejected() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let entry = store.enqueue(request("a@example.org"), now).await.unwrap();
        store.mark_sending(entry.id, now).await.unwrap();

        assert!(store.mark_sent(entry.id, "msg-1", 1, now).await.unwrap());
        let later = now + TimeDelta::seconds(30);
        assert!(!store.mark_sent(entry.id, "msg-2", 2, later).await.unwrap());

        let sent = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(sent.status, OutboxStatus::Sent);
        assert_eq!(sent.attempts, 1);
        assert_eq!(sent.sent_at, Some(now));
        assert_eq!(sent.provider_message_id.as_deref(), Some("msg-1"));
        assert!(sent.claimed_at.is_none());
    }

    #[tokio::test]
    async fn test_failure_reschedules_and_cancel_keeps_schedule() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let entry = store.enqueue(request("a@example.org"), now).await.unwrap();

        store.mark_sending(entry.id, now).await.unwrap();
        let retry_at = now + TimeDelta::seconds(60);
        assert!(store
            .mark_failed_or_cancelled(entry.id, 1, "503", Some(retry_at))
            .await
            .unwrap());

        let failed = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(failed.status, OutboxStatus::Failed);
        assert_eq!(failed.scheduled_at, retry_at);
        assert_eq!(failed.last_error.as_deref(), Some("503"));

        store.mark_sending(entry.id, retry_at).await.unwrap();
        assert!(store
            .mark_failed_or_cancelled(entry.id, 2, "bounced", None)
            .await
            .unwrap());

        let cancelled = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, OutboxStatus::Cancelled);
        assert_eq!(cancelled.scheduled_at, retry_at);
        assert_eq!(cancelled.attempts, 2);
        assert!(cancelled.sent_at.is_none());
    }

    #[tokio::test]
    async fn test_finalize_requires_sending() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let entry = store.enqueue(request("a@example.org"), now).await.unwrap();

        assert!(!store.mark_sent(entry.id, "msg", 1, now).await.unwrap());
        assert!(!store.mark_failed_or_cancelled(entry.id, 1, "x", None).await.unwrap());
        assert!(!store.mark_sending(Uuid::now_v7(), now).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_refuses_entry_rescheduled_since_listing() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let entry = store.enqueue(request("a@example.org"), now).await.unwrap();

        // Another worker claims and fails it between our listing and our claim
        assert!(store.mark_sending(entry.id, now).await.unwrap());
        let retry_at = now + TimeDelta::seconds(60);
        store
            .mark_failed_or_cancelled(entry.id, 1, "smtp 451", Some(retry_at))
            .await
            .unwrap();

        assert!(!store.mark_sending(entry.id, now).await.unwrap());
        assert!(store.mark_sending(entry.id, retry_at).await.unwrap());
    }

    #[tokio::test]
    async fn test_skip_leaves_attempts_and_blocks_terminal() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let entry = store.enqueue(request("a@example.org"), now).await.unwrap();

        store.mark_sending(entry.id, now).await.unwrap();
        assert!(store.mark_skipped(entry.id, "opted out").await.unwrap());
        assert!(!store.mark_skipped(entry.id, "opted out").await.unwrap());

        let skipped = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(skipped.status, OutboxStatus::Skipped);
        assert_eq!(skipped.attempts, 0);
    }

    #[tokio::test]
    async fn test_list_stale_only_returns_old_claims() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let earlier = now - TimeDelta::minutes(30);
        let old = store.enqueue(request("old@example.org"), earlier).await.unwrap();
        let fresh = store.enqueue(request("fresh@example.org"), earlier).await.unwrap();

        store.mark_sending(old.id, now - TimeDelta::minutes(20)).await.unwrap();
        store.mark_sending(fresh.id, now - TimeDelta::minutes(1)).await.unwrap();

        let stale = store.list_stale(now - TimeDelta::minutes(10), 10).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.id);
    }

    #[tokio::test]
    async fn test_counts_by_status() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let a = store.enqueue(request("a@example.org"), now).await.unwrap();
        store.enqueue(request("b@example.org"), now).await.unwrap();
        store.mark_sending(a.id, now).await.unwrap();

        let counts = store.counts_by_status().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.sending, 1);
        assert_eq!(counts.total(), 2);
    }
}
