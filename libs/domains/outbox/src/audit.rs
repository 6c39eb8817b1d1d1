//! Append-only audit trail of what happened to each entry.
//!
//! Nothing in the delivery path reads it back; it exists for support staff
//! and dashboards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::OutboxResult;
use crate::models::{AuditAction, AuditRecord};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(
        &self,
        outbox_id: Uuid,
        action: AuditAction,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> OutboxResult<()>;

    /// Records for one entry, oldest first.
    async fn records_for(&self, outbox_id: Uuid) -> OutboxResult<Vec<AuditRecord>>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryAuditSink {
    records: Arc<RwLock<Vec<AuditRecord>>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<AuditRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn append(
        &self,
        outbox_id: Uuid,
        action: AuditAction,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> OutboxResult<()> {
        self.records.write().await.push(AuditRecord {
            id: Uuid::now_v7(),
            outbox_id,
            action,
            metadata,
            created_at: now,
        });
        Ok(())
    }

    async fn records_for(&self, outbox_id: Uuid) -> OutboxResult<Vec<AuditRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.outbox_id == outbox_id)
            .cloned()
            .collect())
    }
}
