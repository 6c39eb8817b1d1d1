use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use serde_json::Value;
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::entity::audit as entity;
use crate::error::OutboxResult;
use crate::models::{AuditAction, AuditRecord};

#[derive(Clone)]
pub struct PgAuditSink {
    db: DatabaseConnection,
}

impl PgAuditSink {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn append(
        &self,
        outbox_id: Uuid,
        action: AuditAction,
        metadata: Value,
        now: DateTime<Utc>,
    ) -> OutboxResult<()> {
        let record = AuditRecord {
            id: Uuid::now_v7(),
            outbox_id,
            action,
            metadata,
            created_at: now,
        };
        let active_model: entity::ActiveModel = (&record).into();
        entity::Entity::insert(active_model)
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    async fn records_for(&self, outbox_id: Uuid) -> OutboxResult<Vec<AuditRecord>> {
        entity::Entity::find()
            .filter(entity::Column::OutboxId.eq(outbox_id))
            .order_by_asc(entity::Column::CreatedAt)
            .order_by_asc(entity::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(AuditRecord::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};
    use serde_json::json;

    #[tokio::test]
    async fn test_append_then_read_back() {
        let outbox_id = Uuid::now_v7();
        let now = Utc::now();
        let row = entity::Model {
            id: Uuid::now_v7(),
            outbox_id,
            action: "SENT".into(),
            metadata: json!({ "provider_message_id": "abc" }),
            created_at: now.into(),
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult { last_insert_id: 0, rows_affected: 1 }])
            .append_query_results([vec![row]])
            .into_connection();
        let sink = PgAuditSink::new(db);

        sink.append(outbox_id, AuditAction::Sent, json!({}), now).await.unwrap();
        let records = sink.records_for(outbox_id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, AuditAction::Sent);
        assert_eq!(records[0].metadata["provider_message_id"], "abc");
    }
}
