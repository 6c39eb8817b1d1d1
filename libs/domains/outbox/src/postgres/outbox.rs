use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, FromQueryResult,
    QueryFilter, QueryOrder, QuerySelect, Statement,
};
use std::str::FromStr;
use tracing::warn;
use uuid::Uuid;

use crate::entity::outbox as entity;
use crate::error::{OutboxError, OutboxResult};
use crate::models::{NewOutboxEntry, OutboxEntry, OutboxStatus, StatusCounts};
use crate::store::OutboxStore;

#[derive(Clone)]
pub struct PgOutboxStore {
    db: DatabaseConnection,
}

impl PgOutboxStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn execute(&self, sql: &str, values: Vec<sea_orm::Value>) -> OutboxResult<bool> {
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, values);
        let result = self.db.execute_raw(stmt).await?;
        Ok(result.rows_affected() == 1)
    }

    /// Map fetched rows, cancelling any that no longer decode so they stop
    /// coming back on every poll. The rest of the batch is returned.
    async fn decode_rows(&self, models: Vec<entity::Model>) -> OutboxResult<Vec<OutboxEntry>> {
        let mut entries = Vec::with_capacity(models.len());
        for model in models {
            match OutboxEntry::try_from(model) {
                Ok(entry) => entries.push(entry),
                Err(OutboxError::CorruptRow { id, details }) => {
                    warn!(outbox_id = %id, details = %details, "Cancelling undecodable outbox row");
                    if let Err(e) = self.cancel_corrupt(id, &details).await {
                        warn!(outbox_id = %id, error = %e, "Failed to cancel undecodable row");
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }

    async fn cancel_corrupt(&self, id: Uuid, details: &str) -> OutboxResult<bool> {
        self.execute(
            r#"
                UPDATE email_outbox
                SET status = 'CANCELLED', last_error = $2, claimed_at = NULL
                WHERE id = $1 AND status IN ('PENDING', 'FAILED', 'SENDING')
            "#,
            vec![id.into(), format!("corrupt row: {details}").into()],
        )
        .await
    }
}

fn status_values(statuses: &[OutboxStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.to_string()).collect()
}


#[derive(Debug, FromQueryResult)]
struct StatusCount {
    status: String,
    count: i64,
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn enqueue(
        &self,
        entry: NewOutboxEntry,
        now: DateTime<Utc>,
    ) -> OutboxResult<OutboxEntry> {
        let entry = OutboxEntry::from_new(entry, now);
        let active_model: entity::ActiveModel = (&entry).into();
        entity::Entity::insert(active_model)
            .exec_without_returning(&self.db)
            .await?;

        tracing::info!(outbox_id = %entry.id, template = %entry.template_key, "Enqueued email");
        Ok(entry)
    }

    async fn get(&self, id: Uuid) -> OutboxResult<Option<OutboxEntry>> {
        entity::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .map(OutboxEntry::try_from)
            .transpose()
    }

    async fn list_eligible(
        &self,
        limit: u64,
        now: DateTime<Utc>,
    ) -> OutboxResult<Vec<OutboxEntry>> {
        let models = entity::Entity::find()
            .filter(entity::Column::Status.is_in(status_values(&OutboxStatus::CLAIMABLE)))
            .filter(entity::Column::ScheduledAt.lte(now))
            .order_by_asc(entity::Column::ScheduledAt)
            .order_by_asc(entity::Column::CreatedAt)
            .order_by_asc(entity::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?;

        self.decode_rows(models).await
    }

    async fn mark_sending(&self, id: Uuid, now: DateTime<Utc>) -> OutboxResult<bool> {
        self.execute(
            r#"
                UPDATE email_outbox
                SET status = 'SENDING', claimed_at = $2
                WHERE id = $1 AND status IN ('PENDING', 'FAILED') AND scheduled_at <= $2
            "#,
            vec![id.into(), now.into()],
        )
        .await
    }

    async fn mark_sent(
        &self,
        id: Uuid,
        provider_message_id: &str,
        attempts: i32,
        now: DateTime<Utc>,
    ) -> OutboxResult<bool> {
        self.execute(
            r#"
                UPDATE email_outbox
                SET status = 'SENT',
                    sent_at = $2,
                    provider_message_id = $3,
                    attempts = GREATEST(attempts, $4),
                    claimed_at = NULL
                WHERE id = $1 AND status = 'SENDING'
            "#,
            vec![id.into(), now.into(), provider_message_id.into(), attempts.into()],
        )
        .await
    }

    async fn mark_failed_or_cancelled(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
        next_scheduled_at: Option<DateTime<Utc>>,
    ) -> OutboxResult<bool> {
        // A missing schedule means CANCELLED; the old scheduled_at is kept
        self.execute(
            r#"
                UPDATE email_outbox
                SET status = CASE WHEN $4::timestamptz IS NULL THEN 'CANCELLED' ELSE 'FAILED' END,
                    scheduled_at = COALESCE($4::timestamptz, scheduled_at),
                    attempts = GREATEST(attempts, $2),
                    last_error = $3,
                    claimed_at = NULL
                WHERE id = $1 AND status = 'SENDING'
            "#,
            vec![id.into(), attempts.into(), error.into(), next_scheduled_at.into()],
        )
        .await
    }

    async fn mark_skipped(&self, id: Uuid, reason: &str) -> OutboxResult<bool> {
        self.execute(
            r#"
                UPDATE email_outbox
                SET status = 'SKIPPED', last_error = $2, claimed_at = NULL
                WHERE id = $1 AND status IN ('PENDING', 'FAILED', 'SENDING')
            "#,
            vec![id.into(), reason.into()],
        )
        .await
    }

    async fn list_stale(
        &self,
        claimed_before: DateTime<Utc>,
        limit: u64,
    ) -> OutboxResult<Vec<OutboxEntry>> {
        let models = entity::Entity::find()
            .filter(entity::Column::Status.eq(OutboxStatus::Sending.to_string()))
            .filter(entity::Column::ClaimedAt.lt(claimed_before))
            .order_by_asc(entity::Column::ClaimedAt)
            .limit(limit)
            .all(&self.db)
            .await?;

        self.decode_rows(models).await
    }

    async fn counts_by_status(&self) -> OutboxResult<StatusCounts> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            "SELECT status, COUNT(*) AS count FROM email_outbox GROUP BY status",
        );
        let rows = StatusCount::find_by_statement(stmt).all(&self.db).await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            match OutboxStatus::from_str(&row.status) {
                Ok(status) => counts.add(status, row.count.max(0) as u64),
                Err(_) => warn!(status = %row.status, "Ignoring unknown outbox status"),
            }
        }
        Ok(counts)
    }
}
