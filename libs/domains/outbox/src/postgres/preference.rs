use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, Statement};

use crate::entity::preference as entity;
use crate::error::OutboxResult;
use crate::preferences::{PreferenceStore, recipient_key};

#[derive(Clone)]
pub struct PgPreferenceStore {
    db: DatabaseConnection,
}

impl PgPreferenceStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PreferenceStore for PgPreferenceStore {
    async fn can_send(&self, recipient: &str) -> OutboxResult<bool> {
        let model = entity::Entity::find_by_id(recipient_key(recipient))
            .one(&self.db)
            .await?;
        Ok(!model.is_some_and(|m| m.email_opt_out))
    }

    async fn set_opt_out(&self, recipient: &str, opted_out: bool) -> OutboxResult<()> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
                INSERT INTO email_preferences (recipient, email_opt_out, updated_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (recipient)
                DO UPDATE SET email_opt_out = EXCLUDED.email_opt_out, updated_at = NOW()
            "#,
            [recipient_key(recipient).into(), opted_out.into()],
        );
        self.db.execute_raw(stmt).await?;

        tracing::info!(opted_out, "Updated email preference");
        Ok(())
    }
}
