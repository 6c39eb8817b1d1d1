use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, Statement};
use tracing::debug;

use crate::entity::template as entity;
use crate::error::OutboxResult;
use crate::models::Template;
use crate::templates::TemplateStore;

#[derive(Clone)]
pub struct PgTemplateStore {
    db: DatabaseConnection,
}

impl PgTemplateStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TemplateStore for PgTemplateStore {
    async fn get(&self, key: &str, version: i32) -> OutboxResult<Option<Template>> {
        let model = entity::Entity::find_by_id((key.to_string(), version))
            .one(&self.db)
            .await?;
        Ok(model.map(Template::from))
    }

    async fn put(&self, template: Template) -> OutboxResult<bool> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
                INSERT INTO email_templates (key, version, subject, html, text, created_at)
                VALUES ($1, $2, $3, $4, $5, NOW())
                ON CONFLICT (key, version) DO NOTHING
            "#,
            [
                template.key.clone().into(),
                template.version.into(),
                template.subject.into(),
                template.html.into(),
                template.text.into(),
            ],
        );
        let inserted = self.db.execute_raw(stmt).await?.rows_affected() == 1;

        if inserted {
            debug!(key = %template.key, version = template.version, "Published template");
        }
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    #[tokio::test]
    async fn test_get_maps_row() {
        let row = entity::Model {
            key: "invite".into(),
            version: 1,
            subject: "Hi {{name}}".into(),
            html: "<p>Hi</p>".into(),
            text: "Hi".into(),
            created_at: Utc::now().into(),
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![row], vec![]])
            .into_connection();
        let store = PgTemplateStore::new(db);

        let template = store.get("invite", 1).await.unwrap().unwrap();
        assert_eq!(template.subject, "Hi {{name}}");
        assert!(store.get("invite", 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_reports_existing_version() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([
                MockExecResult { last_insert_id: 0, rows_affected: 1 },
                MockExecResult { last_insert_id: 0, rows_affected: 0 },
            ])
            .into_connection();
        let store = PgTemplateStore::new(db);
        let template = Template {
            key: "invite".into(),
            version: 1,
            subject: "s".into(),
            html: "h".into(),
            text: "t".into(),
        };

        assert!(store.put(template.clone()).await.unwrap());
        assert!(!store.put(template).await.unwrap());
    }
}
