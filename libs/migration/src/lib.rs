pub use sea_orm_migration::prelude::*;

mod m20260301_000000_create_email_outbox;
mod m20260301_000001_create_email_templates;
mod m20260301_000002_create_email_preferences;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260301_000000_create_email_outbox::Migration),
            Box::new(m20260301_000001_create_email_templates::Migration),
            Box::new(m20260301_000002_create_email_preferences::Migration),
        ]
    }
}
