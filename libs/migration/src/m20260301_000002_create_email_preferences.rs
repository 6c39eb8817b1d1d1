use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Keyed by lower-cased address; a missing row means "may send"
        manager
            .create_table(
                Table::create()
                    .table(EmailPreferences::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(EmailPreferences::Recipient)
                            .string_len(320)
                            .not_null()
                            .primary_key(),
                    )
                    .col(boolean(EmailPreferences::EmailOptOut).default(false))
                    .col(
                        timestamp_with_time_zone(EmailPreferences::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EmailPreferences::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum EmailPreferences {
    Table,
    Recipient,
    EmailOptOut,
    UpdatedAt,
}
