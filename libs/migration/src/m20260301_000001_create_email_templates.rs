use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Rows are append-only: a changed template gets a new version
        manager
            .create_table(
                Table::create()
                    .table(EmailTemplates::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(EmailTemplates::Key).string_len(128).not_null())
                    .col(integer(EmailTemplates::Version))
                    .col(text(EmailTemplates::Subject))
                    .col(text(EmailTemplates::Html))
                    .col(text(EmailTemplates::Text))
                    .col(
                        timestamp_with_time_zone(EmailTemplates::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(EmailTemplates::Key)
                            .col(EmailTemplates::Version),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EmailTemplates::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum EmailTemplates {
    Table,
    Key,
    Version,
    Subject,
    Html,
    Text,
    CreatedAt,
}
