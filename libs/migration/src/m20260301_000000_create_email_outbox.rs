use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Status is a plain string column so new states do not need a type migration
        manager
            .create_table(
                Table::create()
                    .table(EmailOutbox::Table)
                    .if_not_exists()
                    .col(pk_uuid(EmailOutbox::Id))
                    .col(ColumnDef::new(EmailOutbox::ToEmail).string_len(320).not_null())
                    .col(string_null(EmailOutbox::ToName))
                    .col(ColumnDef::new(EmailOutbox::TemplateKey).string_len(128).not_null())
                    .col(integer(EmailOutbox::TemplateVersion).default(1))
                    .col(json_binary(EmailOutbox::Payload).default(Expr::cust("'{}'::jsonb")))
                    .col(
                        ColumnDef::new(EmailOutbox::Status)
                            .string_len(16)
                            .not_null()
                            .default("PENDING"),
                    )
                    .col(
                        timestamp_with_time_zone(EmailOutbox::ScheduledAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(timestamp_with_time_zone_null(EmailOutbox::ClaimedAt))
                    .col(timestamp_with_time_zone_null(EmailOutbox::SentAt))
                    .col(integer(EmailOutbox::Attempts).default(0))
                    .col(text_null(EmailOutbox::LastError))
                    .col(text_null(EmailOutbox::ProviderMessageId))
                    .col(
                        timestamp_with_time_zone(EmailOutbox::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Claim query: status IN (..) AND scheduled_at <= now ORDER BY scheduled_at, created_at
        manager
            .create_index(
                Index::create()
                    .name("idx_email_outbox_claim")
                    .table(EmailOutbox::Table)
                    .col(EmailOutbox::Status)
                    .col(EmailOutbox::ScheduledAt)
                    .col(EmailOutbox::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(EmailAudit::Table)
                    .if_not_exists()
                    .col(pk_uuid(EmailAudit::Id))
                    .col(uuid(EmailAudit::OutboxId))
                    .col(ColumnDef::new(EmailAudit::Action).string_len(16).not_null())
                    .col(json_binary(EmailAudit::Metadata).default(Expr::cust("'{}'::jsonb")))
                    .col(
                        timestamp_with_time_zone(EmailAudit::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_email_audit_outbox")
                            .from(EmailAudit::Table, EmailAudit::OutboxId)
                            .to(EmailOutbox::Table, EmailOutbox::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_email_audit_outbox_id")
                    .table(EmailAudit::Table)
                    .col(EmailAudit::OutboxId)
                    .col(EmailAudit::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EmailAudit::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(EmailOutbox::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum EmailOutbox {
    Table,
    Id,
    ToEmail,
    ToName,
    TemplateKey,
    TemplateVersion,
    Payload,
    Status,
    ScheduledAt,
    ClaimedAt,
    SentAt,
    Attempts,
    LastError,
    ProviderMessageId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum EmailAudit {
    Table,
    Id,
    OutboxId,
    Action,
    Metadata,
    CreatedAt,
}
