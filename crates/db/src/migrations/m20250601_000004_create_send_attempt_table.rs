//! Create send attempt table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SendAttempt::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SendAttempt::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SendAttempt::JobId).string_len(32).not_null())
                    .col(ColumnDef::new(SendAttempt::RecipientIndex).big_integer().not_null())
                    .col(ColumnDef::new(SendAttempt::ToEmail).string_len(256).not_null())
                    .col(ColumnDef::new(SendAttempt::FromAccountId).string_len(32).not_null())
                    .col(ColumnDef::new(SendAttempt::Outcome).string_len(8).not_null())
                    .col(ColumnDef::new(SendAttempt::ErrorMessage).text())
                    .col(
                        ColumnDef::new(SendAttempt::SentAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_send_attempt_job")
                            .from(SendAttempt::Table, SendAttempt::JobId)
                            .to(Job::Table, Job::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique index: (job_id, recipient_index) - one attempt row per
        // recipient; retries upsert over it
        manager
            .create_index(
                Index::create()
                    .name("idx_send_attempt_job_recipient")
                    .table(SendAttempt::Table)
                    .col(SendAttempt::JobId)
                    .col(SendAttempt::RecipientIndex)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index: from_account_id (bounce correlation by account)
        manager
            .create_index(
                Index::create()
                    .name("idx_send_attempt_from_account")
                    .table(SendAttempt::Table)
                    .col(SendAttempt::FromAccountId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SendAttempt::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum SendAttempt {
    Table,
    Id,
    JobId,
    RecipientIndex,
    ToEmail,
    FromAccountId,
    Outcome,
    ErrorMessage,
    SentAt,
}

#[derive(Iden)]
enum Job {
    Table,
    Id,
}
