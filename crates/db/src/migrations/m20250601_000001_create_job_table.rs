//! Create job table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Job::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Job::Id).string_len(32).not_null().primary_key())
                    .col(ColumnDef::new(Job::JobType).string_len(32).not_null())
                    .col(ColumnDef::new(Job::Status).string_len(16).not_null())
                    .col(ColumnDef::new(Job::Params).json_binary().not_null())
                    .col(ColumnDef::new(Job::ProcessedItems).big_integer().not_null().default(0))
                    .col(ColumnDef::new(Job::TotalItems).big_integer().not_null())
                    .col(ColumnDef::new(Job::ErrorMessage).text())
                    .col(
                        ColumnDef::new(Job::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Job::StartedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Job::CompletedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // Index: status (startup recovery and active-job listing)
        manager
            .create_index(
                Index::create()
                    .name("idx_job_status")
                    .table(Job::Table)
                    .col(Job::Status)
                    .to_owned(),
            )
            .await?;

        // Index: created_at
        manager
            .create_index(
                Index::create()
                    .name("idx_job_created_at")
                    .table(Job::Table)
                    .col(Job::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Job::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Job {
    Table,
    Id,
    JobType,
    Status,
    Params,
    ProcessedItems,
    TotalItems,
    ErrorMessage,
    CreatedAt,
    StartedAt,
    CompletedAt,
}
