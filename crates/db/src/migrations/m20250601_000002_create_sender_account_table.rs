//! Create sender account table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SenderAccount::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SenderAccount::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SenderAccount::Email).string_len(256).not_null())
                    .col(ColumnDef::new(SenderAccount::Domain).string_len(256).not_null())
                    .col(ColumnDef::new(SenderAccount::DailySendLimit).big_integer().not_null())
                    .col(
                        ColumnDef::new(SenderAccount::SendsToday)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SenderAccount::Status).string_len(16).not_null())
                    .col(ColumnDef::new(SenderAccount::SmtpHost).string_len(256))
                    .col(ColumnDef::new(SenderAccount::SmtpPort).integer())
                    .col(ColumnDef::new(SenderAccount::SmtpUsername).string_len(256))
                    .col(ColumnDef::new(SenderAccount::SmtpPassword).string_len(512))
                    .col(
                        ColumnDef::new(SenderAccount::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Unique index: email
        manager
            .create_index(
                Index::create()
                    .name("idx_sender_account_email")
                    .table(SenderAccount::Table)
                    .col(SenderAccount::Email)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index: (status, domain) - eligible-pool queries
        manager
            .create_index(
                Index::create()
                    .name("idx_sender_account_status_domain")
                    .table(SenderAccount::Table)
                    .col(SenderAccount::Status)
                    .col(SenderAccount::Domain)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SenderAccount::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum SenderAccount {
    Table,
    Id,
    Email,
    Domain,
    DailySendLimit,
    SendsToday,
    Status,
    SmtpHost,
    SmtpPort,
    SmtpUsername,
    SmtpPassword,
    UpdatedAt,
}
