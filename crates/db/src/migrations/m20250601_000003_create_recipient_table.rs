//! Create recipient table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Recipient::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Recipient::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Recipient::Email).string_len(256).not_null())
                    .col(ColumnDef::new(Recipient::Name).string_len(256))
                    .col(ColumnDef::new(Recipient::ListName).string_len(256))
                    .col(ColumnDef::new(Recipient::Geo).string_len(8))
                    .col(
                        ColumnDef::new(Recipient::Unsubscribed)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Recipient::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: (list_name, geo) - resolver filters
        manager
            .create_index(
                Index::create()
                    .name("idx_recipient_list_name_geo")
                    .table(Recipient::Table)
                    .col(Recipient::ListName)
                    .col(Recipient::Geo)
                    .to_owned(),
            )
            .await?;

        // Index: (created_at, id) - deterministic resolver order
        manager
            .create_index(
                Index::create()
                    .name("idx_recipient_created_at_id")
                    .table(Recipient::Table)
                    .col(Recipient::CreatedAt)
                    .col(Recipient::Id)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Recipient::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum Recipient {
    Table,
    Id,
    Email,
    Name,
    ListName,
    Geo,
    Unsubscribed,
    CreatedAt,
}
