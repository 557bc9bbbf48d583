//! Creates the `user_account` table backing the credential store.
//!
//! `identity_key` and `email` each carry a unique index; reconciliation relies
//! on those indexes to detect concurrent first logins for the same identity.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserAccount::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserAccount::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UserAccount::IdentityKey).string().null())
                    .col(ColumnDef::new(UserAccount::Email).string().not_null())
                    .col(ColumnDef::new(UserAccount::DisplayName).string().null())
                    .col(ColumnDef::new(UserAccount::Surname).string().null())
                    .col(ColumnDef::new(UserAccount::PhotoUrl).string().null())
                    .col(
                        ColumnDef::new(UserAccount::ApprovalState)
                            .string_len(16)
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(UserAccount::Role)
                            .string_len(16)
                            .not_null()
                            .default("user"),
                    )
                    .col(
                        ColumnDef::new(UserAccount::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserAccount::ApprovedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(UserAccount::ApprovedBy).string().null())
                    .col(
                        ColumnDef::new(UserAccount::LastAccessAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_account_identity_key")
                    .table(UserAccount::Table)
                    .col(UserAccount::IdentityKey)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_user_account_email")
                    .table(UserAccount::Table)
                    .col(UserAccount::Email)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        // Admin listing orders by registration date
        manager
            .create_index(
                Index::create()
                    .name("idx_user_account_created_at")
                    .table(UserAccount::Table)
                    .col(UserAccount::CreatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(UserAccount::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UserAccount {
    Table,
    Id,
    IdentityKey,
    Email,
    DisplayName,
    Surname,
    PhotoUrl,
    ApprovalState,
    Role,
    CreatedAt,
    ApprovedAt,
    ApprovedBy,
    LastAccessAt,
}
