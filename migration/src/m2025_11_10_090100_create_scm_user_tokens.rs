//! Migration to create the scm_user_tokens table.
//!
//! Stores sealed per-user SCM credentials. The unique (user_id, scm_provider_id)
//! index backs the upsert performed by the credential service.

use sea_orm_migration::prelude::*;

use crate::m2025_11_10_090000_create_scm_providers::ScmProviders;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ScmUserTokens::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ScmUserTokens::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ScmUserTokens::UserId).uuid().not_null())
                    .col(
                        ColumnDef::new(ScmUserTokens::ScmProviderId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScmUserTokens::AccessTokenEncrypted)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScmUserTokens::RefreshTokenEncrypted)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ScmUserTokens::TokenType)
                            .text()
                            .not_null()
                            .default("bearer"),
                    )
                    .col(
                        ColumnDef::new(ScmUserTokens::ExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(ScmUserTokens::Scopes).text().null())
                    .col(
                        ColumnDef::new(ScmUserTokens::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ScmUserTokens::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_scm_user_tokens_provider_id")
                            .from(ScmUserTokens::Table, ScmUserTokens::ScmProviderId)
                            .to(ScmProviders::Table, ScmProviders::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_scm_user_tokens_user_provider")
                    .table(ScmUserTokens::Table)
                    .col(ScmUserTokens::UserId)
                    .col(ScmUserTokens::ScmProviderId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_scm_user_tokens_user_provider")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ScmUserTokens::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ScmUserTokens {
    Table,
    Id,
    UserId,
    ScmProviderId,
    AccessTokenEncrypted,
    RefreshTokenEncrypted,
    TokenType,
    ExpiresAt,
    Scopes,
    CreatedAt,
    UpdatedAt,
}
