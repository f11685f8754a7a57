//! Migration to create the scm_providers table.
//!
//! Each row configures one SCM integration. PAT-based providers reuse the
//! client columns with fixed placeholder values.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ScmProviders::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ScmProviders::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ScmProviders::OrganizationId).uuid().null())
                    .col(ColumnDef::new(ScmProviders::ProviderType).text().not_null())
                    .col(ColumnDef::new(ScmProviders::Name).text().not_null())
                    .col(ColumnDef::new(ScmProviders::BaseUrl).text().null())
                    .col(ColumnDef::new(ScmProviders::TenantId).text().null())
                    .col(ColumnDef::new(ScmProviders::ClientId).text().not_null())
                    .col(
                        ColumnDef::new(ScmProviders::ClientSecretEncrypted)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ScmProviders::WebhookSecretEncrypted)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ScmProviders::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(ScmProviders::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ScmProviders::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_scm_providers_organization_id")
                    .table(ScmProviders::Table)
                    .col(ScmProviders::OrganizationId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_scm_providers_organization_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ScmProviders::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub(crate) enum ScmProviders {
    Table,
    Id,
    OrganizationId,
    ProviderType,
    Name,
    BaseUrl,
    TenantId,
    ClientId,
    ClientSecretEncrypted,
    WebhookSecretEncrypted,
    IsActive,
    CreatedAt,
    UpdatedAt,
}
