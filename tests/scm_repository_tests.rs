//! Integration tests for ScmRepository against a migrated SQLite database.

use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use registry_scm::connectors::ProviderKind;
use registry_scm::credentials::open_credential;
use registry_scm::crypto::{SecretCipher, TokenCipher};
use registry_scm::models::scm_provider;
use registry_scm::repositories::{ScmRepository, TokenStore};
use uuid::Uuid;

mod test_utils;
use test_utils::{
    count_user_tokens, insert_oauth_provider, insert_pat_provider, insert_token, setup_test_db,
};

fn cipher() -> TokenCipher {
    TokenCipher::from_key_bytes(vec![42u8; 32]).expect("valid test key")
}

async fn repository() -> Result<ScmRepository> {
    let db = setup_test_db().await?;
    Ok(ScmRepository::new(Arc::new(db)))
}

fn org_provider(organization_id: Option<Uuid>, name: &str) -> scm_provider::Model {
    let now = Utc::now().fixed_offset();
    scm_provider::Model {
        id: Uuid::new_v4(),
        organization_id,
        provider_type: ProviderKind::GitLab,
        name: name.to_string(),
        base_url: Some("https://gitlab.example.com".to_string()),
        tenant_id: None,
        client_id: "gl-client".to_string(),
        client_secret_encrypted: "sealed".to_string(),
        webhook_secret_encrypted: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn list_providers_scopes_to_organization_plus_global() -> Result<()> {
    let repo = repository().await?;
    let org_a = Uuid::new_v4();
    let org_b = Uuid::new_v4();

    repo.create_provider(org_provider(None, "global")).await?;
    repo.create_provider(org_provider(Some(org_a), "team-a")).await?;
    repo.create_provider(org_provider(Some(org_b), "team-b")).await?;

    let all = repo.list_providers(None).await?;
    assert_eq!(all.len(), 3);

    let mut names: Vec<_> = repo
        .list_providers(Some(org_a))
        .await?
        .into_iter()
        .map(|provider| provider.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["global", "team-a"]);
    Ok(())
}

#[tokio::test]
async fn provider_kind_round_trips_through_storage() -> Result<()> {
    let repo = repository().await?;
    let cipher = cipher();

    let pat = insert_pat_provider(&repo, &cipher).await?;
    let azure = insert_oauth_provider(&repo, &cipher, ProviderKind::AzureDevOps).await?;

    let loaded = repo.get_provider(pat.id).await?.expect("pat provider");
    assert_eq!(loaded.provider_type, ProviderKind::BitbucketDataCenter);
    let loaded = repo.get_provider(azure.id).await?.expect("azure provider");
    assert_eq!(loaded.provider_type, ProviderKind::AzureDevOps);
    Ok(())
}

#[tokio::test]
async fn save_user_token_inserts_then_updates_in_place() -> Result<()> {
    let db = setup_test_db().await?;
    let repo = ScmRepository::new(Arc::new(db.clone()));
    let cipher = cipher();
    let provider = insert_oauth_provider(&repo, &cipher, ProviderKind::GitHub).await?;
    let user_id = Uuid::new_v4();

    let created = insert_token(&repo, &cipher, user_id, provider.id, "gho_one", None, None).await?;

    let updated = repo
        .save_user_token(registry_scm::models::scm_user_token::Model {
            access_token_encrypted: cipher.seal("gho_two")?,
            expires_at: Some((Utc::now() + Duration::hours(1)).fixed_offset()),
            ..created.clone()
        })
        .await?;

    assert_eq!(updated.id, created.id);
    assert_eq!(count_user_tokens(&db, user_id, provider.id).await?, 1);
    let loaded = repo
        .get_user_token(user_id, provider.id)
        .await?
        .expect("row");
    assert_eq!(cipher.open(&loaded.access_token_encrypted)?, "gho_two");
    assert!(loaded.expires_at.is_some());
    Ok(())
}

#[tokio::test]
async fn one_token_row_per_user_and_provider() -> Result<()> {
    let repo = repository().await?;
    let cipher = cipher();
    let provider = insert_oauth_provider(&repo, &cipher, ProviderKind::GitHub).await?;
    let user_id = Uuid::new_v4();

    insert_token(&repo, &cipher, user_id, provider.id, "first", None, None).await?;
    let duplicate = insert_token(&repo, &cipher, user_id, provider.id, "second", None, None).await;
    assert!(duplicate.is_err(), "unique (user, provider) index rejects a second row");

    // Another user on the same provider is independent
    insert_token(&repo, &cipher, Uuid::new_v4(), provider.id, "other", None, None).await?;
    Ok(())
}

#[tokio::test]
async fn delete_user_token_reports_removed_rows() -> Result<()> {
    let repo = repository().await?;
    let cipher = cipher();
    let provider = insert_oauth_provider(&repo, &cipher, ProviderKind::GitHub).await?;
    let user_id = Uuid::new_v4();

    assert_eq!(repo.delete_user_token(user_id, provider.id).await?, 0);
    insert_token(&repo, &cipher, user_id, provider.id, "gho", None, None).await?;
    assert_eq!(repo.delete_user_token(user_id, provider.id).await?, 1);
    assert!(repo.get_user_token(user_id, provider.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn delete_provider_removes_its_tokens() -> Result<()> {
    let repo = repository().await?;
    let cipher = cipher();
    let doomed = insert_oauth_provider(&repo, &cipher, ProviderKind::GitHub).await?;
    let kept = insert_oauth_provider(&repo, &cipher, ProviderKind::GitLab).await?;
    let user_id = Uuid::new_v4();
    insert_token(&repo, &cipher, user_id, doomed.id, "a", None, None).await?;
    insert_token(&repo, &cipher, user_id, kept.id, "b", None, None).await?;

    assert!(repo.delete_provider(doomed.id).await?);
    assert!(!repo.delete_provider(doomed.id).await?);

    assert!(repo.get_user_token(user_id, doomed.id).await?.is_none());
    assert!(repo.get_user_token(user_id, kept.id).await?.is_some());
    Ok(())
}

#[tokio::test]
async fn stored_tokens_are_sealed_and_key_bound() -> Result<()> {
    let repo = repository().await?;
    let cipher = cipher();
    let provider = insert_oauth_provider(&repo, &cipher, ProviderKind::GitHub).await?;
    let user_id = Uuid::new_v4();
    insert_token(
        &repo,
        &cipher,
        user_id,
        provider.id,
        "gho_plain",
        Some("ghr_plain"),
        Some(Utc::now() + Duration::hours(2)),
    )
    .await?;

    let row = repo
        .get_user_token(user_id, provider.id)
        .await?
        .expect("row");
    assert!(!row.access_token_encrypted.contains("gho_plain"));

    let credential = open_credential(&cipher, &row)?;
    assert_eq!(credential.access_token, "gho_plain");
    assert_eq!(credential.refresh_token(), Some("ghr_plain"));
    assert_eq!(credential.scopes, vec!["repo"]);

    let other_key = TokenCipher::from_key_bytes(vec![7u8; 32])?;
    assert!(open_credential(&other_key, &row).is_err());
    Ok(())
}
