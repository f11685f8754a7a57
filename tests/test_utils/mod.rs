//! Test utilities for the SCM credential service.
//!
//! This module provides in-memory SQLite databases with migrations applied,
//! a scripted connector, a call-counting cipher and fixture helpers shared by
//! the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request},
    response::Response,
};
use chrono::{DateTime, Utc};
use migration::{Migrator, MigratorTrait};
use registry_scm::{
    config::AppConfig,
    connectors::{
        AccessToken, Connector, ConnectorError, ConnectorRegistry, ConnectorSettings, GitBranch,
        GitTag, Pagination, ProviderKind, RepoListResult, SourceRepository,
    },
    crypto::{CryptoError, SecretCipher, TokenCipher},
    models::{
        scm_provider::{self, PAT_CLIENT_ID_SENTINEL, PAT_CLIENT_SECRET_SENTINEL},
        scm_user_token,
    },
    repositories::{ScmRepository, TokenStore},
    server::{AppState, create_app},
};
use sea_orm::{
    ColumnTrait, Database, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
};
use url::Url;
use uuid::Uuid;

pub const TEST_API_TOKEN: &str = "test-api-token";
pub const TEST_BASE_URL: &str = "https://registry.test";
pub const OAUTH_CLIENT_ID: &str = "oauth-client-id";
pub const OAUTH_CLIENT_SECRET: &str = "oauth-client-secret";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub fn test_config() -> AppConfig {
    AppConfig {
        server_base_url: TEST_BASE_URL.to_string(),
        api_tokens: vec![TEST_API_TOKEN.to_string()],
        encryption_key: Some(vec![42u8; 32]),
        scm_renewal_window_seconds: 300,
        ..Default::default()
    }
}

/// AES-GCM cipher that counts how often it is used.
pub struct CountingCipher {
    inner: TokenCipher,
    pub seals: AtomicUsize,
    pub opens: AtomicUsize,
}

impl CountingCipher {
    pub fn new() -> Self {
        Self {
            inner: TokenCipher::from_key_bytes(vec![42u8; 32]).unwrap(),
            seals: AtomicUsize::new(0),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn seal_count(&self) -> usize {
        self.seals.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl SecretCipher for CountingCipher {
    fn seal(&self, plaintext: &str) -> Result<String, CryptoError> {
        self.seals.fetch_add(1, Ordering::SeqCst);
        self.inner.seal(plaintext)
    }

    fn open(&self, ciphertext: &str) -> Result<String, CryptoError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open(ciphertext)
    }
}

/// Connector whose responses are scripted by the test.
///
/// Reads fail with a queued error from [`MockConnector::fail_next_read`], or with
/// an auth-failure status when the credential was marked rejected. Renewals pop
/// scripted results; an empty script fails with `invalid_grant`.
pub struct MockConnector {
    kind: ProviderKind,
    exchange: Mutex<Result<AccessToken, ConnectorError>>,
    renewals: Mutex<VecDeque<Result<AccessToken, ConnectorError>>>,
    read_failures: Mutex<VecDeque<ConnectorError>>,
    rejected_tokens: Mutex<HashMap<String, u16>>,
    pub exchange_calls: AtomicUsize,
    pub renew_calls: AtomicUsize,
    pub read_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
    pub seen_tokens: Mutex<Vec<String>>,
    pub seen_codes: Mutex<Vec<String>>,
    pub seen_refresh_tokens: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            exchange: Mutex::new(Ok(issued_token("gho_issued", Some("ghr_issued"), None))),
            renewals: Mutex::new(VecDeque::new()),
            read_failures: Mutex::new(VecDeque::new()),
            rejected_tokens: Mutex::new(HashMap::new()),
            exchange_calls: AtomicUsize::new(0),
            renew_calls: AtomicUsize::new(0),
            read_calls: AtomicUsize::new(0),
            search_calls: AtomicUsize::new(0),
            seen_tokens: Mutex::new(Vec::new()),
            seen_codes: Mutex::new(Vec::new()),
            seen_refresh_tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn set_exchange(&self, result: Result<AccessToken, ConnectorError>) {
        *self.exchange.lock().unwrap() = result;
    }

    pub fn script_renewal(&self, result: Result<AccessToken, ConnectorError>) {
        self.renewals.lock().unwrap().push_back(result);
    }

    pub fn fail_next_read(&self, error: ConnectorError) {
        self.read_failures.lock().unwrap().push_back(error);
    }

    /// Every read presenting `access_token` fails with `status`.
    pub fn reject_token(&self, access_token: &str, status: u16) {
        self.rejected_tokens
            .lock()
            .unwrap()
            .insert(access_token.to_string(), status);
    }

    pub fn renew_count(&self) -> usize {
        self.renew_calls.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn tokens_seen(&self) -> Vec<String> {
        self.seen_tokens.lock().unwrap().clone()
    }

    fn read(&self, credential: &AccessToken) -> Result<(), ConnectorError> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_tokens
            .lock()
            .unwrap()
            .push(credential.access_token.clone());
        if let Some(error) = self.read_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        match self.rejected_tokens.lock().unwrap().get(&credential.access_token) {
            Some(status) => Err(ConnectorError::api(*status, "Bad credentials")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn authorization_endpoint(&self, state: &str, scopes: &[String]) -> Result<Url, ConnectorError> {
        let mut url = Url::parse("https://scm.test/login/oauth/authorize").map_err(|e| {
            ConnectorError::Configuration {
                details: e.to_string(),
            }
        })?;
        url.query_pairs_mut()
            .append_pair("client_id", OAUTH_CLIENT_ID)
            .append_pair("state", state)
            .append_pair("scope", &scopes.join(" "));
        Ok(url)
    }

    async fn complete_authorization(&self, code: &str) -> Result<AccessToken, ConnectorError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_codes.lock().unwrap().push(code.to_string());
        self.exchange.lock().unwrap().clone()
    }

    async fn renew_token(&self, refresh_token: &str) -> Result<AccessToken, ConnectorError> {
        self.renew_calls.fetch_add(1, Ordering::SeqCst);
        self.seen_refresh_tokens
            .lock()
            .unwrap()
            .push(refresh_token.to_string());
        self.renewals
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ConnectorError::TokenExchange {
                    details: "invalid_grant".to_string(),
                })
            })
    }

    async fn fetch_repositories(
        &self,
        credential: &AccessToken,
        _pagination: Pagination,
    ) -> Result<RepoListResult, ConnectorError> {
        self.read(credential)?;
        Ok(RepoListResult {
            repositories: vec![sample_repository("terraform-aws-vpc")],
            total_count: 1,
            more_pages: false,
            next_page: None,
        })
    }

    async fn search_repositories(
        &self,
        credential: &AccessToken,
        term: &str,
        _pagination: Pagination,
    ) -> Result<RepoListResult, ConnectorError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.read(credential)?;
        Ok(RepoListResult {
            repositories: vec![sample_repository(&format!("terraform-{term}"))],
            total_count: 1,
            more_pages: false,
            next_page: None,
        })
    }

    async fn fetch_tags(
        &self,
        credential: &AccessToken,
        _owner: &str,
        _repo: &str,
        _pagination: Pagination,
    ) -> Result<Vec<GitTag>, ConnectorError> {
        self.read(credential)?;
        Ok(vec![GitTag {
            tag_name: "v1.0.0".to_string(),
            target_commit: "a1b2c3d".to_string(),
            ..Default::default()
        }])
    }

    async fn fetch_branches(
        &self,
        credential: &AccessToken,
        _owner: &str,
        _repo: &str,
        _pagination: Pagination,
    ) -> Result<Vec<GitBranch>, ConnectorError> {
        self.read(credential)?;
        Ok(vec![GitBranch {
            branch_name: "main".to_string(),
            head_commit: "a1b2c3d".to_string(),
            is_protected: true,
            is_main_branch: true,
        }])
    }
}

pub fn sample_repository(name: &str) -> SourceRepository {
    SourceRepository {
        id: "1".to_string(),
        name: name.to_string(),
        full_name: format!("acme/{name}"),
        owner: "acme".to_string(),
        default_branch: "main".to_string(),
        clone_url: format!("https://scm.test/acme/{name}.git"),
        html_url: format!("https://scm.test/acme/{name}"),
        ..Default::default()
    }
}

pub fn issued_token(
    access: &str,
    refresh: Option<&str>,
    expires_at: Option<DateTime<Utc>>,
) -> AccessToken {
    AccessToken {
        access_token: access.to_string(),
        refresh_token: refresh.map(str::to_string),
        token_type: "bearer".to_string(),
        expires_at,
        scopes: vec!["repo".to_string(), "read:org".to_string()],
    }
}

/// Registry that hands out `connector` for every provider type and records
/// the settings each build was asked for.
pub fn mock_registry(
    connector: &Arc<MockConnector>,
    builds: &Arc<Mutex<Vec<ConnectorSettings>>>,
) -> ConnectorRegistry {
    let mut registry = ConnectorRegistry::new();
    for kind in ProviderKind::ALL {
        let connector = Arc::clone(connector);
        let builds = Arc::clone(builds);
        registry.register(kind, move |settings: &ConnectorSettings| {
            builds.lock().unwrap().push(settings.clone());
            Ok(Arc::clone(&connector) as Arc<dyn Connector>)
        });
    }
    registry
}

/// Fully wired service over an in-memory database
pub struct TestApp {
    pub db: DatabaseConnection,
    pub state: AppState,
    pub router: Router,
    pub cipher: Arc<CountingCipher>,
    pub connector: Arc<MockConnector>,
    pub builds: Arc<Mutex<Vec<ConnectorSettings>>>,
    pub repo: ScmRepository,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: AppConfig) -> Result<Self> {
        let db = setup_test_db().await?;
        let cipher = Arc::new(CountingCipher::new());
        let connector = Arc::new(MockConnector::new(ProviderKind::GitHub));
        let builds = Arc::new(Mutex::new(Vec::new()));
        let registry = mock_registry(&connector, &builds);

        let state = AppState::with_cipher(
            config,
            db.clone(),
            registry,
            Arc::clone(&cipher) as Arc<dyn SecretCipher>,
        );
        let router = create_app(state.clone());
        let repo = ScmRepository::new(Arc::new(db.clone()));

        Ok(Self {
            db,
            state,
            router,
            cipher,
            connector,
            builds,
            repo,
        })
    }

    pub fn build_count(&self) -> usize {
        self.builds.lock().unwrap().len()
    }

    pub async fn oauth_provider(&self) -> Result<scm_provider::Model> {
        insert_oauth_provider(&self.repo, self.cipher.as_ref(), ProviderKind::GitHub).await
    }

    pub async fn pat_provider(&self) -> Result<scm_provider::Model> {
        insert_pat_provider(&self.repo, self.cipher.as_ref()).await
    }

    pub async fn stored_token(
        &self,
        user_id: Uuid,
        provider_id: Uuid,
    ) -> Result<Option<scm_user_token::Model>> {
        Ok(self.repo.get_user_token(user_id, provider_id).await?)
    }

    pub async fn insert_token(
        &self,
        user_id: Uuid,
        provider_id: Uuid,
        access: &str,
        refresh: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<scm_user_token::Model> {
        insert_token(
            &self.repo,
            self.cipher.as_ref(),
            user_id,
            provider_id,
            access,
            refresh,
            expires_at,
        )
        .await
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        use tower::ServiceExt;

        self.router.clone().oneshot(request).await.unwrap()
    }
}

pub async fn insert_oauth_provider(
    repo: &ScmRepository,
    cipher: &dyn SecretCipher,
    kind: ProviderKind,
) -> Result<scm_provider::Model> {
    let now = Utc::now().fixed_offset();
    let model = scm_provider::Model {
        id: Uuid::new_v4(),
        organization_id: None,
        provider_type: kind,
        name: format!("{kind} integration"),
        base_url: None,
        tenant_id: None,
        client_id: OAUTH_CLIENT_ID.to_string(),
        client_secret_encrypted: cipher.seal(OAUTH_CLIENT_SECRET)?,
        webhook_secret_encrypted: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    Ok(repo.create_provider(model).await?)
}

pub async fn insert_pat_provider(
    repo: &ScmRepository,
    cipher: &dyn SecretCipher,
) -> Result<scm_provider::Model> {
    let now = Utc::now().fixed_offset();
    let model = scm_provider::Model {
        id: Uuid::new_v4(),
        organization_id: None,
        provider_type: ProviderKind::BitbucketDataCenter,
        name: "Bitbucket DC".to_string(),
        base_url: Some("https://bitbucket.internal.test".to_string()),
        tenant_id: None,
        client_id: PAT_CLIENT_ID_SENTINEL.to_string(),
        client_secret_encrypted: cipher.seal(PAT_CLIENT_SECRET_SENTINEL)?,
        webhook_secret_encrypted: None,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    Ok(repo.create_provider(model).await?)
}

pub async fn insert_token(
    repo: &ScmRepository,
    cipher: &dyn SecretCipher,
    user_id: Uuid,
    provider_id: Uuid,
    access: &str,
    refresh: Option<&str>,
    expires_at: Option<DateTime<Utc>>,
) -> Result<scm_user_token::Model> {
    let now = Utc::now().fixed_offset();
    let model = scm_user_token::Model {
        id: Uuid::new_v4(),
        user_id,
        scm_provider_id: provider_id,
        access_token_encrypted: cipher.seal(access)?,
        refresh_token_encrypted: refresh.map(|token| cipher.seal(token)).transpose()?,
        token_type: "bearer".to_string(),
        expires_at: expires_at.map(|at| at.fixed_offset()),
        scopes: Some("repo".to_string()),
        created_at: now,
        updated_at: now,
    };
    Ok(repo.save_user_token(model).await?)
}

/// Builds an authenticated API request for `user_id`.
pub fn api_request(method: Method, uri: &str, user_id: Uuid, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {TEST_API_TOKEN}"))
        .header("X-User-Id", user_id.to_string());

    match body {
        Some(json) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Number of stored token rows for a (user, provider) pair.
pub async fn count_user_tokens(
    db: &DatabaseConnection,
    user_id: Uuid,
    provider_id: Uuid,
) -> Result<u64> {
    let count = scm_user_token::Entity::find()
        .filter(scm_user_token::Column::UserId.eq(user_id))
        .filter(scm_user_token::Column::ScmProviderId.eq(provider_id))
        .count(db)
        .await?;
    Ok(count)
}
