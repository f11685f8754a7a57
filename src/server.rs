//! # Server Configuration
//!
//! This module contains the server setup and configuration for the registry SCM API.

use std::sync::Arc;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::connectors::ConnectorRegistry;
use crate::credentials::{
    ConnectorFactory, CredentialService, ProviderAdmin, ResilientScmClient,
};
use crate::crypto::{CryptoError, SecretCipher, TokenCipher};
use crate::handlers::{self, scm_oauth, scm_providers, scm_repositories};
use crate::repositories::{ScmRepository, TokenStore};
use crate::telemetry::trace_id_middleware;
use crate::token_refresh::TokenRenewer;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub credentials: Arc<CredentialService>,
    pub scm: Arc<ResilientScmClient>,
    pub providers: ProviderAdmin,
}

impl AppState {
    /// Wire the credential services with an AES-GCM cipher built from the configured key.
    pub fn new(
        config: AppConfig,
        db: DatabaseConnection,
        registry: ConnectorRegistry,
    ) -> Result<Self, CryptoError> {
        let cipher = TokenCipher::from_key_bytes(config.encryption_key.clone().unwrap_or_default())?;
        Ok(Self::with_cipher(config, db, registry, Arc::new(cipher)))
    }

    pub fn with_cipher(
        config: AppConfig,
        db: DatabaseConnection,
        registry: ConnectorRegistry,
        cipher: Arc<dyn SecretCipher>,
    ) -> Self {
        let repo = ScmRepository::new(Arc::new(db.clone()));
        let store: Arc<dyn TokenStore> = Arc::new(repo.clone());
        let connectors = ConnectorFactory::new(
            Arc::new(registry),
            Arc::clone(&cipher),
            config.server_base_url.clone(),
        );
        let renewer = Arc::new(TokenRenewer::new(Arc::clone(&store), Arc::clone(&cipher)));

        let credentials = CredentialService::new(
            Arc::clone(&store),
            Arc::clone(&cipher),
            connectors.clone(),
            Arc::clone(&renewer),
        );
        let scm = ResilientScmClient::new(
            store,
            Arc::clone(&cipher),
            connectors,
            renewer,
            config.renewal_window(),
        );

        Self {
            config: Arc::new(config),
            db,
            credentials: Arc::new(credentials),
            scm: Arc::new(scm),
            providers: ProviderAdmin::new(repo, cipher),
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/api/v1/scm-providers",
            post(scm_providers::create_provider).get(scm_providers::list_providers),
        )
        .route(
            "/api/v1/scm-providers/{id}",
            get(scm_providers::get_provider)
                .put(scm_providers::update_provider)
                .delete(scm_providers::delete_provider),
        )
        .route(
            "/api/v1/scm-providers/{id}/oauth/authorize",
            get(scm_oauth::authorize),
        )
        .route(
            "/api/v1/scm-providers/{id}/oauth/token",
            get(scm_oauth::token_status).delete(scm_oauth::revoke),
        )
        .route(
            "/api/v1/scm-providers/{id}/oauth/refresh",
            post(scm_oauth::refresh),
        )
        .route("/api/v1/scm-providers/{id}/token", post(scm_oauth::save_pat))
        .route(
            "/api/v1/scm-providers/{id}/repositories",
            get(scm_repositories::list_repositories),
        )
        .route(
            "/api/v1/scm-providers/{id}/repositories/{owner}/{repo}/tags",
            get(scm_repositories::list_tags),
        )
        .route(
            "/api/v1/scm-providers/{id}/repositories/{owner}/{repo}/branches",
            get(scm_repositories::list_branches),
        )
        .route_layer(from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    // The callback terminates a browser redirect; identity comes from `state`.
    let public = Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route(
            "/api/v1/scm-providers/{id}/oauth/callback",
            get(scm_oauth::callback),
        );

    let request_timeout = state.config.request_timeout();

    Router::new()
        .merge(protected)
        .merge(public)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(trace_id_middleware))
}

/// Starts the server and serves until `shutdown` is cancelled
pub async fn run_server(
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::clone(&state.config);
    let app = create_app(state);

    // Resolve the configured bind address
    let addr = config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, profile = %config.profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::scm_oauth::authorize,
        crate::handlers::scm_oauth::callback,
        crate::handlers::scm_oauth::revoke,
        crate::handlers::scm_oauth::refresh,
        crate::handlers::scm_oauth::save_pat,
        crate::handlers::scm_oauth::token_status,
        crate::handlers::scm_repositories::list_repositories,
        crate::handlers::scm_repositories::list_tags,
        crate::handlers::scm_repositories::list_branches,
        crate::handlers::scm_providers::create_provider,
        crate::handlers::scm_providers::list_providers,
        crate::handlers::scm_providers::get_provider,
        crate::handlers::scm_providers::update_provider,
        crate::handlers::scm_providers::delete_provider,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::HealthStatus,
            crate::error::ApiError,
            crate::connectors::AuthMethod,
            crate::connectors::ProviderKind,
            crate::connectors::SourceRepository,
            crate::connectors::GitTag,
            crate::connectors::GitBranch,
            crate::credentials::AuthorizeOutcome,
            crate::credentials::TokenStatus,
            crate::credentials::NewProvider,
            crate::credentials::UpdateProvider,
            crate::credentials::ProviderView,
            crate::handlers::scm_oauth::MessageResponse,
            crate::handlers::scm_oauth::RefreshResponse,
            crate::handlers::scm_oauth::SavePatRequest,
            crate::handlers::scm_repositories::RepositoriesResponse,
            crate::handlers::scm_repositories::TagsResponse,
            crate::handlers::scm_repositories::BranchesResponse,
            crate::handlers::scm_providers::ProvidersResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "scm-oauth", description = "Connect registry users to SCM providers"),
        (name = "scm-repositories", description = "Repository, tag and branch reads"),
        (name = "scm-providers", description = "SCM provider configuration"),
    ),
    info(
        title = "Registry SCM API",
        description = "SCM credential lifecycle for the private Terraform registry",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
