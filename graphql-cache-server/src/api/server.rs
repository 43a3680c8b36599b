//! API server

use anyhow::{Context, Result};
use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use graphql_cache::{CacheManager, ManagerSettings};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::rules::RuleFile;
use crate::upstream::HttpExecutor;

use super::middleware::{identity_middleware, AuthState};
use super::routes::{graphql, health_check, login, AppState};

/// Default GraphQL engine endpoint
pub const DEFAULT_UPSTREAM: &str = "http://127.0.0.1:4000/graphql";

/// Configuration for the API server
pub struct ApiServerConfig {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,

    /// GraphQL engine that executes cache misses
    pub upstream: String,
    pub upstream_timeout: Duration,

    /// YAML file listing the query caches (field caches are rejected)
    pub rules_file: Option<PathBuf>,

    pub cache: ManagerSettings,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            jwt_secret: std::env::var("JWT_SECRET")
                .unwrap_or_else(|_| "default_secret_change_in_production".to_string()),
            upstream: DEFAULT_UPSTREAM.to_string(),
            upstream_timeout: Duration::from_secs(30),
            rules_file: None,
            cache: ManagerSettings::default(),
        }
    }
}

/// Build the router around an activated cache manager
pub fn router(manager: Arc<CacheManager>, auth_state: AuthState) -> Router {
    let app_state = Arc::new(AppState { manager });

    Router::new()
        // Public routes
        .route("/login", post(login))
        .with_state(auth_state.clone())
        .route("/health", get(health_check))
        // Identity is optional here; invalid tokens are still rejected
        .route(
            "/graphql",
            post(graphql).route_layer(from_fn_with_state(auth_state, identity_middleware)),
        )
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
}

impl ApiServer {
    /// Create a new API server with configuration
    pub fn new(config: ApiServerConfig) -> Self {
        Self { config }
    }

    /// Create a new API server with default configuration
    pub fn with_defaults() -> Self {
        Self {
            config: ApiServerConfig::default(),
        }
    }

    /// Cache manager in front of the upstream engine, with the rule file applied
    pub async fn build_manager(&self) -> Result<Arc<CacheManager>> {
        let executor = HttpExecutor::new(&self.config.upstream, self.config.upstream_timeout)?;
        let manager = CacheManager::new(self.config.cache.clone(), Arc::new(executor));
        manager.init().await;

        if let Some(path) = &self.config.rules_file {
            let rules = RuleFile::load(path)?;
            // Operations are forwarded whole, so field caches would never be read
            if !rules.field_caches.is_empty() {
                anyhow::bail!(
                    "{:?} declares field caches, but the upstream engine resolves fields \
                     itself and never consults them; remove the field_caches section",
                    path
                );
            }
            let registered = rules
                .apply(&manager)
                .await
                .with_context(|| format!("Invalid cache rule in {:?}", path))?;
            info!("Registered {} cache(s) from {:?}", registered, path);
        }

        manager.activate().await;
        Ok(Arc::new(manager))
    }

    /// Start the API server
    pub async fn start(self) -> Result<()> {
        let manager = self.build_manager().await?;
        let auth_state = AuthState::new(&self.config.jwt_secret);

        let app = router(manager, auth_state);

        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!(
            "Starting GraphQL cache on {} (upstream {})",
            addr, self.config.upstream
        );

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
