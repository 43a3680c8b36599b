//! # graphql-cache
//!
//! A read-through response cache that sits in front of a GraphQL execution
//! engine.
//!
//! ## Features
//!
//! - Query and field caches selected by name or wildcard
//! - Pluggable storage through the [`Backend`] trait, with filesystem and
//!   in-memory implementations
//! - Zone-based invalidation
//! - Request-scoped state: identity, hit/miss counters and re-entrancy guard
//!   travel in a [`RequestContext`], never in globals
//! - Extensible interception chain via [`Interceptor`]
//!
//! ## Wiring an engine
//!
//! The execution engine is reached through [`QueryExecutor`]. Field caches are
//! consulted by the engine itself while it resolves fields:
//!
//! ```no_run
//! use async_trait::async_trait;
//! use graphql_cache::{ExecutionResult, Operation, QueryExecutor, RequestContext};
//! use serde_json::json;
//!
//! struct Engine;
//!
//! #[async_trait]
//! impl QueryExecutor for Engine {
//!     async fn execute(&self, _op: &Operation, ctx: &mut RequestContext) -> ExecutionResult {
//!         let menu = match ctx.read_field("menu", None).await {
//!             Some(menu) => menu,
//!             None => {
//!                 let menu = json!(["home", "about"]);
//!                 ctx.write_field("menu", None, &menu).await;
//!                 menu
//!             }
//!         };
//!         ExecutionResult::data(json!({ "menu": menu }))
//!     }
//! }
//! ```
//!
//! ## Configuration
//!
//! [`ManagerSettings::from_env`] reads `GRAPHQL_CACHE_ACTIVE`,
//! `GRAPHQL_CACHE_BACKEND`, `GRAPHQL_CACHE_DIR` and
//! `GRAPHQL_CACHE_MAX_ENTRIES`.

pub mod backend;
pub mod cache;
pub mod error;
pub mod executor;

// Re-export main types for convenience
pub use backend::{create_backend, Backend, BackendKind, FileSystemBackend, MemoryBackend};
pub use cache::types::{ExecutionResult, GraphQLRequest, GraphQLResponse, Operation};
pub use cache::{
    CacheConfig, CacheConfigBuilder, CacheDiagnostics, CacheKey, CacheManager, CacheStats,
    CachedValue, FieldCache, Lifecycle, ManagerSettings, QueryCache, QueryCacheStatus,
    RequestContext,
};
pub use error::{CacheError, Result};
pub use executor::{Interceptor, QueryExecutor};
