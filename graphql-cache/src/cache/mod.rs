//! # GraphQL Response Caching
//!
//! Read-through caching of GraphQL operation results and individual field
//! computations.
//!
//! ## Features
//!
//! - **Query caches**: whole operations matched by operation name or `"*"`
//! - **Field caches**: single field computations matched by field name
//! - **Zones**: every entry lives in a named zone that can be cleared at once
//! - **Per-user scoping**: optional identity component in cache keys
//! - **Batch aware**: batched requests are cached operation by operation,
//!   with the caller identity restored in between
//! - **Diagnostics**: `x-graphql-query-cache` / `x-graphql-field-cache`
//!   response header values
//!
//! ## Example
//!
//! ```no_run
//! use graphql_cache::cache::{CacheConfig, CacheManager, ManagerSettings, RequestContext};
//! use graphql_cache::cache::types::{GraphQLRequest, Operation};
//! # use graphql_cache::executor::QueryExecutor;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example(executor: Arc<dyn QueryExecutor>) -> anyhow::Result<()> {
//! let manager = CacheManager::new(ManagerSettings::default(), executor);
//! manager.init().await;
//!
//! let config = CacheConfig::builder()
//!     .zone("posts")
//!     .ttl(Duration::from_secs(300))
//!     .build();
//! manager.register_query_cache("Posts", config).await?;
//! manager.activate().await;
//!
//! let request = GraphQLRequest::from(Operation::new("query Posts { posts { id } }"));
//! let mut ctx = RequestContext::new(None);
//! let response = manager.execute(&request, &mut ctx).await;
//!
//! for (name, value) in ctx.diagnostics().headers() {
//!     println!("{}: {}", name, value);
//! }
//! # let _ = response;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod key;
pub mod manager;
pub mod rule;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder, ManagerSettings, DEFAULT_ZONE};
pub use context::{CacheDiagnostics, RequestContext, RuleOutcome};
pub use key::CacheKeyBuilder;
pub use manager::{CacheManager, Lifecycle};
pub use rule::{
    CacheRule, EntryState, FieldCache, FieldCacheRule, MatchRule, MatchTarget, QueryCache,
    QueryCacheRule, RuleId, RuleKind, WILDCARD,
};
pub use types::{CacheKey, CacheStats, CachedValue, QueryCacheStatus, Zone};
