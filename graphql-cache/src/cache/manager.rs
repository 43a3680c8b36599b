//! Cache manager: rule registry, activation and request interception

use crate::backend::{create_backend, Backend};
use crate::cache::config::{CacheConfig, ManagerSettings};
use crate::cache::context::{ActiveRule, CacheDiagnostics, RequestContext};
use crate::cache::key::resolve_operation_name;
use crate::cache::rule::{CacheRule, EntryState, FieldCache, MatchTarget, QueryCache, RuleId, RuleKind};
use crate::cache::types::{CachedValue, ExecutionResult, GraphQLRequest, GraphQLResponse, Operation};
use crate::error::Result;
use crate::executor::{Interceptor, QueryExecutor};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Where the manager is in its startup sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Constructed; registering now logs a configuration error
    Created,

    /// `init` ran; registrations are recorded and wait for activation
    Initialized,

    /// Backend selected; new registrations activate immediately
    Activated,
}

struct Registered {
    id: RuleId,
    rule: Arc<CacheRule>,
    activated: bool,
}

struct ManagerState {
    lifecycle: Lifecycle,
    active: bool,
    backend: Option<Arc<dyn Backend>>,
    registry: Vec<Registered>,
}

/// Process-wide orchestrator of the query and field caches
///
/// Holds only configuration and the rule registry. Per-request state lives
/// in the [`RequestContext`] passed to [`execute`](Self::execute).
pub struct CacheManager {
    settings: ManagerSettings,
    executor: Arc<dyn QueryExecutor>,
    backend_override: Option<Arc<dyn Backend>>,
    active_override: Option<bool>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    state: RwLock<ManagerState>,
}

impl CacheManager {
    /// Create a manager in front of `executor`
    pub fn new(settings: ManagerSettings, executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            settings,
            executor,
            backend_override: None,
            active_override: None,
            interceptors: Vec::new(),
            state: RwLock::new(ManagerState {
                lifecycle: Lifecycle::Created,
                active: false,
                backend: None,
                registry: Vec::new(),
            }),
        }
    }

    /// Use `backend` instead of the one described by the settings
    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend_override = Some(backend);
        self
    }

    /// Override the global caching switch from the settings
    pub fn with_active(mut self, active: bool) -> Self {
        self.active_override = Some(active);
        self
    }

    /// Add a stage that runs ahead of the query caches
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub async fn lifecycle(&self) -> Lifecycle {
        self.state.read().await.lifecycle
    }

    /// Mark the manager initialized; idempotent
    pub async fn init(&self) {
        let mut state = self.state.write().await;
        if state.lifecycle == Lifecycle::Created {
            state.lifecycle = Lifecycle::Initialized;
            debug!("Cache manager initialized");
        }
    }

    /// Select the backend and activate every registered cache
    ///
    /// With caching switched off no cache is activated and [`execute`]
    /// passes every operation straight to the executor.
    ///
    /// [`execute`]: Self::execute
    pub async fn activate(&self) {
        self.init().await;

        let mut state = self.state.write().await;
        if state.lifecycle == Lifecycle::Activated {
            return;
        }

        let backend = self.resolve_backend();
        let active = self.active_override.unwrap_or(self.settings.active);

        state.lifecycle = Lifecycle::Activated;
        state.active = active;
        state.backend = Some(Arc::clone(&backend));

        if !active {
            info!("Caching is inactive; requests pass through uncached");
            return;
        }

        for registered in &mut state.registry {
            registered.activated = true;
        }

        info!(
            "Activated {} cache(s) on the {} backend",
            state.registry.len(),
            backend.name()
        );
    }

    /// True once activation ran with caching switched on
    pub async fn is_active(&self) -> bool {
        let state = self.state.read().await;
        state.lifecycle == Lifecycle::Activated && state.active
    }

    /// Whether a registration made now is activated immediately
    pub async fn should_activate_now(&self) -> bool {
        self.is_active().await
    }

    /// Register a cache for whole operations named `query_name` (`"*"` for all)
    pub async fn register_query_cache(
        &self,
        query_name: &str,
        config: CacheConfig,
    ) -> Result<QueryCache> {
        let (id, rule) = self.register(CacheRule::query(query_name, config)).await?;
        Ok(QueryCache::new(id, rule))
    }

    /// Register a cache for fields named `field_name` (`"*"` for all)
    pub async fn register_field_cache(
        &self,
        field_name: &str,
        config: CacheConfig,
    ) -> Result<FieldCache> {
        let (id, rule) = self.register(CacheRule::field(field_name, config)).await?;
        Ok(FieldCache::new(id, rule))
    }

    async fn register(&self, rule: CacheRule) -> Result<(RuleId, Arc<CacheRule>)> {
        rule.config().validate()?;

        let mut state = self.state.write().await;

        if state.lifecycle == Lifecycle::Created {
            error!(
                "graphql-cache: registering caches without initializing the cache manager. \
                 Call CacheManager::init() before registering caches; \
                 the cache is recorded and activates with the manager."
            );
        }

        let id = RuleId(state.registry.len());
        let rule = Arc::new(rule);
        let activated = state.lifecycle == Lifecycle::Activated && state.active;

        state.registry.push(Registered {
            id,
            rule: Arc::clone(&rule),
            activated,
        });

        debug!(
            kind = ?rule.kind(),
            selector = rule.match_rule().selector(),
            zone = %rule.config().zone,
            activated,
            "Registered cache"
        );

        Ok((id, rule))
    }

    /// Number of registered caches, active or not
    pub async fn registered(&self) -> usize {
        self.state.read().await.registry.len()
    }

    /// Backend used by caches without their own
    pub async fn backend(&self) -> Arc<dyn Backend> {
        let state = self.state.read().await;
        match &state.backend {
            Some(backend) => Arc::clone(backend),
            None => self.resolve_backend(),
        }
    }

    fn resolve_backend(&self) -> Arc<dyn Backend> {
        match &self.backend_override {
            Some(backend) => Arc::clone(backend),
            None => create_backend(&self.settings),
        }
    }

    /// Activated rules with their backends resolved, in registration order
    async fn snapshot(&self) -> Arc<[ActiveRule]> {
        let state = self.state.read().await;

        let Some(default_backend) = state.backend.as_ref().filter(|_| state.active) else {
            return Arc::from(Vec::new());
        };

        state
            .registry
            .iter()
            .filter(|registered| registered.activated)
            .map(|registered| ActiveRule {
                id: registered.id,
                rule: Arc::clone(&registered.rule),
                backend: registered
                    .rule
                    .config()
                    .backend
                    .clone()
                    .unwrap_or_else(|| Arc::clone(default_backend)),
            })
            .collect::<Vec<_>>()
            .into()
    }

    /// Fresh request context for `identity`
    pub fn new_context(&self, identity: Option<String>) -> RequestContext {
        RequestContext::new(identity)
    }

    /// Diagnostic header values for a request processed with `ctx`
    pub fn diagnostics(&self, ctx: &RequestContext) -> CacheDiagnostics {
        ctx.diagnostics()
    }

    /// Execute a single or batched request through the caches
    ///
    /// Operations run strictly in order. The identity present when the
    /// request arrived is restored after every operation, and results come
    /// back in input order, unwrapped for a non-batch request. A call made
    /// with a context that is already being intercepted skips the caches.
    pub async fn execute(&self, request: &GraphQLRequest, ctx: &mut RequestContext) -> GraphQLResponse {
        if ctx.is_intercepting() {
            debug!("Re-entrant execution, bypassing cache interception");
            let mut results = Vec::with_capacity(request.operations().len());
            for operation in request.operations() {
                results.push(self.executor.execute(operation, ctx).await);
            }
            return shape_response(request, results);
        }

        let identity = ctx.identity().map(str::to_string);
        ctx.begin(self.snapshot().await);

        debug!(
            operations = ?request
                .operations()
                .iter()
                .map(|op| resolve_operation_name(op).unwrap_or_default())
                .collect::<Vec<_>>(),
            "Processing request"
        );

        let mut results = Vec::with_capacity(request.operations().len());
        for operation in request.operations() {
            let result = self.run_operation(operation, ctx).await;

            // Execution may have dropped the identity; later operations
            // must see the caller again
            ctx.set_identity(identity.clone());

            results.push(result);
        }

        ctx.finish();
        shape_response(request, results)
    }

    async fn run_operation(&self, operation: &Operation, ctx: &mut RequestContext) -> ExecutionResult {
        for interceptor in &self.interceptors {
            if let Some(result) = interceptor.try_handle(operation, ctx).await {
                debug!(interceptor = interceptor.name(), "Operation handled by interceptor");
                return result;
            }
        }

        if let Some(result) = self.query_cache_stage(operation, ctx).await {
            return result;
        }

        self.executor.execute(operation, ctx).await
    }

    /// First matching query cache serves or fills the operation
    async fn query_cache_stage(
        &self,
        operation: &Operation,
        ctx: &mut RequestContext,
    ) -> Option<ExecutionResult> {
        if operation.query.trim().is_empty() {
            return None;
        }

        let rules = ctx.rules();
        let target = MatchTarget::Operation(operation);
        let subject = resolve_operation_name(operation).unwrap_or_default();

        for active in rules.iter().filter(|r| r.rule.kind() == RuleKind::Query) {
            if !active.rule.matches(target) {
                ctx.record_unmatched(active.id);
                continue;
            }

            let Some(key) = active.rule.derive_key(target, ctx.identity()) else {
                continue;
            };

            let state = match active.rule.read(active.backend.as_ref(), &key).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(key = %key, "Query cache read failed, treating as miss: {}", e);
                    ctx.record_read_failure();
                    EntryState::Miss
                }
            };

            let cached = match state {
                EntryState::Hit(value) => {
                    match serde_json::from_str::<ExecutionResult>(&value.payload) {
                        Ok(result) => Some((result, value)),
                        Err(e) => {
                            warn!(key = %key, "Unreadable query cache payload: {}", e);
                            None
                        }
                    }
                }
                _ => None,
            };

            if let Some((result, value)) = cached {
                debug!(key = %key, "HIT query cache");
                ctx.record_query(active.id, &subject, key, EntryState::Hit(value));
                return Some(result);
            }

            debug!(key = %key, "MISS query cache");
            ctx.record_query(active.id, &subject, key.clone(), EntryState::Miss);

            let result = self.executor.execute(operation, ctx).await;

            if !result.has_errors() {
                self.write(active, &key, &result, ctx).await;
            }

            return Some(result);
        }

        None
    }

    async fn write(
        &self,
        active: &ActiveRule,
        key: &str,
        result: &ExecutionResult,
        ctx: &mut RequestContext,
    ) {
        let payload = match serde_json::to_string(result) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key, "Could not serialize result for the query cache: {}", e);
                ctx.record_write(false);
                return;
            }
        };

        let config = active.rule.config();
        let written = active
            .backend
            .set(&config.zone, key, CachedValue::from_payload(payload), config.ttl)
            .await;

        match written {
            Ok(()) => {
                debug!(key, zone = %config.zone, "Writing query cache");
                ctx.record_write(true);
            }
            Err(e) => {
                warn!(key, zone = %config.zone, "Query cache write failed: {}", e);
                ctx.record_write(false);
            }
        }
    }

    /// Every distinct backend in use: the default one plus rule-specific ones
    async fn backends(&self) -> Vec<Arc<dyn Backend>> {
        let mut backends = vec![self.backend().await];

        let state = self.state.read().await;
        for registered in &state.registry {
            if let Some(backend) = &registered.rule.config().backend {
                if !backends.iter().any(|known| Arc::ptr_eq(known, backend)) {
                    backends.push(Arc::clone(backend));
                }
            }
        }

        backends
    }

    /// Remove everything stored under `zone`; true when every backend completed
    pub async fn clear_zone(&self, zone: &str) -> bool {
        let mut completed = true;

        for backend in self.backends().await {
            match backend.clear_zone(zone).await {
                Ok(done) => completed &= done,
                Err(e) => {
                    warn!(backend = backend.name(), zone, "Failed to clear cache zone: {}", e);
                    completed = false;
                }
            }
        }

        completed
    }

    /// Remove everything from every backend; true when every backend completed
    pub async fn clear(&self) -> bool {
        let mut completed = true;

        for backend in self.backends().await {
            match backend.clear().await {
                Ok(done) => completed &= done,
                Err(e) => {
                    warn!(backend = backend.name(), "Failed to clear cache: {}", e);
                    completed = false;
                }
            }
        }

        completed
    }
}

fn shape_response(request: &GraphQLRequest, results: Vec<ExecutionResult>) -> GraphQLResponse {
    if request.is_batch() {
        GraphQLResponse::Batch(results)
    } else {
        GraphQLResponse::Single(results.into_iter().next().unwrap_or_default())
    }
}
