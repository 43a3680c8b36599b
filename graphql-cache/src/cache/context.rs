//! Request-scoped cache state
//!
//! A [`RequestContext`] carries everything that varies per request: the
//! caller identity, the re-entrancy marker, per-rule outcomes and the hit/miss
//! counters behind the diagnostic headers. Nothing here is shared between
//! requests, so a long-lived process never leaks one request's state into
//! the next.

use crate::backend::Backend;
use crate::cache::rule::{CacheRule, EntryState, MatchTarget, RuleId, RuleKind};
use crate::cache::types::{
    CacheKey, CacheStats, CachedValue, QueryCacheStatus, FIELD_CACHE_HEADER, QUERY_CACHE_HEADER,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// A registered rule that is active for the request, with its backend resolved
#[derive(Clone)]
pub(crate) struct ActiveRule {
    pub id: RuleId,
    pub rule: Arc<CacheRule>,
    pub backend: Arc<dyn Backend>,
}

/// Outcome of the most recent evaluation of one rule
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleOutcome {
    /// Operation or field name the rule was evaluated against
    pub subject: String,

    /// Key derived for that evaluation
    pub key: Option<CacheKey>,

    pub state: EntryState,
}

/// Diagnostic header values for one request
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheDiagnostics {
    /// `HIT`, `MISS` or `MIXED`; `None` when no query cache is active
    pub query_cache: Option<QueryCacheStatus>,

    /// `HIT:<name>, MISS:<name>, ...`; `None` when no field cache matched
    pub field_cache: Option<String>,
}

impl CacheDiagnostics {
    /// Header name/value pairs to attach to the response
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();

        if let Some(value) = &self.field_cache {
            headers.push((FIELD_CACHE_HEADER, value.clone()));
        }

        if let Some(status) = self.query_cache {
            headers.push((QUERY_CACHE_HEADER, status.to_string()));
        }

        headers
    }
}

/// Per-request cache state
pub struct RequestContext {
    identity: Option<String>,
    intercepting: bool,
    rules: Arc<[ActiveRule]>,
    outcomes: HashMap<RuleId, RuleOutcome>,

    /// Field evaluations in first-seen order, one per (rule, key)
    field_outcomes: Vec<(RuleId, RuleOutcome)>,

    stats: CacheStats,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RequestContext {
    /// Fresh context for a caller; `None` is anonymous
    pub fn new(identity: Option<String>) -> Self {
        Self {
            identity,
            intercepting: false,
            rules: Arc::from(Vec::new()),
            outcomes: HashMap::new(),
            field_outcomes: Vec::new(),
            stats: CacheStats::default(),
        }
    }

    /// Currently authenticated identity
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn set_identity(&mut self, identity: Option<String>) {
        self.identity = identity;
    }

    /// Drop the identity, as an engine does after an authentication failure
    pub fn clear_identity(&mut self) {
        self.identity = None;
    }

    /// True while the manager is processing this request's operations
    pub fn is_intercepting(&self) -> bool {
        self.intercepting
    }

    /// Counters accumulated by query caches in this request
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Outcome of the most recent evaluation of rule `id`
    pub fn outcome(&self, id: RuleId) -> Option<&RuleOutcome> {
        self.outcomes.get(&id)
    }

    /// Forget every outcome and counter, keeping the identity
    pub fn reset(&mut self) {
        self.intercepting = false;
        self.outcomes.clear();
        self.field_outcomes.clear();
        self.stats = CacheStats::default();
    }

    /// Start a request cycle against the active rules
    pub(crate) fn begin(&mut self, rules: Arc<[ActiveRule]>) {
        self.reset();
        self.rules = rules;
        self.intercepting = true;
    }

    pub(crate) fn finish(&mut self) {
        self.intercepting = false;
    }

    pub(crate) fn rules(&self) -> Arc<[ActiveRule]> {
        Arc::clone(&self.rules)
    }

    /// Note that rule `id` did not match, without hiding an earlier match
    pub(crate) fn record_unmatched(&mut self, id: RuleId) {
        let outcome = self.outcomes.entry(id).or_default();
        if outcome.state == EntryState::Unevaluated {
            outcome.state = EntryState::Unmatched;
        }
    }

    /// Record a query-cache evaluation and fold it into the counters
    pub(crate) fn record_query(&mut self, id: RuleId, subject: &str, key: CacheKey, state: EntryState) {
        if state.has_hit() {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        self.record(id, subject, key, state);
    }

    pub(crate) fn record(&mut self, id: RuleId, subject: &str, key: CacheKey, state: EntryState) {
        self.outcomes.insert(
            id,
            RuleOutcome {
                subject: subject.to_string(),
                key: Some(key),
                state,
            },
        );
    }

    /// Record a field evaluation; a wildcard rule keeps one entry per field key
    fn record_field(&mut self, id: RuleId, field: &str, key: CacheKey, state: EntryState) {
        let outcome = RuleOutcome {
            subject: field.to_string(),
            key: Some(key.clone()),
            state: state.clone(),
        };

        match self
            .field_outcomes
            .iter_mut()
            .find(|(rule, o)| *rule == id && o.key.as_deref() == Some(key.as_str()))
        {
            Some((_, existing)) => *existing = outcome,
            None => self.field_outcomes.push((id, outcome)),
        }

        self.record(id, field, key, state);
    }

    fn field_missed(&self, id: RuleId, key: &str) -> bool {
        self.field_outcomes
            .iter()
            .any(|(rule, o)| *rule == id && o.key.as_deref() == Some(key) && o.state == EntryState::Miss)
    }

    pub(crate) fn record_read_failure(&mut self) {
        self.stats.read_failures += 1;
    }

    pub(crate) fn record_write(&mut self, ok: bool) {
        if ok {
            self.stats.writes += 1;
        } else {
            self.stats.write_failures += 1;
        }
    }

    /// Look a field computation up in every matching field cache
    ///
    /// Returns the first stored value found; every matching rule records its
    /// outcome for the field header. Called by the execution engine while it
    /// resolves `field`.
    pub async fn read_field(&mut self, field: &str, args: Option<&Value>) -> Option<Value> {
        let rules = self.rules();
        let target = MatchTarget::Field { name: field, args };
        let mut found = None;

        for active in rules.iter().filter(|r| r.rule.kind() == RuleKind::Field) {
            if !active.rule.matches(target) {
                self.record_unmatched(active.id);
                continue;
            }

            let Some(key) = active.rule.derive_key(target, self.identity()) else {
                continue;
            };

            let state = match active.rule.read(active.backend.as_ref(), &key).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(field, key = %key, "Field cache read failed, treating as miss: {}", e);
                    self.record_read_failure();
                    EntryState::Miss
                }
            };

            let state = match state {
                EntryState::Hit(value) => match serde_json::from_str::<Value>(&value.payload) {
                    Ok(decoded) => {
                        debug!(field, key = %key, "HIT field cache");
                        if found.is_none() {
                            found = Some(decoded);
                        }
                        EntryState::Hit(value)
                    }
                    Err(e) => {
                        warn!(field, key = %key, "Unreadable field cache payload: {}", e);
                        EntryState::Miss
                    }
                },
                other => {
                    debug!(field, key = %key, "MISS field cache");
                    other
                }
            };

            self.record_field(active.id, field, key, state);
        }

        found
    }

    /// Store a computed field value in every matching field cache that missed
    ///
    /// Call after [`read_field`](Self::read_field) returned `None` and the
    /// engine computed `value` itself.
    pub async fn write_field(&mut self, field: &str, args: Option<&Value>, value: &Value) {
        let rules = self.rules();
        let target = MatchTarget::Field { name: field, args };

        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(field, "Could not serialize field value: {}", e);
                return;
            }
        };

        for active in rules.iter().filter(|r| r.rule.kind() == RuleKind::Field) {
            if !active.rule.matches(target) {
                continue;
            }

            let Some(key) = active.rule.derive_key(target, self.identity()) else {
                continue;
            };

            if !self.field_missed(active.id, &key) {
                continue;
            }

            let config = active.rule.config();
            let result = active
                .backend
                .set(&config.zone, &key, CachedValue::from_payload(payload.clone()), config.ttl)
                .await;

            match result {
                Ok(()) => {
                    debug!(field, key = %key, zone = %config.zone, "Writing field cache");
                    self.record_write(true);
                }
                Err(e) => {
                    warn!(field, key = %key, "Field cache write failed: {}", e);
                    self.record_write(false);
                }
            }
        }
    }

    /// Header values summarizing the whole request
    ///
    /// Computed from the final state, so it reflects every operation of a
    /// batch. The query header appears whenever a query cache is active.
    pub fn diagnostics(&self) -> CacheDiagnostics {
        let mut field_lines = Vec::new();
        let mut query_active = false;

        for active in self.rules.iter() {
            match active.rule.kind() {
                RuleKind::Query => query_active = true,
                RuleKind::Field => {
                    // One line per distinct field; the latest evaluation wins
                    let mut fields: Vec<(&str, bool)> = Vec::new();
                    for (_, outcome) in self.field_outcomes.iter().filter(|(id, _)| *id == active.id) {
                        let hit = match outcome.state {
                            EntryState::Hit(_) => true,
                            EntryState::Miss => false,
                            _ => continue,
                        };
                        match fields.iter_mut().find(|(name, _)| *name == outcome.subject) {
                            Some(line) => line.1 = hit,
                            None => fields.push((outcome.subject.as_str(), hit)),
                        }
                    }

                    field_lines.extend(fields.into_iter().map(|(name, hit)| {
                        format!("{}:{}", if hit { "HIT" } else { "MISS" }, name)
                    }));
                }
            }
        }

        CacheDiagnostics {
            query_cache: query_active
                .then(|| QueryCacheStatus::from_counts(self.stats.hits, self.stats.misses)),
            field_cache: (!field_lines.is_empty()).then(|| field_lines.join(", ")),
        }
    }
}
