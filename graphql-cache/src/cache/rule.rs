//! Cache rules: what a registered query or field cache matches and how it
//! derives its key
//!
//! Rules are immutable once registered. Everything that changes while a
//! request is evaluated (current key, match and hit state) lives in the
//! [`RequestContext`], so one rule can serve any number of requests.

use crate::backend::Backend;
use crate::cache::config::CacheConfig;
use crate::cache::context::{RequestContext, RuleOutcome};
use crate::cache::key::{self, CacheKeyBuilder};
use crate::cache::types::{CacheKey, CachedValue, Operation};
use crate::error::Result;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Selector matching every operation or field
pub const WILDCARD: &str = "*";

/// Position of a rule in the manager's registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub(crate) usize);

impl RuleId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Name matching for a rule
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchRule {
    /// Matches one operation or field name exactly
    Exact(String),

    /// Matches everything
    Wildcard,
}

impl MatchRule {
    /// Parse a selector, treating `"*"` as the wildcard
    pub fn parse(selector: &str) -> Self {
        if selector == WILDCARD {
            MatchRule::Wildcard
        } else {
            MatchRule::Exact(selector.to_string())
        }
    }

    pub fn matches(&self, name: Option<&str>) -> bool {
        match self {
            MatchRule::Wildcard => true,
            MatchRule::Exact(expected) => name == Some(expected.as_str()),
        }
    }

    /// The selector as configured
    pub fn selector(&self) -> &str {
        match self {
            MatchRule::Wildcard => WILDCARD,
            MatchRule::Exact(name) => name,
        }
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.selector())
    }
}

/// What a rule is evaluated against
#[derive(Debug, Clone, Copy)]
pub enum MatchTarget<'a> {
    /// A whole top-level operation
    Operation(&'a Operation),

    /// A single field computation with its arguments
    Field {
        name: &'a str,
        args: Option<&'a Value>,
    },
}

/// Kind of a registered rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    Query,
    Field,
}

/// Caches whole operations by name
#[derive(Debug, Clone)]
pub struct QueryCacheRule {
    pub match_rule: MatchRule,
    pub config: CacheConfig,
}

/// Caches individual field computations by field name
#[derive(Debug, Clone)]
pub struct FieldCacheRule {
    pub match_rule: MatchRule,
    pub config: CacheConfig,
}

/// A registered cache rule
#[derive(Debug, Clone)]
pub enum CacheRule {
    Query(QueryCacheRule),
    Field(FieldCacheRule),
}

impl CacheRule {
    pub fn query(selector: &str, config: CacheConfig) -> Self {
        CacheRule::Query(QueryCacheRule {
            match_rule: MatchRule::parse(selector),
            config,
        })
    }

    pub fn field(selector: &str, config: CacheConfig) -> Self {
        CacheRule::Field(FieldCacheRule {
            match_rule: MatchRule::parse(selector),
            config,
        })
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            CacheRule::Query(_) => RuleKind::Query,
            CacheRule::Field(_) => RuleKind::Field,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        match self {
            CacheRule::Query(rule) => &rule.config,
            CacheRule::Field(rule) => &rule.config,
        }
    }

    pub fn match_rule(&self) -> &MatchRule {
        match self {
            CacheRule::Query(rule) => &rule.match_rule,
            CacheRule::Field(rule) => &rule.match_rule,
        }
    }

    /// Apply the match rule; a rule never matches a target of the other kind
    pub fn matches(&self, target: MatchTarget<'_>) -> bool {
        match (self, target) {
            (CacheRule::Query(rule), MatchTarget::Operation(operation)) => {
                let name = key::resolve_operation_name(operation);
                rule.match_rule.matches(name.as_deref())
            }
            (CacheRule::Field(rule), MatchTarget::Field { name, .. }) => {
                rule.match_rule.matches(Some(name))
            }
            _ => false,
        }
    }

    /// Derive the cache key for `target` as seen by `identity`
    ///
    /// Query keys: `query-<operation>-<user>-<hash(document)>-<hash(variables)|null>`,
    /// where an anonymous operation falls back to the rule's selector.
    /// Field keys: `field-<field>-<user>-<hash(args)|null>`.
    pub fn derive_key(&self, target: MatchTarget<'_>, identity: Option<&str>) -> Option<CacheKey> {
        let scope = key::user_scope(self.config().per_user, identity);

        match (self, target) {
            (CacheRule::Query(rule), MatchTarget::Operation(operation)) => {
                let args_hash = if operation.variables_empty() {
                    key::EMPTY_ARGS_HASH.to_string()
                } else {
                    key::args_hash(operation.variables.as_ref())
                };

                let name = key::resolve_operation_name(operation)
                    .unwrap_or_else(|| rule.match_rule.selector().to_string());

                Some(
                    CacheKeyBuilder::query(name)
                        .user_scope(scope)
                        .part(key::hash(&operation.query))
                        .part(args_hash)
                        .build(),
                )
            }
            (CacheRule::Field(_), MatchTarget::Field { name, args }) => Some(
                CacheKeyBuilder::field(name)
                    .user_scope(scope)
                    .part(key::args_hash(args))
                    .build(),
            ),
            _ => None,
        }
    }

    /// Look `key` up in `backend` under this rule's zone
    pub async fn read(&self, backend: &dyn Backend, key: &str) -> Result<EntryState> {
        let state = match backend.get(&self.config().zone, key).await? {
            Some(value) => EntryState::Hit(value),
            None => EntryState::Miss,
        };
        Ok(state)
    }
}

/// Evaluation state of one rule within one request
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EntryState {
    /// Not looked at yet in this request
    #[default]
    Unevaluated,

    /// Evaluated and did not match
    Unmatched,

    /// Matched and found a stored value
    Hit(CachedValue),

    /// Matched and found nothing
    Miss,
}

impl EntryState {
    pub fn has_match(&self) -> bool {
        matches!(self, EntryState::Hit(_) | EntryState::Miss)
    }

    pub fn has_hit(&self) -> bool {
        matches!(self, EntryState::Hit(_))
    }

    /// Stored payload on a hit
    pub fn cached_data(&self) -> Option<&str> {
        match self {
            EntryState::Hit(value) => Some(&value.payload),
            _ => None,
        }
    }
}

macro_rules! rule_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            id: RuleId,
            rule: Arc<CacheRule>,
        }

        impl $name {
            pub(crate) fn new(id: RuleId, rule: Arc<CacheRule>) -> Self {
                Self { id, rule }
            }

            pub fn id(&self) -> RuleId {
                self.id
            }

            /// Configured name or `"*"`
            pub fn selector(&self) -> &str {
                self.rule.match_rule().selector()
            }

            pub fn zone(&self) -> &str {
                &self.rule.config().zone
            }

            pub fn ttl(&self) -> Option<Duration> {
                self.rule.config().ttl
            }

            pub fn per_user(&self) -> bool {
                self.rule.config().per_user
            }

            pub fn rule(&self) -> &CacheRule {
                &self.rule
            }

            /// Whether the rule matched anything in the request
            pub fn has_match(&self, ctx: &RequestContext) -> bool {
                self.outcome(ctx).is_some_and(|o| o.state.has_match())
            }

            /// Whether the most recent match in the request was a hit
            pub fn has_hit(&self, ctx: &RequestContext) -> bool {
                self.outcome(ctx).is_some_and(|o| o.state.has_hit())
            }

            /// Payload served by the most recent hit
            pub fn get_cached_data<'c>(&self, ctx: &'c RequestContext) -> Option<&'c str> {
                self.outcome(ctx).and_then(|o| o.state.cached_data())
            }

            /// Key derived by the most recent match
            pub fn current_key<'c>(&self, ctx: &'c RequestContext) -> Option<&'c str> {
                self.outcome(ctx).and_then(|o| o.key.as_deref())
            }

            fn outcome<'c>(&self, ctx: &'c RequestContext) -> Option<&'c RuleOutcome> {
                ctx.outcome(self.id)
            }
        }
    };
}

rule_handle!(
    /// Handle to a registered query cache
    QueryCache
);

rule_handle!(
    /// Handle to a registered field cache
    FieldCache
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;

    fn posts_operation() -> Operation {
        Operation::new("query Posts($first: Int) { posts(first: $first) { id } }")
            .with_variables(json!({ "first": 10, "after": null }))
    }

    #[test]
    fn test_match_rule() {
        assert!(MatchRule::parse("*").matches(Some("Anything")));
        assert!(MatchRule::parse("*").matches(None));
        assert!(MatchRule::parse("Posts").matches(Some("Posts")));
        assert!(!MatchRule::parse("Posts").matches(Some("Pages")));
        assert!(!MatchRule::parse("Posts").matches(None));
        assert_eq!(MatchRule::Wildcard.to_string(), "*");
    }

    #[test]
    fn test_query_rule_matches_parsed_or_explicit_name() {
        let rule = CacheRule::query("Posts", CacheConfig::default());

        assert!(rule.matches(MatchTarget::Operation(&posts_operation())));

        let renamed = posts_operation().with_operation_name("Other");
        assert!(!rule.matches(MatchTarget::Operation(&renamed)));

        let wildcard = CacheRule::query("*", CacheConfig::default());
        assert!(wildcard.matches(MatchTarget::Operation(&renamed)));
        assert!(wildcard.matches(MatchTarget::Operation(&Operation::new("{ a }"))));
    }

    #[test]
    fn test_rules_do_not_match_other_kinds() {
        let query = CacheRule::query("*", CacheConfig::default());
        let field = CacheRule::field("*", CacheConfig::default());

        assert!(!query.matches(MatchTarget::Field { name: "menu", args: None }));
        assert!(!field.matches(MatchTarget::Operation(&posts_operation())));
        assert!(query
            .derive_key(MatchTarget::Field { name: "menu", args: None }, None)
            .is_none());
    }

    #[test]
    fn test_query_key_is_deterministic() {
        let rule = CacheRule::query("Posts", CacheConfig::default());

        let a = posts_operation();
        let b = posts_operation().with_variables(json!({ "after": null, "first": 10 }));

        let key_a = rule.derive_key(MatchTarget::Operation(&a), Some("5")).unwrap();
        let key_b = rule.derive_key(MatchTarget::Operation(&b), Some("5")).unwrap();

        assert_eq!(key_a, key_b);
        assert!(key_a.starts_with("query-Posts-0-"));
    }

    #[test]
    fn test_wildcard_query_key_names_the_operation() {
        let rule = CacheRule::query("*", CacheConfig::default());

        let named = rule
            .derive_key(MatchTarget::Operation(&posts_operation()), None)
            .unwrap();
        assert!(named.starts_with("query-Posts-0-"));

        let renamed = posts_operation().with_operation_name("Feed");
        let key = rule.derive_key(MatchTarget::Operation(&renamed), None).unwrap();
        assert!(key.starts_with("query-Feed-0-"));

        let anonymous = rule
            .derive_key(MatchTarget::Operation(&Operation::new("{ posts { id } }")), None)
            .unwrap();
        assert!(anonymous.starts_with("query-*-0-"));
    }

    #[test]
    fn test_query_key_variables() {
        let rule = CacheRule::query("Posts", CacheConfig::default());

        let none = Operation::new("query Posts { posts { id } }");
        let key = rule.derive_key(MatchTarget::Operation(&none), None).unwrap();
        assert!(key.ends_with("-null"));

        let first = posts_operation();
        let second = posts_operation().with_variables(json!({ "first": 20 }));
        assert_ne!(
            rule.derive_key(MatchTarget::Operation(&first), None),
            rule.derive_key(MatchTarget::Operation(&second), None)
        );
    }

    #[test]
    fn test_per_user_key_scope() {
        let config = CacheConfig::builder().per_user(true).build();
        let rule = CacheRule::query("Posts", config);
        let op = posts_operation();

        let alice = rule.derive_key(MatchTarget::Operation(&op), Some("alice")).unwrap();
        let bob = rule.derive_key(MatchTarget::Operation(&op), Some("bob")).unwrap();
        let anonymous = rule.derive_key(MatchTarget::Operation(&op), None).unwrap();

        assert!(alice.starts_with("query-Posts-alice-"));
        assert_ne!(alice, bob);
        assert!(anonymous.starts_with("query-Posts-0-"));
    }

    #[test]
    fn test_field_key() {
        let rule = CacheRule::field("*", CacheConfig::default());

        let key = rule
            .derive_key(MatchTarget::Field { name: "menu", args: None }, None)
            .unwrap();
        assert_eq!(key, "field-menu-0-null");

        let args = json!({ "location": "footer" });
        let key = rule
            .derive_key(MatchTarget::Field { name: "menu", args: Some(&args) }, None)
            .unwrap();
        assert!(key.starts_with("field-menu-0-"));
        assert!(!key.ends_with("-null"));
    }

    #[tokio::test]
    async fn test_read_hit_and_miss() {
        let backend = MemoryBackend::new();
        let rule = CacheRule::query("Posts", CacheConfig::builder().zone("posts").build());

        let state = rule.read(&backend, "k").await.unwrap();
        assert_eq!(state, EntryState::Miss);
        assert!(state.has_match());
        assert!(!state.has_hit());

        backend
            .set("posts", "k", CachedValue::from_payload("{}"), None)
            .await
            .unwrap();

        let state = rule.read(&backend, "k").await.unwrap();
        assert!(state.has_hit());
        assert_eq!(state.cached_data(), Some("{}"));
    }

    #[test]
    fn test_entry_state_defaults() {
        let state = EntryState::default();
        assert_eq!(state, EntryState::Unevaluated);
        assert!(!state.has_match());
        assert!(!EntryState::Unmatched.has_match());
        assert!(EntryState::Unmatched.cached_data().is_none());
    }
}
