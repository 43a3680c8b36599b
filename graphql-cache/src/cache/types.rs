//! Core type definitions for the cache system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Cache key type - derived per request by the cache rules
pub type CacheKey = String;

/// Logical namespace grouping cache keys for bulk invalidation
pub type Zone = String;

/// Response header carrying the aggregate query-cache status
pub const QUERY_CACHE_HEADER: &str = "x-graphql-query-cache";

/// Response header listing the field caches that matched
pub const FIELD_CACHE_HEADER: &str = "x-graphql-field-cache";

/// A stored payload plus the metadata a backend needs to enforce its ttl
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedValue {
    /// Pre-encoded payload (JSON text of a result or field value)
    pub payload: String,

    /// When the value was written
    pub stored_at: DateTime<Utc>,

    /// When the value stops being served; `None` lives until cleared
    pub expires_at: Option<DateTime<Utc>>,
}

impl CachedValue {
    /// Wrap a payload, computing the expiry from `ttl`
    pub fn new(payload: impl Into<String>, ttl: Option<Duration>) -> Self {
        Self::from_payload(payload).with_ttl(ttl)
    }

    /// Wrap a payload that never expires
    pub fn from_payload(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            stored_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Restamp the write time and recompute the expiry from `ttl`
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        let now = Utc::now();
        self.stored_at = now;
        // A ttl too large to represent behaves like no ttl
        self.expires_at = ttl
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .and_then(|ttl| now.checked_add_signed(ttl));
        self
    }

    /// Check if the value has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expires_at| Utc::now() >= expires_at)
    }

    /// Get time until expiration (`None` if expired or never expiring)
    pub fn time_until_expiration(&self) -> Option<Duration> {
        let expires_at = self.expires_at?;
        (expires_at - Utc::now()).to_std().ok()
    }

    /// Size of the payload in bytes
    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }
}

/// One GraphQL operation as sent over HTTP
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Operation {
    /// The query document
    #[serde(default)]
    pub query: String,

    /// Explicit operation name
    #[serde(
        default,
        rename = "operationName",
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_name: Option<String>,

    /// Operation variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
}

impl Operation {
    /// Create an operation from a query document
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            operation_name: None,
            variables: None,
        }
    }

    /// Set the explicit operation name
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Set the variables
    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    /// True when the operation carries no meaningful variables
    pub fn variables_empty(&self) -> bool {
        match &self.variables {
            None | Some(Value::Null) => true,
            Some(Value::Object(map)) => map.is_empty(),
            Some(Value::Array(items)) => items.is_empty(),
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        }
    }
}

/// An inbound request: one operation or an ordered batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraphQLRequest {
    Batch(Vec<Operation>),
    Single(Operation),
}

impl GraphQLRequest {
    pub fn is_batch(&self) -> bool {
        matches!(self, GraphQLRequest::Batch(_))
    }

    /// Operations in input order
    pub fn operations(&self) -> &[Operation] {
        match self {
            GraphQLRequest::Batch(ops) => ops,
            GraphQLRequest::Single(op) => std::slice::from_ref(op),
        }
    }
}

impl From<Operation> for GraphQLRequest {
    fn from(operation: Operation) -> Self {
        GraphQLRequest::Single(operation)
    }
}

impl From<Vec<Operation>> for GraphQLRequest {
    fn from(operations: Vec<Operation>) -> Self {
        GraphQLRequest::Batch(operations)
    }
}

/// Result object returned by the execution engine
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// `None` when absent; an explicit `null` stays `Some(Value::Null)`
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl ExecutionResult {
    /// Successful result carrying `data`
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Default::default()
        }
    }

    /// Failed result carrying a single error message
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: None,
            errors: vec![serde_json::json!({ "message": message.into() })],
            extensions: None,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

fn present_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Response mirroring the shape of the request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraphQLResponse {
    Batch(Vec<ExecutionResult>),
    Single(ExecutionResult),
}

impl GraphQLResponse {
    /// Flatten into results in input order
    pub fn into_results(self) -> Vec<ExecutionResult> {
        match self {
            GraphQLResponse::Batch(results) => results,
            GraphQLResponse::Single(result) => vec![result],
        }
    }
}

/// Aggregate status of the query caches over one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryCacheStatus {
    Hit,
    Miss,
    Mixed,
}

impl QueryCacheStatus {
    /// Fold hit/miss counts into a header status
    pub fn from_counts(hits: u64, misses: u64) -> Self {
        match (hits, misses) {
            (h, m) if h > 0 && m > 0 => QueryCacheStatus::Mixed,
            (h, _) if h > 0 => QueryCacheStatus::Hit,
            _ => QueryCacheStatus::Miss,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryCacheStatus::Hit => "HIT",
            QueryCacheStatus::Miss => "MISS",
            QueryCacheStatus::Mixed => "MIXED",
        }
    }
}

impl fmt::Display for QueryCacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Query cache lookups that found a value
    pub hits: u64,

    /// Query cache lookups that found nothing
    pub misses: u64,

    /// Successful writes
    pub writes: u64,

    /// Writes the backend rejected
    pub write_failures: u64,

    /// Reads the backend failed (counted as misses too)
    pub read_failures: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Total lookups performed
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, writes: {}, write_failures: {}, read_failures: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.writes,
            self.write_failures,
            self.read_failures
        )
    }
}
