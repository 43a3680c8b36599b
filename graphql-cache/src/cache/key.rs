//! Deterministic cache key derivation
//!
//! Keys are built from the operation name, the user scope, a hash of the
//! query document and a hash of the canonically serialized variables, so
//! that two requests differing only in the ordering of variable object keys
//! map to the same entry.

use crate::cache::types::{CacheKey, Operation};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// User scope used when a rule is not per-user or the caller is anonymous
pub const SHARED_USER_SCOPE: &str = "0";

/// Placeholder for the variables/arguments hash when there are none
pub const EMPTY_ARGS_HASH: &str = "null";

/// Stable lowercase hex SHA-256 of `input`
pub fn hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Canonical JSON text of `value` with object keys sorted recursively
pub fn stable_string(value: &Value) -> String {
    let mut out = String::new();
    write_stable(value, &mut out);
    out
}

fn write_stable(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Serializing a plain string cannot fail
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_stable(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_stable(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Hash of the canonical form of `args`, or `"null"` when there are none
pub fn args_hash(args: Option<&Value>) -> String {
    match args {
        None | Some(Value::Null) => EMPTY_ARGS_HASH.to_string(),
        Some(Value::Object(map)) if map.is_empty() => EMPTY_ARGS_HASH.to_string(),
        Some(Value::Array(items)) if items.is_empty() => EMPTY_ARGS_HASH.to_string(),
        Some(value) => hash(&stable_string(value)),
    }
}

/// Best-effort name of the first named operation in a query document
///
/// Returns `None` for anonymous operations and the `{ ... }` shorthand.
pub fn query_name(document: &str) -> Option<String> {
    let mut tokens = tokenize(document).into_iter();

    while let Some(token) = tokens.next() {
        match token {
            "query" | "mutation" | "subscription" => {
                return tokens
                    .next()
                    .filter(|name| is_name(name))
                    .map(str::to_string);
            }
            // Shorthand query
            "{" => return None,
            "fragment" => skip_block(&mut tokens),
            _ => {}
        }
    }

    None
}

/// Explicit operation name, else the one parsed out of the document
pub fn resolve_operation_name(operation: &Operation) -> Option<String> {
    operation
        .operation_name
        .as_deref()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| query_name(&operation.query))
}

/// Identity when the rule is per-user, otherwise the shared scope
pub fn user_scope(per_user: bool, identity: Option<&str>) -> String {
    match identity {
        Some(id) if per_user && !id.is_empty() => id.to_string(),
        _ => SHARED_USER_SCOPE.to_string(),
    }
}

/// Splits a document into names and punctuators, dropping comments
fn tokenize(document: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut chars = document.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        if c == '#' {
            for (_, c) in chars.by_ref() {
                if c == '\n' {
                    break;
                }
            }
        } else if is_name_char(c) {
            let mut end = start + c.len_utf8();
            while let Some(&(i, c)) = chars.peek() {
                if !is_name_char(c) {
                    break;
                }
                end = i + c.len_utf8();
                chars.next();
            }
            tokens.push(&document[start..end]);
        } else if !c.is_whitespace() && c != ',' {
            tokens.push(&document[start..start + c.len_utf8()]);
        }
    }

    tokens
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Consume tokens up to and including the block closing a fragment
fn skip_block<'a>(tokens: &mut impl Iterator<Item = &'a str>) {
    let mut depth = 0usize;
    for token in tokens.by_ref() {
        match token {
            "{" => depth += 1,
            "}" => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return;
                }
            }
            _ => {}
        }
    }
}

fn is_name(token: &str) -> bool {
    let mut chars = token.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Builder for the textual cache keys written to backends
///
/// Produces `<kind>-<name>-<user_scope>[-<part>...]`.
pub struct CacheKeyBuilder {
    kind: &'static str,
    name: String,
    user_scope: String,
    parts: Vec<String>,
}

impl CacheKeyBuilder {
    /// Key for a whole-operation cache entry
    pub fn query(name: impl Into<String>) -> Self {
        Self::new("query", name)
    }

    /// Key for a field cache entry
    pub fn field(name: impl Into<String>) -> Self {
        Self::new("field", name)
    }

    fn new(kind: &'static str, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            user_scope: SHARED_USER_SCOPE.to_string(),
            parts: Vec::new(),
        }
    }

    /// Set the user scope segment
    pub fn user_scope(mut self, scope: impl Into<String>) -> Self {
        self.user_scope = scope.into();
        self
    }

    /// Append a segment
    pub fn part(mut self, part: impl Into<String>) -> Self {
        self.parts.push(part.into());
        self
    }

    /// Build the cache key
    pub fn build(self) -> CacheKey {
        let mut key = format!("{}-{}-{}", self.kind, self.name, self.user_scope);
        for part in &self.parts {
            key.push('-');
            key.push_str(part);
        }
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_is_stable_hex() {
        let a = hash("query { posts { id } }");
        let b = hash("query { posts { id } }");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, hash("query { pages { id } }"));
    }

    #[test]
    fn test_stable_string_sorts_nested_keys() {
        let a = json!({ "b": 1, "a": { "y": [3, 1], "x": null } });
        let b = json!({ "a": { "x": null, "y": [3, 1] }, "b": 1 });

        assert_eq!(stable_string(&a), stable_string(&b));
        assert_eq!(stable_string(&a), r#"{"a":{"x":null,"y":[3,1]},"b":1}"#);
    }

    #[test]
    fn test_stable_string_keeps_array_order() {
        assert_ne!(stable_string(&json!([1, 2])), stable_string(&json!([2, 1])));
    }

    #[test]
    fn test_stable_string_escapes_keys() {
        let value = json!({ "quote\"key": "v" });
        assert_eq!(stable_string(&value), r#"{"quote\"key":"v"}"#);
    }

    #[test]
    fn test_args_hash() {
        assert_eq!(args_hash(None), "null");
        assert_eq!(args_hash(Some(&json!({}))), "null");
        assert_eq!(args_hash(Some(&Value::Null)), "null");
        assert_eq!(
            args_hash(Some(&json!({ "a": 1, "b": 2 }))),
            args_hash(Some(&json!({ "b": 2, "a": 1 })))
        );
    }

    #[test]
    fn test_query_name() {
        assert_eq!(query_name("query Posts { posts { id } }").as_deref(), Some("Posts"));
        assert_eq!(
            query_name("mutation UpdatePost($id: ID!) { updatePost(id: $id) { id } }").as_deref(),
            Some("UpdatePost")
        );
        assert_eq!(query_name("  subscription\nOnPost{ a }").as_deref(), Some("OnPost"));
        assert_eq!(query_name("query($id: ID) { a }"), None);
        assert_eq!(query_name("{ posts { id } }"), None);
        assert_eq!(query_name(""), None);
    }

    #[test]
    fn test_query_name_skips_comments_and_fragments() {
        let doc = "# query Fake\nfragment F on Post { id title }\nquery Real { posts { ...F } }";
        assert_eq!(query_name(doc).as_deref(), Some("Real"));
    }

    #[test]
    fn test_resolve_operation_name_prefers_explicit() {
        let op = Operation::new("query Parsed { a }").with_operation_name("Explicit");
        assert_eq!(resolve_operation_name(&op).as_deref(), Some("Explicit"));

        let op = Operation::new("query Parsed { a }");
        assert_eq!(resolve_operation_name(&op).as_deref(), Some("Parsed"));
    }

    #[test]
    fn test_user_scope() {
        assert_eq!(user_scope(true, Some("42")), "42");
        assert_eq!(user_scope(false, Some("42")), "0");
        assert_eq!(user_scope(true, None), "0");
    }

    #[test]
    fn test_cache_key_builder() {
        let key = CacheKeyBuilder::query("Posts")
            .user_scope("7")
            .part("abc")
            .part("null")
            .build();
        assert_eq!(key, "query-Posts-7-abc-null");

        let key = CacheKeyBuilder::field("menu").part("null").build();
        assert_eq!(key, "field-menu-0-null");
    }
}
