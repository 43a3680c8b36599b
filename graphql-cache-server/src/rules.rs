//! Cache rule file
//!
//! ```yaml
//! query_caches:
//!   - query_name: Posts
//!     zone: posts
//!     expire: 300
//! field_caches:
//!   - field_name: menu
//!     zone: menus
//!     per_user: true
//! ```

use anyhow::{Context, Result};
use graphql_cache::{CacheConfig, CacheManager};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleFile {
    #[serde(default)]
    pub query_caches: Vec<QueryCacheEntry>,

    #[serde(default)]
    pub field_caches: Vec<FieldCacheEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCacheEntry {
    /// Operation name, or `"*"`
    pub query_name: String,

    #[serde(flatten)]
    pub options: RuleOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCacheEntry {
    /// Field name, or `"*"`
    pub field_name: String,

    #[serde(flatten)]
    pub options: RuleOptions,
}

/// Settings shared by both rule kinds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,

    /// Lifetime in seconds; absent means no expiry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire: Option<u64>,

    #[serde(default)]
    pub per_user: bool,
}

impl RuleOptions {
    fn to_config(&self) -> CacheConfig {
        let mut builder = CacheConfig::builder().per_user(self.per_user);
        if let Some(zone) = &self.zone {
            builder = builder.zone(zone.clone());
        }
        if let Some(expire) = self.expire {
            builder = builder.ttl(Duration::from_secs(expire));
        }
        builder.build()
    }
}

impl RuleFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rule file {:?}", path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse rule file {:?}", path))
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Register every rule with `manager`; returns how many were registered
    pub async fn apply(&self, manager: &CacheManager) -> Result<usize> {
        for entry in &self.query_caches {
            manager
                .register_query_cache(&entry.query_name, entry.options.to_config())
                .await
                .with_context(|| format!("query cache '{}'", entry.query_name))?;
        }

        for entry in &self.field_caches {
            manager
                .register_field_cache(&entry.field_name, entry.options.to_config())
                .await
                .with_context(|| format!("field cache '{}'", entry.field_name))?;
        }

        Ok(self.query_caches.len() + self.field_caches.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use graphql_cache::{
        ExecutionResult, ManagerSettings, MemoryBackend, Operation, QueryExecutor, RequestContext,
    };
    use std::sync::Arc;

    struct NullExecutor;

    #[async_trait]
    impl QueryExecutor for NullExecutor {
        async fn execute(&self, _op: &Operation, _ctx: &mut RequestContext) -> ExecutionResult {
            ExecutionResult::default()
        }
    }

    fn manager() -> CacheManager {
        CacheManager::new(ManagerSettings::default(), Arc::new(NullExecutor))
            .with_backend(Arc::new(MemoryBackend::new()))
    }

    const RULES: &str = r#"
query_caches:
  - query_name: Posts
    zone: posts
    expire: 300
  - query_name: "*"
field_caches:
  - field_name: menu
    per_user: true
"#;

    #[test]
    fn test_parse() {
        let rules = RuleFile::from_yaml(RULES).unwrap();

        assert_eq!(rules.query_caches.len(), 2);
        assert_eq!(rules.query_caches[0].options.zone.as_deref(), Some("posts"));
        assert_eq!(rules.query_caches[0].options.expire, Some(300));
        assert_eq!(rules.query_caches[1].query_name, "*");
        assert!(rules.field_caches[0].options.per_user);

        let config = rules.query_caches[0].options.to_config();
        assert_eq!(config.zone, "posts");
        assert_eq!(config.ttl, Some(Duration::from_secs(300)));

        let config = rules.query_caches[1].options.to_config();
        assert_eq!(config.zone, graphql_cache::cache::DEFAULT_ZONE);
        assert!(config.ttl.is_none());
    }

    #[test]
    fn test_empty_file() {
        assert_eq!(RuleFile::from_yaml("{}").unwrap(), RuleFile::default());
    }

    #[tokio::test]
    async fn test_apply() {
        let manager = manager();
        manager.init().await;

        let registered = RuleFile::from_yaml(RULES).unwrap().apply(&manager).await.unwrap();

        assert_eq!(registered, 3);
        assert_eq!(manager.registered().await, 3);
    }

    #[tokio::test]
    async fn test_apply_rejects_zero_expire() {
        let manager = manager();
        manager.init().await;

        let rules = RuleFile::from_yaml("query_caches:\n  - query_name: Posts\n    expire: 0\n").unwrap();
        let err = rules.apply(&manager).await.unwrap_err();

        assert!(err.to_string().contains("Posts"));
    }

    #[test]
    fn test_load_reports_path() {
        let err = RuleFile::load(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(err.to_string().contains("here.yaml"));
    }
}
