//! Observability configuration
//!
//! Which namespaces count as framework code depends on the deployment's
//! driver, pool and ORM, so the exclusion list is data rather than code.
//!
//! # Example TOML
//! ```toml
//! datasource_name = "orders-db"
//! db_system = "postgresql"
//!
//! [exclusions]
//! inherit_defaults = true
//! prefixes = ["shop::db::"]
//! markers = ["Proxy"]
//! ```

use crate::call_site::{ExclusionList, ExclusionRule};
use crate::recorder::DEFAULT_DB_SYSTEM;
use crate::stack_unwind::MAX_STACK_DEPTH;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default data source name reported in log records
pub const DEFAULT_DATASOURCE_NAME: &str = "default";

/// Top-level configuration of the interception pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueryObservabilityConfig {
    /// Logical name of the instrumented data source
    pub datasource_name: String,
    /// Value of the `db.system` span tag (e.g. "mysql", "postgresql")
    pub db_system: String,
    /// Frames captured per execution
    pub max_stack_depth: usize,
    /// Call-site exclusion rules
    pub exclusions: ExclusionConfig,
}

impl Default for QueryObservabilityConfig {
    fn default() -> Self {
        Self {
            datasource_name: DEFAULT_DATASOURCE_NAME.to_string(),
            db_system: DEFAULT_DB_SYSTEM.to_string(),
            max_stack_depth: MAX_STACK_DEPTH,
            exclusions: ExclusionConfig::default(),
        }
    }
}

/// Exclusion rules as written in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExclusionConfig {
    /// Start from the built-in Rust-native list
    pub inherit_defaults: bool,
    /// Type-name prefixes to skip
    pub prefixes: Vec<String>,
    /// Substrings that mark a type name as generated or wrapper code
    pub markers: Vec<String>,
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            inherit_defaults: true,
            prefixes: Vec::new(),
            markers: Vec::new(),
        }
    }
}

impl QueryObservabilityConfig {
    /// Load configuration from a TOML file
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read observability config: {}", path.as_ref().display())
        })?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid observability config: {}", path.as_ref().display()))
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).context("Failed to parse TOML observability config")?;
        if config.max_stack_depth == 0 {
            anyhow::bail!("max_stack_depth must be at least 1");
        }
        Ok(config)
    }

    /// Effective exclusion list: defaults (if inherited), then prefixes, then markers
    pub fn exclusion_list(&self) -> ExclusionList {
        let mut list = if self.exclusions.inherit_defaults {
            ExclusionList::rust_defaults()
        } else {
            ExclusionList::new()
        };
        for prefix in &self.exclusions.prefixes {
            list.push(ExclusionRule::Prefix(prefix.clone()));
        }
        for marker in &self.exclusions.markers {
            list.push(ExclusionRule::Marker(marker.clone()));
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = QueryObservabilityConfig::default();
        assert_eq!(config.db_system, "mysql");
        assert_eq!(config.max_stack_depth, MAX_STACK_DEPTH);
        assert_eq!(config.exclusion_list(), ExclusionList::rust_defaults());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = QueryObservabilityConfig::from_toml_str("").unwrap();
        assert_eq!(config, QueryObservabilityConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let config = QueryObservabilityConfig::from_toml_str(
            r#"
            datasource_name = "orders-db"
            db_system = "postgresql"
            max_stack_depth = 32

            [exclusions]
            inherit_defaults = false
            prefixes = ["shop::db::", "shop::db::"]
            markers = ["Proxy"]
            "#,
        )
        .unwrap();

        assert_eq!(config.datasource_name, "orders-db");
        assert_eq!(config.db_system, "postgresql");
        assert_eq!(config.max_stack_depth, 32);

        let list = config.exclusion_list();
        assert_eq!(
            list.rules(),
            &[
                ExclusionRule::Prefix("shop::db::".into()),
                ExclusionRule::Marker("Proxy".into())
            ]
        );
        assert!(!list.is_excluded("std::thread"));
    }

    #[test]
    fn test_inherited_defaults_extended() {
        let config = QueryObservabilityConfig::from_toml_str(
            r#"
            [exclusions]
            markers = ["Proxy"]
            "#,
        )
        .unwrap();
        let list = config.exclusion_list();
        assert_eq!(list.len(), ExclusionList::rust_defaults().len() + 1);
        assert!(list.is_excluded("std::thread"));
        assert!(list.is_excluded("shop::ProxyWrapper"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(QueryObservabilityConfig::from_toml_str("slow_threshold_ms = 5").is_err());
    }

    #[test]
    fn test_zero_depth_rejected() {
        assert!(QueryObservabilityConfig::from_toml_str("max_stack_depth = 0").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = QueryObservabilityConfig::from_toml("/nonexistent/querylens.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read observability config"));
    }
}
