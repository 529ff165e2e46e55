//! Configuration for the retrieval core.
//!
//! Components take their config by value at construction; nothing reads
//! configuration ambiently. The TOML helpers exist for hosts that keep a
//! config file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Top-level configuration for the retrieval core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub retriever: RetrieverConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
}

/// Knowledge base loader settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Maximum number of role indexes resident at once
    pub max_cache_size: usize,
    /// Concurrent preload workers
    pub preload_workers: usize,
    /// How long shutdown waits for in-flight preload tasks before aborting
    pub shutdown_drain_secs: u64,
    #[serde(default)]
    pub preload: PreloadConfig,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_cache_size: 5,
            preload_workers: 2,
            shutdown_drain_secs: 5,
            preload: PreloadConfig::default(),
        }
    }
}

/// Preload ranking weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadConfig {
    /// Maximum number of roles to preload
    pub max_preload_count: usize,
    pub priority_weight: f64,
    pub usage_weight: f64,
    pub recency_weight: f64,
    /// Recency credit window; usage older than this scores zero
    pub max_recency_hours: i64,
    /// Roles that are always preloaded regardless of score
    #[serde(default)]
    pub force_preload_roles: HashSet<String>,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            max_preload_count: 3,
            priority_weight: 1.0,
            usage_weight: 2.0,
            recency_weight: 1.5,
            max_recency_hours: 24,
            force_preload_roles: HashSet::new(),
        }
    }
}

/// Top-level retriever settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Maximum roles searched per query
    pub max_roles: usize,
    /// Candidates below this confidence are dropped
    pub min_role_confidence: f64,
    /// Role searched when detection yields no usable candidate
    pub default_role: String,
    /// Budget for a single role's search; a slow role cannot stall the query
    pub search_timeout_ms: u64,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            max_roles: 3,
            min_role_confidence: 0.3,
            default_role: "developer".to_string(),
            search_timeout_ms: 10_000,
        }
    }
}

/// Result fusion constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Exponential down-weighting per rank position within one role's list
    pub position_decay: f64,
    /// Multiplicative boost per extra corroborating role
    pub multi_role_bonus: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            position_decay: 0.9,
            multi_role_bonus: 1.2,
        }
    }
}

impl RetrievalConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;

        let config: RetrievalConfig =
            toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path.as_ref(), toml_string)
            .with_context(|| format!("Failed to write config file {}", path.as_ref().display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RetrievalConfig::default();
        assert_eq!(config.loader.max_cache_size, 5);
        assert_eq!(config.loader.preload_workers, 2);
        assert_eq!(config.loader.preload.max_preload_count, 3);
        assert_eq!(config.retriever.max_roles, 3);
        assert_eq!(config.retriever.min_role_confidence, 0.3);
        assert_eq!(config.retriever.default_role, "developer");
        assert_eq!(config.fusion.position_decay, 0.9);
        assert_eq!(config.fusion.multi_role_bonus, 1.2);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml = r#"
            [retriever]
            max_roles = 5
            min_role_confidence = 0.2
            default_role = "ops"
            search_timeout_ms = 2000

            [loader.preload]
            max_preload_count = 4
            priority_weight = 1.0
            usage_weight = 2.0
            recency_weight = 1.5
            max_recency_hours = 12
            force_preload_roles = ["developer"]
        "#;

        let config: RetrievalConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.retriever.max_roles, 5);
        assert_eq!(config.retriever.default_role, "ops");
        assert_eq!(config.loader.preload.max_recency_hours, 12);
        assert!(config
            .loader
            .preload
            .force_preload_roles
            .contains("developer"));
        // Untouched sections keep their defaults
        assert_eq!(config.fusion.position_decay, 0.9);
    }

    #[test]
    fn test_roundtrip_toml() {
        let config = RetrievalConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: RetrievalConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.loader.max_cache_size, config.loader.max_cache_size);
        assert_eq!(parsed.retriever.max_roles, config.retriever.max_roles);
    }
}
