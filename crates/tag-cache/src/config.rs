//! Engine configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for a [`TagCache`](crate::TagCache).
///
/// Every field is optional; the default configuration is an unbounded cache
/// whose entries never expire unless a lookup sets its own TTL.
///
/// ```toml
/// default_ttl_secs = 300
/// max_entries = 10000
/// sweep_interval_secs = 60
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when a lookup does not choose one. Zero means none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_ttl_secs: Option<u64>,

    /// Bound on stored entries; the least recently used entry is evicted
    /// to make room. Zero means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,

    /// Period of the background expiry sweep started by
    /// [`TagCache::spawn_configured_sweeper`](crate::TagCache::spawn_configured_sweeper).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_interval_secs: Option<u64>,
}

impl CacheConfig {
    /// Create an unbounded configuration with no default TTL.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from a file (JSON when the path ends in `.json`, TOML otherwise).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cache config: {}", path.display()))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON cache config: {}", path.display()))
        } else {
            Self::from_toml_str(&content)
                .with_context(|| format!("Failed to parse TOML cache config: {}", path.display()))
        }
    }

    /// Parse config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Set the default TTL in seconds.
    pub fn with_default_ttl_secs(mut self, secs: u64) -> Self {
        self.default_ttl_secs = Some(secs);
        self
    }

    /// Bound the number of stored entries.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    /// Set the background sweep period in seconds.
    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = Some(secs);
        self
    }

    /// Default TTL, if any.
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Entry bound, if any.
    pub fn capacity(&self) -> Option<usize> {
        self.max_entries.filter(|max| *max > 0)
    }

    /// Background sweep period, if any.
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unbounded() {
        let config = CacheConfig::default();
        assert_eq!(config.default_ttl(), None);
        assert_eq!(config.capacity(), None);
        assert_eq!(config.sweep_interval(), None);
    }

    #[test]
    fn test_zero_values_disable() {
        let config = CacheConfig::new()
            .with_default_ttl_secs(0)
            .with_max_entries(0)
            .with_sweep_interval_secs(0);

        assert_eq!(config.default_ttl(), None);
        assert_eq!(config.capacity(), None);
        assert_eq!(config.sweep_interval(), None);
    }

    #[test]
    fn test_from_toml() {
        let config = CacheConfig::from_toml_str(
            r#"
            default_ttl_secs = 300
            max_entries = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.default_ttl(), Some(Duration::from_secs(300)));
        assert_eq!(config.capacity(), Some(1000));
        assert_eq!(config.sweep_interval(), None);
    }

    #[test]
    fn test_from_toml_rejects_bad_types() {
        assert!(CacheConfig::from_toml_str("max_entries = \"lots\"").is_err());
    }

    #[test]
    fn test_load_json_and_toml_files() {
        let dir = std::env::temp_dir().join(format!("tag-cache-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        let json_path = dir.join("cache.json");
        std::fs::write(&json_path, r#"{"max_entries": 64, "sweep_interval_secs": 30}"#).unwrap();
        let config = CacheConfig::load(&json_path).unwrap();
        assert_eq!(config.capacity(), Some(64));
        assert_eq!(config.sweep_interval(), Some(Duration::from_secs(30)));

        let toml_path = dir.join("cache.toml");
        std::fs::write(&toml_path, "default_ttl_secs = 10\n").unwrap();
        let config = CacheConfig::load(&toml_path).unwrap();
        assert_eq!(config.default_ttl(), Some(Duration::from_secs(10)));

        let missing = CacheConfig::load(dir.join("missing.toml"));
        assert!(missing.is_err());

        std::fs::remove_dir_all(&dir).ok();
    }
}
