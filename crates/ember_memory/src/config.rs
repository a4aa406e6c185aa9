//! # Memory Configuration
//!
//! Startup settings for the memory system, loaded once from TOML.
//!
//! ```toml
//! total_size = 67108864
//! interval_node_capacity = 64
//! warn_on_unknown_tag = true
//! ```
//!
//! Missing keys fall back to [`MemoryConfig::default`].

use crate::error::{MemoryError, MemoryResult};
use serde::Deserialize;
use std::path::Path;

/// Configuration for the memory system.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryConfig {
    /// Bytes managed by the engine heap.
    pub total_size: u64,
    /// Initial node table capacity for interval allocators.
    pub interval_node_capacity: usize,
    /// Log a warning when something allocates with [`crate::MemoryTag::Unknown`].
    pub warn_on_unknown_tag: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            total_size: 64 * 1024 * 1024, // 64 MiB
            interval_node_capacity: crate::memory::DEFAULT_NODE_CAPACITY,
            warn_on_unknown_tag: true,
        }
    }
}

impl MemoryConfig {
    /// Creates a config for a heap of `total_size` bytes, other fields default.
    #[must_use]
    pub fn with_total_size(total_size: u64) -> Self {
        Self { total_size, ..Self::default() }
    }

    /// Parses and validates a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] on malformed TOML, unknown keys,
    /// or values that fail [`MemoryConfig::validate`].
    pub fn from_toml_str(text: &str) -> MemoryResult<Self> {
        let config: Self = toml::from_str(text).map_err(|err| MemoryError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] if the file cannot be read or parsed.
    pub fn from_toml_file(path: impl AsRef<Path>) -> MemoryResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| MemoryError::InvalidConfig(format!("{}: {err}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Checks that every size is usable.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> MemoryResult<()> {
        if self.total_size == 0 {
            return Err(MemoryError::InvalidConfig("total_size must be greater than zero".into()));
        }
        if self.interval_node_capacity == 0 {
            return Err(MemoryError::InvalidConfig(
                "interval_node_capacity must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let config = MemoryConfig::from_toml_str(
            "total_size = 4096\ninterval_node_capacity = 16\nwarn_on_unknown_tag = false\n",
        )
        .unwrap();
        assert_eq!(
            config,
            MemoryConfig { total_size: 4096, interval_node_capacity: 16, warn_on_unknown_tag: false }
        );
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let config = MemoryConfig::from_toml_str("total_size = 1024").unwrap();
        assert_eq!(config.total_size, 1024);
        assert_eq!(config.interval_node_capacity, MemoryConfig::default().interval_node_capacity);
        assert!(config.warn_on_unknown_tag);
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(matches!(
            MemoryConfig::from_toml_str("total_size = 0"),
            Err(MemoryError::InvalidConfig(_))
        ));
        assert!(MemoryConfig::from_toml_str("interval_node_capacity = 0").is_err());
        assert!(MemoryConfig::from_toml_str("heap_size = 12").is_err());
        assert!(MemoryConfig::from_toml_str("total_size = \"big\"").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = MemoryConfig::from_toml_file("/nonexistent/ember/memory.toml").unwrap_err();
        assert!(matches!(err, MemoryError::InvalidConfig(msg) if msg.contains("memory.toml")));
    }
}
