//! Configuration management for Quarry

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Length sentinel marking a standalone ("huge") byte block slot.
pub const HUGE_LENGTH_SENTINEL: u16 = u16::MAX;

/// Main configuration structure for Quarry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Column storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML or JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = if path.as_ref().extension().map_or(false, |ext| ext == "toml") {
            Self::from_toml_str(&content)?
        } else {
            serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the storage layer cannot honor
    pub fn validate(&self) -> Result<()> {
        self.storage.byte_block.validate()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Byte block placement settings
    #[serde(default)]
    pub byte_block: ByteBlockConfig,
    /// Sorted column settings
    #[serde(default)]
    pub sorted: SortedConfig,
    /// Word index settings
    #[serde(default)]
    pub index: IndexConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ByteBlockConfig {
    /// Values at or above this length get a standalone batch
    pub huge_value_threshold: usize,
    /// Waste share of a batch (percent) at which compaction is attempted
    pub compaction_waste_percent: usize,
    /// Capacity of a freshly opened shared batch
    pub initial_batch_size: usize,
    /// Shared batches grow by doubling up to this capacity
    pub max_batch_size: usize,
}

impl Default for ByteBlockConfig {
    fn default() -> Self {
        Self {
            huge_value_threshold: 4096,
            compaction_waste_percent: 20,
            initial_batch_size: 4096,
            max_batch_size: 64 * 1024, // 64KB
        }
    }
}

impl ByteBlockConfig {
    pub fn validate(&self) -> Result<()> {
        if self.huge_value_threshold == 0
            || self.huge_value_threshold >= HUGE_LENGTH_SENTINEL as usize
        {
            return Err(Error::Config(format!(
                "huge_value_threshold must be in 1..{}, got {}",
                HUGE_LENGTH_SENTINEL, self.huge_value_threshold
            )));
        }
        if !(1..=100).contains(&self.compaction_waste_percent) {
            return Err(Error::Config(format!(
                "compaction_waste_percent must be in 1..=100, got {}",
                self.compaction_waste_percent
            )));
        }
        if self.initial_batch_size == 0 || self.initial_batch_size > self.max_batch_size {
            return Err(Error::Config(format!(
                "initial_batch_size ({}) must be non-zero and at most max_batch_size ({})",
                self.initial_batch_size, self.max_batch_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SortedConfig {
    /// Run a quick consistency check after every fast-add commit
    pub verify_on_commit: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Tokens longer than this are not indexed
    pub max_word_length: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { max_word_length: 64 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by RUST_LOG
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "quarry=info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.byte_block.huge_value_threshold, 4096);
        assert_eq!(config.storage.byte_block.compaction_waste_percent, 20);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [storage.byte_block]
            huge_value_threshold = 1024

            [logging]
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.byte_block.huge_value_threshold, 1024);
        assert_eq!(config.storage.byte_block.max_batch_size, 64 * 1024);
        assert_eq!(config.storage.index.max_word_length, 64);
        assert!(config.logging.json);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let err = Config::from_toml_str(
            r#"
            [storage.byte_block]
            huge_value_threshold = 70000
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_load_from_files() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("quarry.toml");
        let mut f = std::fs::File::create(&toml_path).unwrap();
        writeln!(f, "[storage.sorted]\nverify_on_commit = true").unwrap();
        let config = Config::load(&toml_path).unwrap();
        assert!(config.storage.sorted.verify_on_commit);

        let json_path = dir.path().join("quarry.json");
        std::fs::write(&json_path, r#"{"storage":{"index":{"max_word_length":12}}}"#).unwrap();
        let config = Config::load(&json_path).unwrap();
        assert_eq!(config.storage.index.max_word_length, 12);

        assert!(Config::load(dir.path().join("missing.toml")).is_err());
    }
}
