//! Store Configuration Module
//! Handles loading and validating ota-state.config.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE: &str = "ota-state.config.json";

/// Largest flash image the nvs backend will create or open
pub const MAX_NVS_IMAGE_LEN: usize = 64 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Which blob backend the store runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    File,
    Nvs,
    #[serde(rename = "none")]
    #[value(name = "none")]
    Stub,
}

/// Layout used when writing the update-state record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFormat {
    /// State value followed directly by the artifact type
    Plain,
    /// Plain layout wrapped in a length and checksum envelope
    #[default]
    Checked,
}

/// Resolution of repeated keys when decoding provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    #[default]
    LastWins,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub storage_root: PathBuf,
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    #[serde(default)]
    pub record_format: RecordFormat,
    #[serde(default)]
    pub provides_duplicates: DuplicatePolicy,
    #[serde(default)]
    pub nvs: NvsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NvsConfig {
    #[serde(default = "default_nvs_image")]
    pub image: PathBuf,
    #[serde(default = "default_sector_size")]
    pub sector_size: usize,
    #[serde(default = "default_sector_count")]
    pub sector_count: usize,
}

impl Default for NvsConfig {
    fn default() -> Self {
        Self {
            image: default_nvs_image(),
            sector_size: default_sector_size(),
            sector_count: default_sector_count(),
        }
    }
}

fn default_backend() -> BackendKind {
    BackendKind::File
}

fn default_nvs_image() -> PathBuf {
    PathBuf::from("nvs.img")
}

fn default_sector_size() -> usize {
    4096
}

fn default_sector_count() -> usize {
    4
}

impl StoreConfig {
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path));
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: StoreConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(dir)?;
        let config_path = dir.join(CONFIG_FILE);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn default_for_root(root: &Path) -> Self {
        Self {
            storage_root: root.to_path_buf(),
            backend: default_backend(),
            record_format: RecordFormat::default(),
            provides_duplicates: DuplicatePolicy::default(),
            nvs: NvsConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("storage_root is empty".to_string()));
        }
        if self.backend == BackendKind::Nvs {
            if self.nvs.sector_size == 0 || self.nvs.sector_count < 2 {
                return Err(ConfigError::Invalid(
                    "nvs needs a non-zero sector_size and at least 2 sectors".to_string(),
                ));
            }
            match self.nvs.sector_size.checked_mul(self.nvs.sector_count) {
                Some(len) if len <= MAX_NVS_IMAGE_LEN => {}
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "nvs geometry {} x {} exceeds {} bytes",
                        self.nvs.sector_count, self.nvs.sector_size, MAX_NVS_IMAGE_LEN
                    )));
                }
            }
            if self.nvs.image.components().count() != 1 {
                return Err(ConfigError::Invalid(
                    "nvs.image must be a file name inside storage_root".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let mut config = StoreConfig::default_for_root(dir.path());
        config.backend = BackendKind::Nvs;
        config.provides_duplicates = DuplicatePolicy::Reject;
        config.save(dir.path()).unwrap();

        let loaded = StoreConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.backend, BackendKind::Nvs);
        assert_eq!(loaded.record_format, RecordFormat::Checked);
        assert_eq!(loaded.provides_duplicates, DuplicatePolicy::Reject);
        assert_eq!(loaded.nvs.sector_size, 4096);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{ "storage_root": "/var/lib/ota", "record_format": "plain" }"#,
        )
        .unwrap();

        let config = StoreConfig::load(dir.path()).unwrap();
        assert_eq!(config.storage_root, PathBuf::from("/var/lib/ota"));
        assert_eq!(config.backend, BackendKind::File);
        assert_eq!(config.record_format, RecordFormat::Plain);
        assert_eq!(config.provides_duplicates, DuplicatePolicy::LastWins);
    }

    #[test]
    fn test_load_missing_and_invalid() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            StoreConfig::load(dir.path()),
            Err(ConfigError::NotFound(_))
        ));

        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{ "storage_root": "/data", "backend": "nvs", "nvs": { "sector_count": 1 } }"#,
        )
        .unwrap();
        assert!(matches!(
            StoreConfig::load(dir.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_oversized_nvs_geometry_rejected() {
        let dir = tempdir().unwrap();
        let mut config = StoreConfig::default_for_root(dir.path());
        config.backend = BackendKind::Nvs;

        config.nvs.sector_size = usize::MAX / 2 + 1;
        config.nvs.sector_count = 2;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.nvs.sector_size = 4096;
        config.nvs.sector_count = MAX_NVS_IMAGE_LEN / 4096 + 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.nvs.sector_count = MAX_NVS_IMAGE_LEN / 4096;
        assert!(config.validate().is_ok());
    }
}
