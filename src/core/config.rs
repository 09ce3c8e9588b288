//! Runtime configuration for storage, content import and services
//!
//! All sections have sensible defaults and can be loaded from a JSON file.
//! Missing fields fall back to their defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;

/// Pre-sizing and limits for [`ColdStorage`](crate::tiles::ColdStorage).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Tiles reserved up front
    pub initial_tiles: usize,
    /// Child slots reserved up front
    pub initial_children: usize,
    /// Content slots reserved up front
    pub initial_contents: usize,
    /// Hard tile limit; appending beyond it fails
    pub max_tiles: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            initial_tiles: 1024,
            initial_children: 1024,
            initial_contents: 1024,
            max_tiles: u32::MAX as usize,
        }
    }
}

/// Content importer behavior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImporterConfig {
    /// Maximum fetches in flight at once
    pub max_concurrent: usize,
    /// Minimum delay before a failed fetch is retried (milliseconds)
    pub retry_delay_ms: u64,
    /// Unreferenced payloads kept around for quick re-selection (0 = free immediately)
    pub retained_entries: usize,
    /// Worker threads for an importer-owned runtime
    pub worker_threads: usize,
}

impl ImporterConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            retry_delay_ms: 1000,
            retained_entries: 0,
            worker_threads: 2,
        }
    }
}

/// Tick loop and service settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Warm list slots reserved up front
    pub warm_capacity: usize,
    /// WMS GetMap template with `{layers}`, `{styles}` and `{bbox}` placeholders
    pub wms_template: String,
    pub wms_layers: String,
    pub wms_styles: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            warm_capacity: 256,
            wms_template: String::new(),
            wms_layers: String::new(),
            wms_styles: String::new(),
        }
    }
}

/// Top-level configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilekitConfig {
    pub storage: StorageConfig,
    pub importer: ImporterConfig,
    pub service: ServiceConfig,
}

impl TilekitConfig {
    /// Load from a JSON file (sync)
    pub fn load_sync(path: &Path) -> Result<Self, Error> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Save to a JSON file (sync)
    pub fn save_sync(&self, path: &Path) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: TilekitConfig = serde_json::from_str(
            r#"{ "importer": { "max_concurrent": 2 } }"#
        ).unwrap();

        assert_eq!(config.importer.max_concurrent, 2);
        assert_eq!(config.importer.retry_delay_ms, 1000);
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn test_config_persistence() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("nested/tilekit.json");

        let mut config = TilekitConfig::default();
        config.service.wms_layers = "roads".to_string();
        config.save_sync(&path).expect("save failed");

        let loaded = TilekitConfig::load_sync(&path).expect("load failed");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_config_is_error() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(TilekitConfig::load_sync(&path), Err(Error::Config(_))));
    }
}
