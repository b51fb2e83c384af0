//! Configuration management for mosaicbooth

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Web server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8090,
        }
    }
}

/// The active event project and the grid used when it is first created.
/// Once the project exists on disk, its stored setup wins; these values are
/// only seeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub id: String,
    pub rows: u32,
    pub cols: u32,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            id: "event".to_string(),
            rows: 5,
            cols: 8,
        }
    }
}

/// Rendering and compositing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MosaicConfig {
    /// Side length in pixels of stored tile images.
    pub tile_size: u32,
    /// Rendered display surface dimensions.
    pub display_width: u32,
    pub display_height: u32,
    /// Poll interval of the live display loop.
    pub sync_interval_ms: u64,
    /// Discrete opacity steps of the tile fade-in.
    pub fade_steps: u32,
    /// Pause between fade frames.
    pub fade_interval_ms: u64,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            tile_size: 300,
            display_width: 1280,
            display_height: 720,
            sync_interval_ms: 5000,
            fade_steps: 10,
            fade_interval_ms: 60,
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for per-project tile storage.
    pub data_dir: PathBuf,
    /// Image seeded as the project reference when the project is created
    /// and no reference has been uploaded yet.
    pub seed_reference: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            seed_reference: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub project: ProjectConfig,

    #[serde(default)]
    pub mosaic: MosaicConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.project.rows, 5);
        assert_eq!(config.project.cols, 8);
        assert_eq!(config.mosaic.tile_size, 300);
        assert_eq!(config.mosaic.fade_steps, 10);
        assert_eq!(config.server.port, 8090);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [project]
            id = "gala"
            rows = 10
            cols = 12
            "#,
        )
        .unwrap();
        assert_eq!(config.project.id, "gala");
        assert_eq!(config.project.rows, 10);
        // Unspecified sections fall back to defaults.
        assert_eq!(config.mosaic.sync_interval_ms, 5000);
        assert_eq!(config.storage.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn test_roundtrip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.project.id, config.project.id);
        assert_eq!(back.mosaic.display_width, config.mosaic.display_width);
    }
}
