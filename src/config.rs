use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;

use crate::buffers::DEFAULT_MAX_CAPACITY;
use crate::engine::DEFAULT_TCP_PORT;
use crate::hal::AcquisitionConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub max_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_capacity: DEFAULT_MAX_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TcpMode {
    #[default]
    Server,
    Client,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    pub mode: TcpMode,
    /// Remote producer address in client mode
    pub host: String,
    pub port: u16,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            mode: TcpMode::Server,
            host: "127.0.0.1".to_string(),
            port: DEFAULT_TCP_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./acqlab-data"),
        }
    }
}

/// Top-level application settings, one section per subsystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub acquisition: AcquisitionConfig,
    pub buffer: BufferConfig,
    pub tcp: TcpConfig,
    pub storage: StorageConfig,
}

/// Loads and persists [`AppConfig`] as a JSON file.
///
/// `load()` must be called after construction; until then the manager holds
/// the defaults.
pub struct ConfigManager {
    config_path: PathBuf,
    state: Arc<RwLock<AppConfig>>,
}

impl ConfigManager {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            state: Arc::new(RwLock::new(AppConfig::default())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Write the default configuration if no file exists yet
    pub async fn ensure_config_file(&self) -> Result<()> {
        if !fs::try_exists(&self.config_path).await.unwrap_or(false) {
            if let Some(parent) = self.config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }

            let json = serde_json::to_string_pretty(&AppConfig::default())?;
            fs::write(&self.config_path, json)
                .await
                .context("Failed to write default config")?;
        }

        Ok(())
    }

    pub async fn load(&self) -> Result<AppConfig> {
        self.ensure_config_file().await?;

        let content = fs::read_to_string(&self.config_path)
            .await
            .context("Failed to read config file")?;

        let config: AppConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;
        config
            .acquisition
            .validate()
            .context("Invalid acquisition settings")?;

        *self.state.write().await = config.clone();
        Ok(config)
    }

    pub async fn save(&self) -> Result<()> {
        let config = self.state.read().await;
        let json = serde_json::to_string_pretty(&*config)?;

        let temp_path = self.config_path.with_extension("tmp");
        fs::write(&temp_path, json)
            .await
            .context("Failed to write temporary config file")?;

        fs::rename(&temp_path, &self.config_path)
            .await
            .context("Failed to atomically update config file")?;

        Ok(())
    }

    pub async fn get(&self) -> AppConfig {
        self.state.read().await.clone()
    }

    /// Replace the acquisition section and persist it
    pub async fn update_acquisition(&self, acquisition: AcquisitionConfig) -> Result<()> {
        acquisition.validate()?;

        let mut config = self.state.write().await;
        config.acquisition = acquisition;
        drop(config); // Release lock before saving

        self.save().await
    }
}
