pub mod central_config;
pub mod peripheral_config;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

pub use central_config::CentralConfig;
pub use peripheral_config::PeripheralConfig;

use crate::utils::ensure_directory_exists;

const CONFIG_DIR_NAME: &str = "ble-gatt-bridge";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub central: CentralConfig,
    pub peripheral: PeripheralConfig,
}

impl AppConfig {
    /// `<config dir>/ble-gatt-bridge/config.json`, falling back to the
    /// working directory when the platform has no config dir.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_DIR_NAME))
            .unwrap_or_default()
            .join(CONFIG_FILE_NAME)
    }

    /// Loads the config from `path`. A missing file yields the defaults.
    pub async fn load_config(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file not found at {:?}, using default.", path);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;
        let config: Self = serde_json::from_str(&config_json)
            .with_context(|| format!("Failed to parse {:?}", path))?;

        info!("Config loaded from {:?}", path);
        Ok(config)
    }

    /// Saves the config to `path`, creating its directory if needed.
    pub async fn save_config(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            ensure_directory_exists(dir).await?;
        }

        let config_json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(path, config_json).await?;
        info!("Config saved to {:?}.", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ble-gatt-bridge-{}-{}", name, std::process::id()))
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let path = scratch_dir("missing").join(CONFIG_FILE_NAME);
        let config = AppConfig::load_config(&path).await.unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = scratch_dir("save");
        let path = dir.join("nested").join(CONFIG_FILE_NAME);
        let mut config = AppConfig::default();
        config.central.auto_connect = false;
        config.peripheral.initial_battery_level = 40;

        config.save_config(&path).await.unwrap();
        let loaded = AppConfig::load_config(&path).await.unwrap();
        assert_eq!(loaded, config);

        let _ = fs::remove_dir_all(dir).await;
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{ "central": { "auto_connect": false } }"#).unwrap();
        assert!(!config.central.auto_connect);
        assert_eq!(config.central.adapter_path, "/org/bluez/hci0");
        assert_eq!(config.peripheral, PeripheralConfig::default());
    }
}
