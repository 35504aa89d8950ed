use crate::error::{BarterError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Serialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct SweeperConfig {
    /// Ticks between sweeps.
    pub interval_ticks: u64,
    pub tick_millis: u64,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ExchangeConfig {
    /// Item types that can never be offered or requested.
    pub blocked_items: Vec<String>,
    /// Per-slot cap used by the reference holdings ledger.
    pub stack_cap: u64,
    pub slot_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub webhook_url: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("barterhouse"),
        }
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_ticks: 1200,
            tick_millis: 50,
        }
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            blocked_items: [
                "minecraft:air",
                "minecraft:bedrock",
                "minecraft:barrier",
                "minecraft:command_block",
                "minecraft:chain_command_block",
                "minecraft:repeating_command_block",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            stack_cap: 64,
            slot_capacity: Some(36),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            timeout_seconds: Some(10),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: Some("pretty".to_string()),
        }
    }
}

impl AppConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| BarterError::Config(format!("Failed to read config file: {}", e)))?;

        let config: AppConfig = toml::from_str(&config_str)
            .map_err(|e| BarterError::Config(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    pub fn load_with_env_overrides<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(data_dir) = std::env::var("BARTERHOUSE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(webhook_url) = std::env::var("BARTERHOUSE_WEBHOOK_URL") {
            self.notifications.webhook_url = Some(webhook_url);
            self.notifications.enabled = true;
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(BarterError::Config("Data directory cannot be empty".to_string()));
        }

        if self.sweeper.interval_ticks == 0 {
            return Err(BarterError::Config("Sweep interval must be at least one tick".to_string()));
        }

        if self.sweeper.tick_millis == 0 {
            return Err(BarterError::Config("Tick duration cannot be 0".to_string()));
        }

        if self.exchange.stack_cap == 0 {
            return Err(BarterError::Config("Stack cap cannot be 0".to_string()));
        }

        if self.notifications.enabled && self.webhook_url().is_none() {
            return Err(BarterError::Config(
                "Notifications are enabled but no webhook URL is set".to_string(),
            ));
        }

        Ok(())
    }

    pub fn holdings_path(&self) -> PathBuf {
        self.storage.data_dir.join(crate::ledger::HOLDINGS_FILE)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.sweeper.tick_millis)
    }

    pub fn webhook_url(&self) -> Option<&str> {
        self.notifications
            .webhook_url
            .as_deref()
            .filter(|url| !url.trim().is_empty())
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.notifications.timeout_seconds.unwrap_or(10))
    }
}

pub fn create_default_config_file<P: AsRef<Path>>(path: P) -> Result<()> {
    let default_config = AppConfig::default();
    let toml_str = toml::to_string_pretty(&default_config)
        .map_err(|e| BarterError::Config(format!("Failed to serialize default config: {}", e)))?;

    std::fs::write(path, toml_str)
        .map_err(|e| BarterError::Config(format!("Failed to write default config file: {}", e)))?;

    Ok(())
}
