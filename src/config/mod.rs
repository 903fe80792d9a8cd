//! # Configuration Management Module
//!
//! Loads, validates and writes the `config.toml` that drives the world core.
//!
//! ## Configuration Structure
//!
//! - [`WorldConfig`] - Clock cadence, channel capacities and tick delivery policy
//! - [`StorageConfig`] - Location of the structure store
//! - [`LoggingConfig`] - Log level and optional log file
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mudcore::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     config.validate()?;
//!     println!("Clock period: {:?}", config.world.clock_interval());
//!
//!     Config::create_default("config.toml").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [world]
//! clock_interval_ms = 1000
//! ticks_per_interval = 1000
//! action_queue_capacity = 10
//! broadcast_capacity = 10
//! tick_channel_capacity = 1
//! tick_delivery = "block"   # or "skip"
//!
//! [storage]
//! data_dir = "./data/world"
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Every key has a default, so a partial file (or an empty one) loads.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::world::clock::TickDelivery;
use crate::world::types::Tick;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Wall-clock period of the world clock (ms).
    #[serde(default = "default_clock_interval_ms")]
    pub clock_interval_ms: u64,
    /// Logical ticks added to the clock per period.
    #[serde(default = "default_ticks_per_interval")]
    pub ticks_per_interval: Tick,
    #[serde(default = "default_queue_capacity")]
    pub action_queue_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub broadcast_capacity: usize,
    #[serde(default = "default_tick_channel_capacity")]
    pub tick_channel_capacity: usize,
    #[serde(default)]
    pub tick_delivery: TickDelivery,
}

fn default_clock_interval_ms() -> u64 {
    1000
}

fn default_ticks_per_interval() -> Tick {
    1000
}

fn default_queue_capacity() -> usize {
    10
}

fn default_tick_channel_capacity() -> usize {
    1
}

impl WorldConfig {
    pub fn clock_interval(&self) -> Duration {
        Duration::from_millis(self.clock_interval_ms.max(1))
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            clock_interval_ms: default_clock_interval_ms(),
            ticks_per_interval: default_ticks_per_interval(),
            action_queue_capacity: default_queue_capacity(),
            broadcast_capacity: default_queue_capacity(),
            tick_channel_capacity: default_tick_channel_capacity(),
            tick_delivery: TickDelivery::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "./data/world".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject values the world cannot run with.
    pub fn validate(&self) -> Result<()> {
        let world = &self.world;
        if world.clock_interval_ms == 0 {
            bail!("world.clock_interval_ms must be greater than 0");
        }
        if world.ticks_per_interval <= 0 {
            bail!("world.ticks_per_interval must be greater than 0");
        }
        for (name, value) in [
            ("action_queue_capacity", world.action_queue_capacity),
            ("broadcast_capacity", world.broadcast_capacity),
            ("tick_channel_capacity", world.tick_channel_capacity),
        ] {
            if value == 0 {
                bail!("world.{} must be greater than 0", name);
            }
        }
        if self.storage.data_dir.trim().is_empty() {
            bail!("storage.data_dir must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.world.clock_interval(), Duration::from_secs(1));
        assert_eq!(config.world.ticks_per_interval, 1000);
        assert_eq!(config.world.action_queue_capacity, 10);
        assert_eq!(config.world.broadcast_capacity, 10);
        assert_eq!(config.world.tick_channel_capacity, 1);
        assert_eq!(config.world.tick_delivery, TickDelivery::Block);
        assert_eq!(config.storage.data_dir, "./data/world");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [world]
            tick_delivery = "skip"
            broadcast_capacity = 32
            "#,
        )
        .unwrap();
        assert_eq!(config.world.tick_delivery, TickDelivery::Skip);
        assert_eq!(config.world.broadcast_capacity, 32);
        assert_eq!(config.world.action_queue_capacity, 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = Config::default();
        config.world.tick_channel_capacity = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("tick_channel_capacity"), "got: {}", err);
    }

    #[test]
    fn test_unknown_delivery_mode_fails_to_parse() {
        let parsed: Result<Config, _> = toml::from_str("[world]\ntick_delivery = \"sometimes\"\n");
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn test_default_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let loaded = Config::load(path).await.unwrap();
        assert_eq!(loaded.world.ticks_per_interval, 1000);
        assert!(loaded.validate().is_ok());
    }
}
