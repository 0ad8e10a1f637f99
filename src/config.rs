// src/config.rs
//! Configuration management

use crate::{
    error::{GpsError, Result},
    gps::gps2ip::{DEFAULT_DEVICE_PORT, LIVE_REQUEST},
    link::LinkConfig,
    odometer::EntityId,
};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub device_host: String,
    pub device_port: u16,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub line_delimiter: char,
    pub max_line_length: usize,
    pub request_line: String,
    pub entity_id: String,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            device_host: "127.0.0.1".to_string(),
            device_port: DEFAULT_DEVICE_PORT,
            connect_timeout_secs: 5,
            idle_timeout_secs: 5,
            line_delimiter: '\n',
            max_line_length: 4096,
            request_line: LIVE_REQUEST.to_string(),
            entity_id: "device".to_string(),
        }
    }
}

impl TrackerConfig {
    /// Load from a config file, falling back to defaults if it doesn't exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| GpsError::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| GpsError::Config(format!("Failed to parse config file {}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Save to a config file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;

        // Create config directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GpsError::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let contents = serde_json::to_string_pretty(self)?;

        std::fs::write(path, contents)
            .map_err(|e| GpsError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Get config file path
    pub fn get_config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map_err(|_| GpsError::Config("HOME environment variable not set".to_string()))?;

        Ok(PathBuf::from(home).join(".config").join("gps-tracker").join("config.json"))
    }

    /// Check values the link cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.device_host.trim().is_empty() {
            return Err(GpsError::Config("device_host must not be empty".to_string()));
        }
        if self.connect_timeout_secs == 0 || self.idle_timeout_secs == 0 {
            return Err(GpsError::Config("timeouts must be at least one second".to_string()));
        }
        if self.max_line_length == 0 {
            return Err(GpsError::Config("max_line_length must be positive".to_string()));
        }
        if !self.line_delimiter.is_ascii() {
            return Err(GpsError::Config(format!(
                "line_delimiter must be a single ASCII character, got {:?}",
                self.line_delimiter
            )));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn entity(&self) -> EntityId {
        EntityId::from(self.entity_id.as_str())
    }

    /// Settings for the telemetry link
    pub fn link_config(&self) -> Result<LinkConfig> {
        self.validate()?;

        Ok(LinkConfig {
            host: self.device_host.clone(),
            port: self.device_port,
            connect_timeout: self.connect_timeout(),
            idle_timeout: self.idle_timeout(),
            delimiter: self.line_delimiter as u8,
            max_line_length: self.max_line_length,
            request_line: self.request_line.clone(),
        })
    }
}
