//! Device Configuration
//!
//! Handles parsing and management of devmem.toml configuration files.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Name of the configuration file searched for by [`DeviceConfig::find_and_load`].
pub const CONFIG_FILE_NAME: &str = "devmem.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching devmem.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Host device backend settings
    #[serde(default)]
    pub device: HostDeviceConfig,
}

impl DeviceConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "loaded device config");
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: DeviceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                // Reached root without finding config
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check values that serde cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        let align = self.device.pitch_alignment;
        if align == 0 || !align.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "pitch_alignment must be a non-zero power of two, got {}",
                align
            )));
        }
        Ok(())
    }
}

/// Settings for [`HostDevice`](crate::device::HostDevice).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostDeviceConfig {
    /// Row stride alignment for pitched allocations, in bytes
    #[serde(default = "default_pitch_alignment")]
    pub pitch_alignment: usize,

    /// Upper bound on live allocated bytes (0 = unlimited)
    #[serde(default)]
    pub memory_limit: usize,

    /// Byte written over every new allocation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_byte: Option<u8>,
}

fn default_pitch_alignment() -> usize {
    256
}

impl Default for HostDeviceConfig {
    fn default() -> Self {
        Self {
            pitch_alignment: default_pitch_alignment(),
            memory_limit: 0,
            fill_byte: None,
        }
    }
}
