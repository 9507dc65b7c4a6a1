//! Configuration file parsing
//!
//! Parses TOML configuration files describing the devices to create.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Process settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Device settings
    #[serde(default)]
    pub devices: DeviceConfig,
}

/// Process settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Log level (trace, debug, info, warn, error, off)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Verbose diagnostics; raises the log level to debug
    #[serde(default)]
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            debug: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// What to do when one device's backing store cannot be allocated
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AllocationPolicy {
    /// Leave that device out and keep the rest
    #[default]
    Skip,
    /// Tear down every device and fail startup
    Abort,
}

/// Device settings
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Number of devices to create
    #[serde(default = "default_count")]
    pub count: u32,

    /// Per-device capacity in MiB
    #[serde(default = "default_size_mb")]
    pub size_mb: u64,

    /// Bytes per sector
    #[serde(default = "default_sector_size")]
    pub sector_size: u32,

    /// Device name prefix
    #[serde(default = "default_name_prefix")]
    pub name_prefix: String,

    /// Allocation failure handling
    #[serde(default)]
    pub on_allocation_failure: AllocationPolicy,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            count: default_count(),
            size_mb: default_size_mb(),
            sector_size: default_sector_size(),
            name_prefix: default_name_prefix(),
            on_allocation_failure: AllocationPolicy::default(),
        }
    }
}

fn default_count() -> u32 {
    4
}

fn default_size_mb() -> u64 {
    4
}

fn default_sector_size() -> u32 {
    512
}

fn default_name_prefix() -> String {
    "xd".to_string()
}

impl DeviceConfig {
    /// Per-device capacity in bytes
    pub fn capacity_bytes(&self) -> Option<u64> {
        self.size_mb.checked_mul(1024 * 1024)
    }

    /// Validate the device settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.count == 0 {
            return Err(ConfigError::Invalid("device count must be positive".to_string()));
        }

        if self.size_mb == 0 {
            return Err(ConfigError::Invalid("device size must be positive".to_string()));
        }

        if self.sector_size < 512 || !self.sector_size.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "sector size {} is not a power of two >= 512",
                self.sector_size
            )));
        }

        let capacity = self.capacity_bytes().ok_or_else(|| {
            ConfigError::Invalid(format!("device size {} MiB overflows", self.size_mb))
        })?;

        if capacity % u64::from(self.sector_size) != 0 {
            return Err(ConfigError::Invalid(format!(
                "capacity {} is not a multiple of sector size {}",
                capacity, self.sector_size
            )));
        }

        if self.name_prefix.is_empty() {
            return Err(ConfigError::Invalid("name prefix must not be empty".to_string()));
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.devices.validate()
    }

    /// Effective log level filter
    pub fn log_level(&self) -> log::LevelFilter {
        if self.server.debug {
            return log::LevelFilter::Debug;
        }
        parse_log_level(&self.server.log_level)
    }
}

/// Parse log level string
pub fn parse_log_level(level: &str) -> log::LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "info" => log::LevelFilter::Info,
        "warn" | "warning" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => {
            eprintln!("Unknown log level '{}', defaulting to 'info'", level);
            log::LevelFilter::Info
        }
    }
}
