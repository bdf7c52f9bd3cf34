//! Configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `BACJOBS_` environment variables (nested keys split on `__`, e.g.
//! `BACJOBS_READ_POINT__READ_METHOD=single-only`).

use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use job_runtime::QueueConfig;
use serde::{Deserialize, Serialize};

use crate::engine::{ReadMethod, SmartReadOptions};
use crate::types::DiscoverMode;

pub const ENV_PREFIX: &str = "BACJOBS_";

// ─────────────────────────────────────────────────────────────────────────────
// Config Error
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Job Configs
// ─────────────────────────────────────────────────────────────────────────────

/// Device discovery tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverDeviceConfig {
    /// Who-Is target network; unset means every network
    pub network: Option<u16>,
    pub low_limit: Option<u32>,
    pub high_limit: Option<u32>,
    /// How long to collect I-Am answers
    pub who_is_timeout_ms: u64,
    /// Device names resolved concurrently per chunk
    pub name_read_chunk_size: usize,
    /// Pause between name chunks
    pub name_read_delay_ms: u64,
}

impl Default for DiscoverDeviceConfig {
    fn default() -> Self {
        Self {
            network: None,
            low_limit: None,
            high_limit: None,
            who_is_timeout_ms: 3000,
            name_read_chunk_size: 100,
            name_read_delay_ms: 100,
        }
    }
}

impl DiscoverDeviceConfig {
    pub fn who_is_timeout(&self) -> Duration {
        Duration::from_millis(self.who_is_timeout_ms)
    }

    pub fn name_read_delay(&self) -> Duration {
        Duration::from_millis(self.name_read_delay_ms)
    }
}

/// Point discovery tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverPointConfig {
    pub mode: DiscoverMode,
    pub read_method: ReadMethod,
    /// Devices per emitted output group
    pub group_export_device_count: usize,
    pub max_concurrent_device_read: usize,
    pub max_concurrent_single_point_read: usize,
    pub single_read_retry_budget: usize,
}

impl Default for DiscoverPointConfig {
    fn default() -> Self {
        Self {
            mode: DiscoverMode::Basic,
            read_method: ReadMethod::MultiFallback,
            group_export_device_count: 10,
            max_concurrent_device_read: 2,
            max_concurrent_single_point_read: 5,
            single_read_retry_budget: 50,
        }
    }
}

impl DiscoverPointConfig {
    pub fn read_options(&self) -> SmartReadOptions {
        SmartReadOptions {
            method: self.read_method,
            max_concurrent_single_reads: self.max_concurrent_single_point_read,
            single_read_retry_budget: self.single_read_retry_budget,
        }
    }
}

/// Point read tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadPointConfig {
    pub read_method: ReadMethod,
    pub max_concurrent_device_read: usize,
    pub max_concurrent_single_point_read: usize,
    pub single_read_retry_budget: usize,
}

impl Default for ReadPointConfig {
    fn default() -> Self {
        Self {
            read_method: ReadMethod::MultiFallback,
            max_concurrent_device_read: 2,
            max_concurrent_single_point_read: 5,
            single_read_retry_budget: 5,
        }
    }
}

impl ReadPointConfig {
    pub fn read_options(&self) -> SmartReadOptions {
        SmartReadOptions {
            method: self.read_method,
            max_concurrent_single_reads: self.max_concurrent_single_point_read,
            single_read_retry_budget: self.single_read_retry_budget,
        }
    }
}

/// Point write tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WritePointConfig {
    pub max_concurrent_device_write: usize,
    pub max_concurrent_point_write: usize,
}

impl Default for WritePointConfig {
    fn default() -> Self {
        Self {
            max_concurrent_device_write: 2,
            max_concurrent_point_write: 1,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BacjobsConfig {
    pub queue: QueueConfig,
    pub discover_device: DiscoverDeviceConfig,
    pub discover_point: DiscoverPointConfig,
    pub read_point: ReadPointConfig,
    pub write_point: WritePointConfig,
}

impl BacjobsConfig {
    /// Provider stack: defaults, optional TOML file, environment
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate the configuration
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Concurrency limits must be at least 1
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("discover_device.name_read_chunk_size", self.discover_device.name_read_chunk_size),
            ("discover_point.group_export_device_count", self.discover_point.group_export_device_count),
            ("discover_point.max_concurrent_device_read", self.discover_point.max_concurrent_device_read),
            ("discover_point.max_concurrent_single_point_read", self.discover_point.max_concurrent_single_point_read),
            ("read_point.max_concurrent_device_read", self.read_point.max_concurrent_device_read),
            ("read_point.max_concurrent_single_point_read", self.read_point.max_concurrent_single_point_read),
            ("write_point.max_concurrent_device_write", self.write_point.max_concurrent_device_write),
            ("write_point.max_concurrent_point_write", self.write_point.max_concurrent_point_write),
        ];
        for (field, value) in limits {
            if value == 0 {
                return Err(ConfigError::Validation {
                    field: field.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = BacjobsConfig::load(None).unwrap();
        assert_eq!(config.discover_device.who_is_timeout_ms, 3000);
        assert_eq!(config.read_point.read_method, ReadMethod::MultiFallback);
        assert_eq!(config.write_point.max_concurrent_point_write, 1);
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[discover_point]
mode = "full"
read_method = "multi-fallback-two-tier"

[read_point]
single_read_retry_budget = 9
"#
        )
        .unwrap();

        let config = BacjobsConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.discover_point.mode, DiscoverMode::Full);
        assert_eq!(config.discover_point.read_method, ReadMethod::MultiFallbackTwoTier);
        assert_eq!(config.discover_point.group_export_device_count, 10);
        assert_eq!(config.read_point.single_read_retry_budget, 9);
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[write_point]\nmax_concurrent_point_write = 0").unwrap();

        let result = BacjobsConfig::load(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::Validation { .. })));
    }

    #[test]
    fn test_renders_toml() {
        let text = BacjobsConfig::default().to_toml().unwrap();
        assert!(text.contains("[discover_point]"));
        assert!(text.contains("who_is_timeout_ms = 3000"));
    }
}
