use anyhow::{anyhow, bail};
use serde::Deserialize;
use std::fs::read_to_string;
use std::path::PathBuf;

/// Memory service settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Use bulk memory transfer commands (`data-read-memory-bytes`). Legacy commands
    /// support only byte sized addressable units.
    pub bulk_transfer: bool,
    /// Size of an addressable unit in octets.
    pub addressable_size: usize,
    /// Cached blocks are never merged into a block longer than this number of units.
    pub max_block_units: u64,
    /// Maximum size of a single read or write request in octets.
    pub max_request_octets: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            bulk_transfer: true,
            addressable_size: 1,
            max_block_units: i32::MAX as u64,
            max_request_octets: 64 * 1024 * 1024,
        }
    }
}

/// Command cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Number of executor turns a command result is delayed for, so that events emitted by
    /// a backend before the result are observed first.
    pub result_delay_turns: usize,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            result_delay_turns: 2,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Emit service logs. When unset all service logs are muted regardless of logger
    /// filters (for example, when a front end owns the terminal).
    pub enabled: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Session configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub memory: MemoryConfig,
    pub commands: CommandConfig,
    pub log: LogConfig,
}

impl ServiceConfig {
    const DEFAULT_PATH: &'static str = ".config/mi-services/config.toml";

    /// Parse configuration from toml, missing keys take default values.
    pub fn from_toml(data: &str) -> anyhow::Result<Self> {
        let config: ServiceConfig = toml::de::from_str(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file.
    ///
    /// # Arguments
    ///
    /// * `path`: path to config file, if `None` - `~/.config/mi-services/config.toml` is used
    pub fn from_file(path: Option<&str>) -> anyhow::Result<Self> {
        let path = match path {
            None => home::home_dir()
                .ok_or_else(|| anyhow!("home directory not found"))?
                .join(Self::DEFAULT_PATH),
            Some(path) => PathBuf::from(path),
        };
        let data = read_to_string(&path)
            .map_err(|e| anyhow!("read config file {}: {e}", path.display()))?;
        Self::from_toml(&data)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.memory.addressable_size < 1 {
            bail!("memory.addressable_size must be at least 1");
        }
        if self.memory.max_block_units < 1 {
            bail!("memory.max_block_units must be at least 1");
        }
        if self.memory.max_request_octets < 1 {
            bail!("memory.max_request_octets must be at least 1");
        }
        Ok(())
    }
}
