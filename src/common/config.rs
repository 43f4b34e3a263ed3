//! Configuration file handling

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Output forwarding settings
    #[serde(default)]
    pub output: OutputConfig,

    /// Logging defaults
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Timeout settings
#[derive(Debug, Clone, Deserialize)]
pub struct Timeouts {
    /// How long launch/attach waits for `configurationDone` (0 waits forever)
    #[serde(default = "default_configuration_done")]
    pub configuration_done_secs: u64,

    /// Attach connection timeout used when the request does not carry one
    #[serde(default = "default_attach")]
    pub attach_default_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            configuration_done_secs: default_configuration_done(),
            attach_default_ms: default_attach(),
        }
    }
}

impl Timeouts {
    /// Bound for the configuration-done barrier, `None` when unbounded
    pub fn configuration_done(&self) -> Option<Duration> {
        match self.configuration_done_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

fn default_configuration_done() -> u64 {
    60
}
fn default_attach() -> u64 {
    10_000
}

/// Output forwarding configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Lines longer than this are truncated before being pushed to the client
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

fn default_max_line_bytes() -> usize {
    64 * 1024
}

/// Logging defaults
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Level applied when a session does not request one
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }
}
