//! Configuration module for rasbridge
//!
//! TOML-based settings for phonebook location, dial timing, the buffered
//! call loop, capability pinning and logging.

use crate::buffer::{DEFAULT_MAX_ATTEMPTS, MAX_BUFFER_SIZE};
use crate::capability::Capability;
use crate::error::{RasError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Which phonebook a bare entry name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhonebookScope {
    /// Per-user phonebook under the roaming profile
    #[default]
    User,
    /// Machine-wide phonebook shared by all users
    AllUsers,
}

/// Phonebook settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhonebookConfig {
    /// Explicit phonebook file; overrides `scope`
    pub path: Option<PathBuf>,
    /// Default location when no path is given
    #[serde(default)]
    pub scope: PhonebookScope,
}

/// Dial timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialConfig {
    /// Wall-clock budget for one dial in milliseconds (0 = no timeout)
    #[serde(default = "default_dial_timeout")]
    pub timeout_ms: u64,
    /// How long a cancel waits for the native side to confirm
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_ms: u64,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_dial_timeout(),
            cancel_grace_ms: default_cancel_grace(),
        }
    }
}

impl DialConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

/// Buffered call loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// First-attempt buffer size in bytes for list calls
    #[serde(default = "default_initial_size")]
    pub initial_size: u32,
    /// Attempts before giving up on size negotiation
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            initial_size: default_initial_size(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Capability settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Pin a level instead of probing the native library
    pub level: Option<Capability>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub phonebook: PhonebookConfig,
    #[serde(default)]
    pub dial: DialConfig,
    #[serde(default)]
    pub buffer: BufferConfig,
    #[serde(default)]
    pub capability: CapabilityConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| RasError::Config(format!("Failed to read config file: {e}")))?;

        <Self as FromStr>::from_str(&contents)
    }

    /// Convert configuration to TOML string
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| RasError::Config(format!("Failed to serialize config: {e}")))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(path) = &self.phonebook.path {
            if path.as_os_str().is_empty() {
                return Err(RasError::Config("Phonebook path cannot be empty".to_string()));
            }
        }

        if self.buffer.max_attempts == 0 {
            return Err(RasError::Config(
                "Buffer max_attempts must be at least 1".to_string(),
            ));
        }

        if self.buffer.initial_size > MAX_BUFFER_SIZE {
            return Err(RasError::Config(
                "Buffer initial_size must not exceed 16 MiB".to_string(),
            ));
        }

        if self.dial.cancel_grace_ms == 0 {
            return Err(RasError::Config(
                "Dial cancel_grace_ms must be greater than zero".to_string(),
            ));
        }

        match self.logging.level.to_ascii_lowercase().as_str() {
            "off" | "error" | "warn" | "info" | "debug" | "trace" => {}
            other => {
                return Err(RasError::Config(format!("Unknown log level '{other}'")));
            }
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = RasError;

    fn from_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| RasError::Config(format!("Failed to parse TOML: {e}")))
    }
}

// Default value functions for serde
fn default_dial_timeout() -> u64 {
    60_000
}

fn default_cancel_grace() -> u64 {
    5_000
}

fn default_initial_size() -> u32 {
    4096
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_parsing() {
        let toml_content = r#"
[phonebook]
path = "C:\\ProgramData\\Microsoft\\Network\\Connections\\Pbk\\rasphone.pbk"
scope = "all_users"

[dial]
timeout_ms = 2000

[buffer]
max_attempts = 4

[capability]
level = "win7"

[logging]
level = "debug"
"#;

        let config = toml_content
            .parse::<Config>()
            .expect("Failed to parse config");
        assert_eq!(config.phonebook.scope, PhonebookScope::AllUsers);
        assert_eq!(config.dial.timeout(), Some(Duration::from_millis(2000)));
        assert_eq!(config.dial.cancel_grace_ms, 5000);
        assert_eq!(config.buffer.max_attempts, 4);
        assert_eq!(config.buffer.initial_size, 4096);
        assert_eq!(config.capability.level, Some(Capability::Win7));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = "".parse().unwrap();
        assert!(config.phonebook.path.is_none());
        assert_eq!(config.phonebook.scope, PhonebookScope::User);
        assert!(config.capability.level.is_none());
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.buffer.max_attempts = 0;
        assert!(config.validate().is_err());

        config.buffer.max_attempts = 3;
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_disables_budget() {
        let config: Config = "[dial]\ntimeout_ms = 0".parse().unwrap();
        assert_eq!(config.dial.timeout(), None);
    }

    #[test]
    fn test_from_file_and_back() {
        let mut config = Config::default();
        config.phonebook.path = Some(PathBuf::from("office.pbk"));
        config.capability.level = Some(Capability::Vista);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml().unwrap().as_bytes()).unwrap();
        let loaded = Config::from_file(file.path()).unwrap();
        assert_eq!(loaded.phonebook.path, config.phonebook.path);
        assert_eq!(loaded.capability.level, Some(Capability::Vista));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/rasbridge.toml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
