//! Agora configuration file handling
//!
//! Operator settings: which store backend to open, governance defaults
//! applied to new organizations and proposals, storage retry budget, and
//! logging. Configuration files are TOML and live in the platform data
//! directory by default.

use crate::proposal::tally::{QuorumRule, DEFAULT_QUORUM_PERCENT};
use crate::retry::{RetryPolicy, DEFAULT_BASE_BACKOFF, DEFAULT_MAX_BACKOFF, DEFAULT_MAX_RETRIES};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

/// Default treasury currency for new organizations
pub const DEFAULT_CURRENCY: &str = "USD";

/// Default number of ledger entries returned when the caller passes no limit
pub const DEFAULT_TRANSACTION_PAGE_SIZE: usize = 50;

/// Hard cap on ledger entries returned by one listing
pub const MAX_TRANSACTION_PAGE_SIZE: usize = 500;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write config file '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Agora operator configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgoraConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub governance: GovernanceConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Store backend selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local state, lost on exit
    #[default]
    Memory,

    /// SQLite database file
    Sqlite {
        /// e.g. `sqlite:///var/lib/agora/agora.db`
        url: String,

        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

/// Governance defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Share of approved members (1-100) that must vote for quorum
    #[serde(default = "default_quorum_percent")]
    pub quorum_percent: u8,

    /// Currency code for new treasuries
    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// Ledger listing size when no limit is given
    #[serde(default = "default_transaction_page_size")]
    pub transaction_page_size: usize,
}

/// Storage conflict retry budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Human-readable duration, e.g. "10ms"
    #[serde(default = "default_base_backoff")]
    pub base_backoff: String,

    /// Human-readable duration, e.g. "250ms"
    #[serde(default = "default_max_backoff")]
    pub max_backoff: String,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_quorum_percent() -> u8 {
    DEFAULT_QUORUM_PERCENT
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_transaction_page_size() -> usize {
    DEFAULT_TRANSACTION_PAGE_SIZE
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_base_backoff() -> String {
    humantime::format_duration(DEFAULT_BASE_BACKOFF).to_string()
}

fn default_max_backoff() -> String {
    humantime::format_duration(DEFAULT_MAX_BACKOFF).to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            quorum_percent: DEFAULT_QUORUM_PERCENT,
            default_currency: default_currency(),
            transaction_page_size: DEFAULT_TRANSACTION_PAGE_SIZE,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff: default_base_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: None,
        }
    }
}

impl GovernanceConfig {
    pub fn quorum_rule(&self) -> Result<QuorumRule, ConfigError> {
        QuorumRule::new(self.quorum_percent).ok_or_else(|| {
            invalid(
                "governance.quorum_percent",
                format!("{} is outside 1-100", self.quorum_percent),
            )
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.quorum_rule()?;

        let currency = self.default_currency.as_str();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(invalid(
                "governance.default_currency",
                format!("'{}' is not a three-letter currency code", currency),
            ));
        }

        if self.transaction_page_size == 0
            || self.transaction_page_size > MAX_TRANSACTION_PAGE_SIZE
        {
            return Err(invalid(
                "governance.transaction_page_size",
                format!("must be between 1 and {}", MAX_TRANSACTION_PAGE_SIZE),
            ));
        }

        Ok(())
    }
}

impl RetryConfig {
    /// Parse the duration strings into a [`RetryPolicy`].
    pub fn policy(&self) -> Result<RetryPolicy, ConfigError> {
        let parse = |field: &'static str, value: &str| -> Result<Duration, ConfigError> {
            humantime::parse_duration(value)
                .map_err(|e| invalid(field, format!("'{}': {}", value, e)))
        };

        let base_backoff = parse("retry.base_backoff", &self.base_backoff)?;
        let max_backoff = parse("retry.max_backoff", &self.max_backoff)?;
        if max_backoff < base_backoff {
            return Err(invalid(
                "retry.max_backoff",
                "must not be shorter than retry.base_backoff",
            ));
        }

        Ok(RetryPolicy {
            max_retries: self.max_retries,
            base_backoff,
            max_backoff,
        })
    }
}

impl AgoraConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: AgoraConfig = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        write_file(path, &contents)
    }

    /// Check every value that cannot be expressed in the type alone
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let StoreConfig::Sqlite {
            url,
            max_connections,
        } = &self.store
        {
            if !url.starts_with("sqlite:") {
                return Err(invalid("store.url", format!("'{}' is not a sqlite: URL", url)));
            }
            if *max_connections == 0 {
                return Err(invalid("store.max_connections", "must be at least 1"));
            }
        }

        self.governance.validate()?;
        self.retry.policy()?;
        Ok(())
    }

    /// Generate default configuration content as a string with comments
    pub fn generate_default_toml(database_path: &Path) -> String {
        format!(
            r#"# Agora Configuration (Operator Settings)

[store]
# "memory" keeps everything in process and loses it on exit.
# "sqlite" persists to a database file.
backend = "sqlite"
url = "sqlite://{database_path}"
max_connections = {max_connections}

[governance]
# Share of approved members (1-100) that must vote for a proposal to count
quorum_percent = {quorum_percent}

# Currency code for new treasuries (fixed per organization once created)
default_currency = "{currency}"

# Ledger entries returned when no limit is given (at most {max_page})
transaction_page_size = {page_size}

[retry]
# Retries on storage conflicts (busy database, racing transactions)
max_retries = {max_retries}
base_backoff = "{base_backoff}"
max_backoff = "{max_backoff}"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (optional, logs to stderr if not specified)
# file = "/var/log/agora/agora.log"
"#,
            database_path = database_path.display(),
            max_connections = DEFAULT_MAX_CONNECTIONS,
            quorum_percent = DEFAULT_QUORUM_PERCENT,
            currency = DEFAULT_CURRENCY,
            max_page = MAX_TRANSACTION_PAGE_SIZE,
            page_size = DEFAULT_TRANSACTION_PAGE_SIZE,
            max_retries = DEFAULT_MAX_RETRIES,
            base_backoff = default_base_backoff(),
            max_backoff = default_max_backoff(),
        )
    }

    /// Create and save a default configuration file
    pub fn create_default(config_path: &Path, database_path: &Path) -> Result<(), ConfigError> {
        write_file(config_path, &Self::generate_default_toml(database_path))
    }
}

fn write_file(path: &Path, contents: &str) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };

    // Create parent directory if needed
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    fs::write(path, contents).map_err(write_err)
}

/// Get the default data directory
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("agora")
}

/// Get the default config file path
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("agora.toml")
}

/// Get the default database file path
pub fn default_database_path() -> PathBuf {
    default_data_dir().join("agora.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AgoraConfig::default();

        assert_eq!(config.store, StoreConfig::Memory);
        assert_eq!(config.governance.quorum_percent, 50);
        assert_eq!(config.governance.default_currency, "USD");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.retry.policy().unwrap(), RetryPolicy::default());
        config.validate().unwrap();
    }

    #[test]
    fn test_save_and_load_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("agora.toml");

        let mut config = AgoraConfig::default();
        config.store = StoreConfig::Sqlite {
            url: "sqlite:///tmp/agora.db".to_string(),
            max_connections: 3,
        };
        config.governance.quorum_percent = 60;
        config.save(&config_path).unwrap();

        let loaded = AgoraConfig::load(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_create_default_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("agora.toml");
        let database_path = temp_dir.path().join("agora.db");

        AgoraConfig::create_default(&config_path, &database_path).unwrap();

        let config = AgoraConfig::load(&config_path).unwrap();
        match config.store {
            StoreConfig::Sqlite { url, max_connections } => {
                assert!(url.ends_with("agora.db"));
                assert_eq!(max_connections, 5);
            }
            other => panic!("expected sqlite backend, got {:?}", other),
        }
        assert_eq!(config.retry.policy().unwrap(), RetryPolicy::default());
    }

    #[test]
    fn test_load_config_with_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("agora.toml");

        fs::write(&config_path, "[governance]\nquorum_percent = 75\n").unwrap();

        let config = AgoraConfig::load(&config_path).unwrap();
        assert_eq!(config.store, StoreConfig::Memory);
        assert_eq!(config.governance.quorum_percent, 75);
        assert_eq!(config.governance.transaction_page_size, 50);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_quorum_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("agora.toml");
        fs::write(&config_path, "[governance]\nquorum_percent = 0\n").unwrap();

        let err = AgoraConfig::load(&config_path).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "governance.quorum_percent",
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_retry_durations_rejected() {
        let retry = RetryConfig {
            max_retries: 2,
            base_backoff: "soon".to_string(),
            max_backoff: "1s".to_string(),
        };
        assert!(retry.policy().is_err());

        let inverted = RetryConfig {
            max_retries: 2,
            base_backoff: "1s".to_string(),
            max_backoff: "10ms".to_string(),
        };
        assert!(inverted.policy().is_err());
    }

    #[test]
    fn test_currency_must_be_code() {
        let mut config = AgoraConfig::default();
        config.governance.default_currency = "dollars".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("agora.toml");
        fs::write(&config_path, "[store\nbackend = ").unwrap();

        assert!(matches!(
            AgoraConfig::load(&config_path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_default_config_path() {
        assert!(default_config_path().ends_with("agora/agora.toml"));
    }
}
