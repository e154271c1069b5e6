//! Configuration management for keygate
//!
//! This module handles loading, parsing, and validating application configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::auth::{
    LockoutConfig as TrackerConfig, ReadStrategy, DEFAULT_HEADER_NAME, MAX_LOCKOUT_DURATION,
};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Failed-attempt lockout configuration
    #[serde(default)]
    pub lockout: LockoutConfig,

    /// API document configuration
    #[serde(default)]
    pub document: DocumentConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(yaml);
        serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))
    }

    /// Load configuration from environment variables with prefix KEYGATE_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        // Server config from env
        if let Ok(host) = std::env::var("KEYGATE_SERVER_HOST") {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var("KEYGATE_SERVER_PORT") {
            config.server.port = parse_env("KEYGATE_SERVER_PORT", &port)?;
        }

        // Auth config from env
        if let Ok(enabled) = std::env::var("KEYGATE_AUTH_ENABLED") {
            config.auth.enabled = enabled.parse().unwrap_or(false);
        }
        if let Ok(header) = std::env::var("KEYGATE_AUTH_HEADER_NAME") {
            config.auth.header_name = header;
        }
        if let Ok(keys) = std::env::var("KEYGATE_AUTH_KEYS") {
            config.auth.keys = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(strategy) = std::env::var("KEYGATE_AUTH_STRATEGY") {
            config.auth.strategy = match strategy.to_ascii_lowercase().as_str() {
                "locked" => ReadStrategy::Locked,
                "snapshot" => ReadStrategy::Snapshot,
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "Unknown auth strategy: {}",
                        other
                    )))
                }
            };
        }

        // Lockout config from env
        if let Ok(max) = std::env::var("KEYGATE_LOCKOUT_MAX_ATTEMPTS") {
            config.lockout.max_attempts = parse_env("KEYGATE_LOCKOUT_MAX_ATTEMPTS", &max)?;
        }
        if let Ok(secs) = std::env::var("KEYGATE_LOCKOUT_DURATION_SECS") {
            config.lockout.lockout_duration_secs =
                parse_env("KEYGATE_LOCKOUT_DURATION_SECS", &secs)?;
        }
        if let Ok(secs) = std::env::var("KEYGATE_LOCKOUT_SWEEP_INTERVAL_SECS") {
            config.lockout.sweep_interval_secs =
                parse_env("KEYGATE_LOCKOUT_SWEEP_INTERVAL_SECS", &secs)?;
        }

        // Document config from env
        if let Ok(ttl) = std::env::var("KEYGATE_DOCUMENT_TTL_SECS") {
            config.document.ttl_secs = parse_env("KEYGATE_DOCUMENT_TTL_SECS", &ttl)?;
        }

        // Logging config from env
        if let Ok(level) = std::env::var("KEYGATE_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("KEYGATE_LOG_FORMAT") {
            config.logging.format = format;
        }

        Ok(config)
    }

    /// Check values that parse but cannot be used
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lockout.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "lockout.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.lockout.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "lockout.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        let max_secs = MAX_LOCKOUT_DURATION.as_secs();
        for (field, value) in [
            ("lockout_duration_secs", self.lockout.lockout_duration_secs),
            ("sweep_interval_secs", self.lockout.sweep_interval_secs),
            ("stale_after_secs", self.lockout.stale_after_secs.unwrap_or(0)),
        ] {
            if value > max_secs {
                return Err(ConfigError::InvalidValue(format!(
                    "lockout.{} must not exceed {} seconds",
                    field, max_secs
                )));
            }
        }
        for resource in &self.document.resources {
            if resource.name.trim().is_empty() {
                return Err(ConfigError::InvalidValue(
                    "document.resources entries need a name".to_string(),
                ));
            }
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Parse(format!("Invalid value for {}: {}", name, value)))
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// Whether credential checks are enforced
    #[serde(default)]
    pub enabled: bool,

    /// Header carrying the API key
    #[serde(default = "default_header_name")]
    pub header_name: String,

    /// Accepted API keys
    #[serde(default)]
    pub keys: Vec<String>,

    /// How readers see configuration changes
    #[serde(default)]
    pub strategy: ReadStrategy,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            header_name: default_header_name(),
            keys: Vec::new(),
            strategy: ReadStrategy::default(),
        }
    }
}

fn default_header_name() -> String {
    DEFAULT_HEADER_NAME.to_string()
}

/// Failed-attempt lockout configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LockoutConfig {
    /// Maximum number of failed attempts before locking
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Duration of a lockout (in seconds)
    #[serde(default = "default_lockout_duration")]
    pub lockout_duration_secs: u64,

    /// Interval between sweeps of stale entries (in seconds)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Extra idle time before the sweep drops a partial failure streak (in seconds)
    ///
    /// Defaults to 0: the next sweep drops it.
    #[serde(default)]
    pub stale_after_secs: Option<u64>,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            lockout_duration_secs: default_lockout_duration(),
            sweep_interval_secs: default_sweep_interval(),
            stale_after_secs: None,
        }
    }
}

impl LockoutConfig {
    /// Tracker settings for these values
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            max_attempts: self.max_attempts,
            lockout_duration: Duration::from_secs(self.lockout_duration_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            stale_after: Duration::from_secs(self.stale_after_secs.unwrap_or(0)),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_lockout_duration() -> u64 {
    900 // 15 minutes
}

fn default_sweep_interval() -> u64 {
    300 // 5 minutes
}

/// API document configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentConfig {
    /// How long a built document is served before rebuilding (0 disables caching)
    #[serde(default = "default_document_ttl")]
    pub ttl_secs: u64,

    /// Document title
    #[serde(default = "default_document_title")]
    pub title: String,

    /// Document version
    #[serde(default = "default_document_version")]
    pub version: String,

    /// Resources described by the document
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_document_ttl(),
            title: default_document_title(),
            version: default_document_version(),
            resources: Vec::new(),
        }
    }
}

fn default_document_ttl() -> u64 {
    60
}

fn default_document_title() -> String {
    "keygate".to_string()
}

fn default_document_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// A resource exposed in the API document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Resource name, used as the path segment
    pub name: String,

    /// HTTP methods supported by the resource
    #[serde(default = "default_operations")]
    pub operations: Vec<String>,
}

fn default_operations() -> Vec<String> {
    vec!["get".to_string()]
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax. Unset variables are left as written.
fn expand_env_vars(input: &str) -> String {
    let re = regex_lite::Regex::new(r"\$\{([^}]+)\}")
        .expect("Invalid regex pattern for environment variable expansion");

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test 1: Parse complete configuration from YAML
    #[test]
    fn test_parse_complete_yaml_config() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9090

auth:
  enabled: true
  header_name: "X-Token"
  keys: ["alpha", "beta"]
  strategy: locked

lockout:
  max_attempts: 3
  lockout_duration_secs: 60
  sweep_interval_secs: 30
  stale_after_secs: 120

document:
  ttl_secs: 5
  title: "Inventory API"
  version: "2.1.0"
  resources:
    - name: items
      operations: [get, post]
    - name: orders

logging:
  level: "debug"
  format: "pretty"
"#;

        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);

        assert!(config.auth.enabled);
        assert_eq!(config.auth.header_name, "X-Token");
        assert_eq!(config.auth.keys, vec!["alpha", "beta"]);
        assert_eq!(config.auth.strategy, ReadStrategy::Locked);

        assert_eq!(config.lockout.max_attempts, 3);
        assert_eq!(config.lockout.lockout_duration_secs, 60);
        assert_eq!(config.lockout.sweep_interval_secs, 30);
        assert_eq!(config.lockout.stale_after_secs, Some(120));

        assert_eq!(config.document.ttl_secs, 5);
        assert_eq!(config.document.title, "Inventory API");
        assert_eq!(config.document.version, "2.1.0");
        assert_eq!(config.document.resources.len(), 2);
        assert_eq!(config.document.resources[0].operations, vec!["get", "post"]);
        assert_eq!(config.document.resources[1].operations, vec!["get"]);

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "pretty");
    }

    // Test 2: Default values applied for missing fields
    #[test]
    fn test_default_values_applied() {
        let yaml = r#"
auth:
  keys: ["only-key"]
"#;

        let config = Config::from_yaml(yaml).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert!(!config.auth.enabled);
        assert_eq!(config.auth.header_name, "X-API-Key");
        assert_eq!(config.auth.strategy, ReadStrategy::Snapshot);
        assert_eq!(config.lockout.max_attempts, 5);
        assert_eq!(config.lockout.lockout_duration_secs, 900);
        assert_eq!(config.lockout.sweep_interval_secs, 300);
        assert_eq!(config.document.ttl_secs, 60);
        assert_eq!(config.document.title, "keygate");
        assert_eq!(config.document.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "json");
    }

    // Test 3: Environment variable expansion in YAML
    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("KEYGATE_TEST_PRIMARY_KEY", "from-env");

        let yaml = r#"
auth:
  enabled: true
  keys: ["${KEYGATE_TEST_PRIMARY_KEY}", "${KEYGATE_TEST_UNSET_KEY}"]
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(
            config.auth.keys,
            vec!["from-env", "${KEYGATE_TEST_UNSET_KEY}"]
        );

        std::env::remove_var("KEYGATE_TEST_PRIMARY_KEY");
    }

    // Test 4: Load configuration from environment variables
    #[test]
    fn test_from_env() {
        std::env::set_var("KEYGATE_SERVER_HOST", "localhost");
        std::env::set_var("KEYGATE_SERVER_PORT", "9999");
        std::env::set_var("KEYGATE_AUTH_ENABLED", "true");
        std::env::set_var("KEYGATE_AUTH_KEYS", "one, two,,three");
        std::env::set_var("KEYGATE_AUTH_STRATEGY", "Locked");
        std::env::set_var("KEYGATE_LOCKOUT_MAX_ATTEMPTS", "7");
        std::env::set_var("KEYGATE_DOCUMENT_TTL_SECS", "0");

        let config = Config::from_env().unwrap();

        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 9999);
        assert!(config.auth.enabled);
        assert_eq!(config.auth.keys, vec!["one", "two", "three"]);
        assert_eq!(config.auth.strategy, ReadStrategy::Locked);
        assert_eq!(config.lockout.max_attempts, 7);
        assert_eq!(config.document.ttl_secs, 0);

        std::env::remove_var("KEYGATE_SERVER_HOST");
        std::env::remove_var("KEYGATE_SERVER_PORT");
        std::env::remove_var("KEYGATE_AUTH_ENABLED");
        std::env::remove_var("KEYGATE_AUTH_KEYS");
        std::env::remove_var("KEYGATE_AUTH_STRATEGY");
        std::env::remove_var("KEYGATE_LOCKOUT_MAX_ATTEMPTS");
        std::env::remove_var("KEYGATE_DOCUMENT_TTL_SECS");
    }

    // Test 5: Parse error on invalid YAML
    #[test]
    fn test_parse_error_invalid_yaml() {
        let yaml = r#"
server:
  port: "not a number"
"#;

        let result = Config::from_yaml(yaml);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    // Test 6: Unknown strategy is rejected
    #[test]
    fn test_unknown_strategy_rejected() {
        let yaml = r#"
auth:
  strategy: optimistic
"#;
        assert!(matches!(Config::from_yaml(yaml), Err(ConfigError::Parse(_))));
    }

    // Test 7: Validation rejects unusable lockout values
    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.lockout.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(_))
        ));

        config.lockout.max_attempts = 3;
        config.lockout.sweep_interval_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    // Test 8: Validation rejects unnamed resources
    #[test]
    fn test_validate_rejects_unnamed_resource() {
        let mut config = Config::default();
        config.document.resources.push(ResourceConfig {
            name: "  ".to_string(),
            operations: vec!["get".to_string()],
        });
        assert!(config.validate().is_err());
    }

    // Test 9: Validation rejects durations an Instant cannot hold
    #[test]
    fn test_validate_rejects_oversized_durations() {
        let yaml = "lockout:\n  max_attempts: 1\n  lockout_duration_secs: 18446744073709551615";
        let config = Config::from_yaml(yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(msg)) if msg.contains("lockout_duration_secs")
        ));

        let mut config = Config::default();
        config.lockout.sweep_interval_secs = u64::MAX;
        assert!(config.validate().is_err());

        config.lockout.sweep_interval_secs = 300;
        config.lockout.lockout_duration_secs = MAX_LOCKOUT_DURATION.as_secs();
        assert!(config.validate().is_ok());
    }

    // Test 10: Tracker configuration conversion
    #[test]
    fn test_tracker_config_conversion() {
        let lockout = LockoutConfig {
            max_attempts: 3,
            lockout_duration_secs: 60,
            sweep_interval_secs: 10,
            stale_after_secs: None,
        };

        let tracker = lockout.tracker_config();
        assert_eq!(tracker.max_attempts, 3);
        assert_eq!(tracker.lockout_duration, Duration::from_secs(60));
        assert_eq!(tracker.sweep_interval, Duration::from_secs(10));
        assert_eq!(tracker.stale_after, Duration::ZERO);

        let lockout = LockoutConfig {
            stale_after_secs: Some(5),
            ..lockout
        };
        assert_eq!(lockout.tracker_config().stale_after, Duration::from_secs(5));
    }

    // Test 11: Config serialization roundtrip
    #[test]
    fn test_config_serialization_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config, parsed);
    }

    // Test 12: Empty YAML yields defaults
    #[test]
    fn test_empty_yaml_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config, Config::default());
    }
}
