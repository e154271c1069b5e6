//! Configuration loading integration tests
//!
//! Tests loading configuration files from disk and building the
//! application state from them.

use std::io::Write;

use keygate::auth::ReadStrategy;
use keygate::config::{Config, ConfigError};
use keygate::server::AppState;

/// Test 1: Load a full configuration file
#[test]
fn test_load_config_file() {
    let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    writeln!(
        file,
        r#"
server:
  host: "127.0.0.1"
  port: 18080
auth:
  enabled: true
  header_name: "X-Service-Key"
  keys: ["k1", "k2"]
  strategy: locked
lockout:
  max_attempts: 4
  lockout_duration_secs: 120
document:
  ttl_secs: 0
  resources:
    - name: widgets
      operations: [get, delete]
"#
    )
    .expect("Failed to write config");

    let config = Config::from_file(file.path()).expect("Failed to load config");
    config.validate().expect("Config should be valid");

    assert_eq!(config.server.port, 18080);
    assert_eq!(config.auth.header_name, "X-Service-Key");
    assert_eq!(config.auth.strategy, ReadStrategy::Locked);
    assert_eq!(config.lockout.max_attempts, 4);
    assert_eq!(config.document.ttl_secs, 0);

    let state = AppState::from_config(&config);
    assert_eq!(state.authenticator.header_name(), "X-Service-Key");
    assert_eq!(state.authenticator.settings().accepted_keys.len(), 2);
    assert_eq!(state.tracker.config().max_attempts, 4);
    assert!(state.documents.ttl().is_zero());
}

/// Test 2: Missing file is a read error
#[test]
fn test_missing_config_file() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let result = Config::from_file(dir.path().join("absent.yaml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

/// Test 3: Invalid values are caught by validation
#[test]
fn test_invalid_config_file() {
    let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    writeln!(file, "lockout:\n  max_attempts: 0").expect("Failed to write config");

    let config = Config::from_file(file.path()).expect("Failed to load config");
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidValue(_))
    ));
}
