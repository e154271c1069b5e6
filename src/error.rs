//! Application error types for keygate
//!
//! This module defines common error types used throughout the crate.
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Authentication-related errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    /// A credential was presented but did not match
    #[error("Invalid credential")]
    Rejected,

    /// The client identifier is locked out after too many failures
    #[error("Locked: too many failed attempts, retry after {retry_after_secs} seconds")]
    Locked { retry_after_secs: u64 },

    /// No credential header on a route that requires one
    #[error("Missing credential")]
    MissingCredential,
}

/// Artifact build errors
///
/// Cloneable so that a single build result can be handed to every caller
/// waiting on the same in-flight build.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    /// The build function returned an error
    #[error("Build failed: {0}")]
    Failed(String),

    /// The build task panicked or was aborted before finishing
    #[error("Build task panicked")]
    Panicked,
}

/// Deep-copy errors for cached artifacts
#[derive(Debug, Error)]
pub enum CopyError {
    /// Serializing or deserializing the cached value failed
    #[error("Copy serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Application-level error type
///
/// Aggregates the domain-specific error types for the binary and the
/// HTTP adapter.
#[derive(Debug, Error)]
pub enum AppError {
    /// Authentication error
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Artifact build error
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] crate::server::ServerError),
}
