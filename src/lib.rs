//! keygate - Runtime-mutable security state and cached artifacts
//!
//! This crate provides an API key authenticator whose configuration can be
//! replaced while requests are in flight, a failed-attempt lockout tracker
//! with background reclamation, and a memoized document builder that
//! coalesces concurrent rebuilds. An axum adapter wires them into an HTTP
//! service.

pub mod artifact;
pub mod auth;
pub mod config;
pub mod error;
pub mod server;
pub mod telemetry;
