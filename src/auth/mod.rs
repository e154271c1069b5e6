//! Authentication state for keygate
//!
//! This module provides the runtime-mutable security state:
//! - API key authentication with hot-swappable configuration
//! - Settings storage with a locked or a lock-free snapshot strategy
//! - Failed-attempt tracking with temporary lockout

pub mod authenticator;
pub mod lockout;
pub mod store;

pub use authenticator::{
    AuthMethod, AuthOutcome, AuthSettings, Authenticated, Authenticator, DynamicValidator,
    DEFAULT_HEADER_NAME,
};
pub use lockout::{AttemptTracker, LockStatus, LockoutConfig, MAX_LOCKOUT_DURATION};
pub use store::{new_store, LockedStore, ReadStrategy, SettingsStore, SnapshotStore};
