//! Storage strategies for the authenticator settings
//!
//! Two interchangeable strategies publish [`AuthSettings`] to readers:
//!
//! - [`LockedStore`]: a reader-writer lock around the live settings. Every
//!   read copies the settings (including the key set) out under the read lock.
//! - [`SnapshotStore`]: writers build a new immutable snapshot and publish it
//!   with a single atomic pointer store. Readers never block.
//!
//! Both hand out `Arc<AuthSettings>` values that are complete, so a reader
//! never sees a mix of old and new fields.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::authenticator::AuthSettings;

/// Which read strategy the authenticator uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadStrategy {
    /// Reader-writer lock with copy-out on every read
    Locked,
    /// Lock-free published snapshot
    #[default]
    Snapshot,
}

/// Holds the current settings and publishes replacements atomically
pub trait SettingsStore: Send + Sync {
    /// Load the current settings
    fn load(&self) -> Arc<AuthSettings>;

    /// Replace the settings with the result of `f` applied to the current ones
    ///
    /// Writers are serialized; `f` runs exactly once.
    fn update(&self, f: &mut dyn FnMut(&AuthSettings) -> AuthSettings);

    /// The strategy this store implements
    fn strategy(&self) -> ReadStrategy;
}

/// Build a store for the given strategy
pub fn new_store(strategy: ReadStrategy, initial: AuthSettings) -> Box<dyn SettingsStore> {
    match strategy {
        ReadStrategy::Locked => Box::new(LockedStore::new(initial)),
        ReadStrategy::Snapshot => Box::new(SnapshotStore::new(initial)),
    }
}

/// Reader-writer lock around the live settings
pub struct LockedStore {
    settings: RwLock<AuthSettings>,
}

impl LockedStore {
    pub fn new(initial: AuthSettings) -> Self {
        Self {
            settings: RwLock::new(initial),
        }
    }
}

impl SettingsStore for LockedStore {
    fn load(&self) -> Arc<AuthSettings> {
        let settings = self.settings.read();
        Arc::new(settings.clone())
    }

    fn update(&self, f: &mut dyn FnMut(&AuthSettings) -> AuthSettings) {
        let mut settings = self.settings.write();
        let next = f(&settings);
        *settings = next;
    }

    fn strategy(&self) -> ReadStrategy {
        ReadStrategy::Locked
    }
}

/// Atomically published immutable snapshot
pub struct SnapshotStore {
    current: ArcSwap<AuthSettings>,
    // Serializes writers so read-modify-write updates are not lost.
    writer: Mutex<()>,
}

impl SnapshotStore {
    pub fn new(initial: AuthSettings) -> Self {
        Self {
            current: ArcSwap::from_pointee(initial),
            writer: Mutex::new(()),
        }
    }
}

impl SettingsStore for SnapshotStore {
    fn load(&self) -> Arc<AuthSettings> {
        self.current.load_full()
    }

    fn update(&self, f: &mut dyn FnMut(&AuthSettings) -> AuthSettings) {
        let _writer = self.writer.lock();
        let next = f(&self.current.load());
        self.current.store(Arc::new(next));
    }

    fn strategy(&self) -> ReadStrategy {
        ReadStrategy::Snapshot
    }
}
