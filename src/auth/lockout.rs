//! Failed-attempt tracking and lockout
//!
//! This module counts authentication failures per identifier (an email
//! address, a client IP, ...). After a configurable number of failures the
//! identifier is locked out for a configurable duration. Expired locks are
//! detected lazily on read, and a background sweep reclaims identifiers
//! whose partial failure streak was abandoned.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Upper bound applied to lock ends that would not fit in an `Instant`
pub const MAX_LOCKOUT_DURATION: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Configuration for the attempt tracker
#[derive(Debug, Clone)]
pub struct LockoutConfig {
    /// Number of failures that triggers a lockout
    pub max_attempts: u32,

    /// How long a lockout lasts
    pub lockout_duration: Duration,

    /// How often the background sweep runs
    pub sweep_interval: Duration,

    /// Extra idle time a partial failure streak is kept before the sweep
    /// reclaims it; zero reclaims it on the next sweep
    pub stale_after: Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_duration: Duration::from_secs(900), // 15 minutes
            sweep_interval: Duration::from_secs(300),   // 5 minutes
            stale_after: Duration::ZERO,
        }
    }
}

/// Failure state for a single identifier
#[derive(Debug, Clone)]
struct AttemptEntry {
    /// Failures in the current window
    failure_count: u32,

    /// End of the lockout, if the identifier was ever locked
    locked_until: Option<Instant>,

    /// Time of the most recent failure
    last_failure: Instant,
}

impl AttemptEntry {
    fn new(now: Instant) -> Self {
        Self {
            failure_count: 0, // incremented by record_failure
            locked_until: None,
            last_failure: now,
        }
    }

    fn is_locked(&self, now: Instant) -> bool {
        self.locked_until.is_some_and(|until| now < until)
    }

    fn lock_expired(&self, now: Instant) -> bool {
        self.locked_until.is_some_and(|until| now >= until)
    }
}

/// Lock state of an identifier, for error responses and audit views
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStatus {
    /// Whether the identifier is currently locked
    pub locked: bool,

    /// Failures recorded in the current window
    pub failures: u32,

    /// Failures left before a lockout
    pub remaining_attempts: u32,

    /// Time until the lockout ends, if locked
    pub retry_after: Option<Duration>,
}

type Entries = Arc<RwLock<HashMap<String, AttemptEntry>>>;

/// Thread-safe failed-attempt tracker
///
/// Reads take a shared lock, writes an exclusive one. The optional
/// background sweep is started with [`spawn_sweeper`](Self::spawn_sweeper)
/// and stopped with [`shutdown`](Self::shutdown).
pub struct AttemptTracker {
    config: LockoutConfig,
    entries: Entries,
    cancel_token: CancellationToken,
    /// Taken by `shutdown()` so it can be awaited through `&self`.
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl AttemptTracker {
    /// Create a tracker with the given configuration
    ///
    /// No background task runs until [`spawn_sweeper`](Self::spawn_sweeper)
    /// is called.
    pub fn new(config: LockoutConfig) -> Self {
        Self {
            config,
            entries: Arc::new(RwLock::new(HashMap::new())),
            cancel_token: CancellationToken::new(),
            sweeper: Mutex::new(None),
        }
    }

    /// Create a tracker with default configuration
    pub fn with_defaults() -> Self {
        Self::new(LockoutConfig::default())
    }

    /// The tracker configuration
    pub fn config(&self) -> &LockoutConfig {
        &self.config
    }

    /// Check whether an identifier is currently locked
    ///
    /// A lock whose end has passed reads as unlocked; the entry itself is
    /// left untouched.
    pub fn is_locked(&self, id: &str) -> bool {
        let now = Instant::now();
        self.entries
            .read()
            .get(id)
            .is_some_and(|entry| entry.is_locked(now))
    }

    /// Record a failed attempt for an identifier
    ///
    /// A failure after an expired lockout starts a fresh count. Returns
    /// `true` if the identifier is locked after this failure.
    pub fn record_failure(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.write();

        let entry = entries
            .entry(id.to_string())
            .or_insert_with(|| AttemptEntry::new(now));

        if entry.lock_expired(now) {
            entry.failure_count = 0;
        }

        entry.failure_count = entry.failure_count.saturating_add(1);
        entry.last_failure = now;

        if entry.is_locked(now) {
            return true;
        }

        if entry.failure_count >= self.config.max_attempts {
            let until = now
                .checked_add(self.config.lockout_duration)
                .unwrap_or_else(|| now + MAX_LOCKOUT_DURATION);
            entry.locked_until = Some(until);
            tracing::debug!(
                failures = entry.failure_count,
                lockout_secs = self.config.lockout_duration.as_secs(),
                "Identifier locked out"
            );
            return true;
        }

        false
    }

    /// Forget all failures for an identifier (e.g., after a successful login)
    pub fn reset_attempts(&self, id: &str) {
        self.entries.write().remove(id);
    }

    /// Number of failures left before a lockout
    ///
    /// Returns `max_attempts` for unknown identifiers and expired locks.
    pub fn remaining_attempts(&self, id: &str) -> u32 {
        let now = Instant::now();
        let entries = self.entries.read();

        match entries.get(id) {
            Some(entry) if !entry.lock_expired(now) => self
                .config
                .max_attempts
                .saturating_sub(entry.failure_count),
            _ => self.config.max_attempts,
        }
    }

    /// Lock state of an identifier
    pub fn status(&self, id: &str) -> LockStatus {
        let now = Instant::now();
        let entries = self.entries.read();
        let max = self.config.max_attempts;

        match entries.get(id) {
            Some(entry) if !entry.lock_expired(now) => {
                let retry_after = entry
                    .locked_until
                    .filter(|_| entry.is_locked(now))
                    .map(|until| until.saturating_duration_since(now));
                LockStatus {
                    locked: retry_after.is_some(),
                    failures: entry.failure_count,
                    remaining_attempts: max.saturating_sub(entry.failure_count),
                    retry_after,
                }
            }
            _ => LockStatus {
                locked: false,
                failures: 0,
                remaining_attempts: max,
                retry_after: None,
            },
        }
    }

    /// Number of identifiers currently held in memory
    pub fn tracked_count(&self) -> usize {
        self.entries.read().len()
    }

    /// Reclaim abandoned partial failure streaks
    ///
    /// Removes entries that are not locked, never reached the threshold and
    /// have been idle for at least `stale_after` (zero by default, so any
    /// such entry goes). Entries that reached a full
    /// lockout stay until a later failure or a reset touches them. Returns
    /// the number of removed entries.
    pub fn sweep(&self) -> usize {
        sweep_entries(&self.entries, &self.config, Instant::now())
    }

    /// Start the periodic background sweep
    ///
    /// Calling this while a sweeper is already running has no effect.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    pub fn spawn_sweeper(&self) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() || self.cancel_token.is_cancelled() {
            return;
        }

        let entries = Arc::clone(&self.entries);
        let config = self.config.clone();
        let token = self.cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.sweep_interval);
            // The first tick fires immediately; start with a full interval.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("Lockout sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = sweep_entries(&entries, &config, Instant::now());
                        if removed > 0 {
                            tracing::debug!(removed, "Reclaimed stale attempt entries");
                        }
                    }
                }
            }
        });

        *slot = Some(handle);
    }

    /// Whether the background sweep is running
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the background sweep and wait for it to finish
    ///
    /// Safe to call repeatedly; later calls return immediately.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        // Take the handle so it is awaited without holding the lock.
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "Lockout sweeper task failed");
            }
        }
    }
}

impl Drop for AttemptTracker {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

fn sweep_entries(entries: &Entries, config: &LockoutConfig, now: Instant) -> usize {
    let mut entries = entries.write();
    let before = entries.len();

    entries.retain(|_, entry| {
        let abandoned = !entry.is_locked(now)
            && entry.failure_count < config.max_attempts
            && now.saturating_duration_since(entry.last_failure) >= config.stale_after;
        !abandoned
    });

    before - entries.len()
}
