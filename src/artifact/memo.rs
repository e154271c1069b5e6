//! Memoized artifact builder
//!
//! [`MemoizedBuilder`] caches the output of an expensive [`ArtifactBuilder`]
//! for a TTL. Concurrent callers that miss the cache share one build through
//! [`SingleFlight`], keyed by the invalidation generation so a build started
//! before [`MemoizedBuilder::invalidate`] is never joined after it.
//!
//! Every value handed out is a deep copy of the cached one. When copying
//! fails the caller gets the shared value instead (`Artifact::Shared`).

use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::FutureExt;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::flight::SingleFlight;
use crate::error::{BuildError, CopyError};

const BUILD_KEY: &str = "artifact";

/// Produces the artifact being cached
#[async_trait]
pub trait ArtifactBuilder<T>: Send + Sync {
    async fn build(&self) -> Result<T, BuildError>;
}

#[async_trait]
impl<T, F, Fut> ArtifactBuilder<T> for F
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, BuildError>> + Send + 'static,
{
    async fn build(&self) -> Result<T, BuildError> {
        (self)().await
    }
}

/// How cached values are copied before being handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    /// Structural `Clone`
    Clone,
    /// Serialize to JSON and back
    JsonRoundTrip,
}

/// A value returned by [`MemoizedBuilder::get_or_build`]
#[derive(Debug)]
pub enum Artifact<T> {
    /// Independent copy owned by the caller
    Owned(T),
    /// The cached value itself, handed out read-only after a failed copy
    Shared(Arc<T>),
}

impl<T> Artifact<T> {
    pub fn is_shared(&self) -> bool {
        matches!(self, Artifact::Shared(_))
    }
}

impl<T: Clone> Artifact<T> {
    /// Take ownership, cloning if the value is shared
    pub fn into_owned(self) -> T {
        match self {
            Artifact::Owned(value) => value,
            Artifact::Shared(shared) => Arc::unwrap_or_clone(shared),
        }
    }

    /// Mutable access, cloning a shared value first
    pub fn to_mut(&mut self) -> &mut T {
        if let Artifact::Shared(shared) = self {
            *self = Artifact::Owned(T::clone(shared));
        }
        match self {
            Artifact::Owned(value) => value,
            Artifact::Shared(_) => unreachable!("shared artifact replaced above"),
        }
    }
}

impl<T> Deref for Artifact<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            Artifact::Owned(value) => value,
            Artifact::Shared(shared) => shared,
        }
    }
}

/// Statistics about cache usage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Calls served from a fresh cached value
    pub hits: u64,
    /// Calls that found no fresh value
    pub misses: u64,
    /// Underlying builds started
    pub builds: u64,
    /// Builds that returned an error or panicked
    pub build_failures: u64,
    /// Reads that fell back to the shared value after a failed copy
    pub copy_fallbacks: u64,
}

impl CacheStats {
    /// Calculates the hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    builds: AtomicU64,
    build_failures: AtomicU64,
    copy_fallbacks: AtomicU64,
}

struct Cached<T> {
    value: Arc<T>,
    built_at: Instant,
    built_at_utc: DateTime<Utc>,
}

struct CacheState<T> {
    cached: Option<Cached<T>>,
    generation: u64,
}

impl<T> CacheState<T> {
    fn fresh(&self, ttl: Duration) -> Option<Arc<T>> {
        if ttl.is_zero() {
            return None;
        }
        self.cached
            .as_ref()
            .filter(|cached| cached.built_at.elapsed() < ttl)
            .map(|cached| Arc::clone(&cached.value))
    }
}

type Copier<T> = fn(&T) -> Result<T, CopyError>;

fn clone_copy<T: Clone>(value: &T) -> Result<T, CopyError> {
    Ok(value.clone())
}

fn json_copy<T: Serialize + DeserializeOwned>(value: &T) -> Result<T, CopyError> {
    let encoded = serde_json::to_value(value)?;
    Ok(serde_json::from_value(encoded)?)
}

/// TTL cache around an [`ArtifactBuilder`] with build coalescing
pub struct MemoizedBuilder<T> {
    builder: Arc<dyn ArtifactBuilder<T>>,
    ttl: Duration,
    copy_mode: CopyMode,
    copier: Copier<T>,
    state: Arc<RwLock<CacheState<T>>>,
    flights: SingleFlight<(&'static str, u64), Result<Arc<T>, BuildError>>,
    counters: Arc<Counters>,
}

impl<T> MemoizedBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Cache copies handed out with `Clone`
    pub fn new(builder: impl ArtifactBuilder<T> + 'static, ttl: Duration) -> Self {
        Self::with_copier(Arc::new(builder), ttl, CopyMode::Clone, clone_copy::<T>)
    }
}

impl<T> MemoizedBuilder<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Cache copies handed out through a JSON round trip
    pub fn with_json_copies(builder: impl ArtifactBuilder<T> + 'static, ttl: Duration) -> Self {
        Self::with_copier(
            Arc::new(builder),
            ttl,
            CopyMode::JsonRoundTrip,
            json_copy::<T>,
        )
    }
}

impl<T> MemoizedBuilder<T>
where
    T: Send + Sync + 'static,
{
    fn with_copier(
        builder: Arc<dyn ArtifactBuilder<T>>,
        ttl: Duration,
        copy_mode: CopyMode,
        copier: Copier<T>,
    ) -> Self {
        Self {
            builder,
            ttl,
            copy_mode,
            copier,
            state: Arc::new(RwLock::new(CacheState {
                cached: None,
                generation: 0,
            })),
            flights: SingleFlight::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn copy_mode(&self) -> CopyMode {
        self.copy_mode
    }

    /// Return a copy of the cached artifact, building it if it is missing or stale
    ///
    /// Concurrent callers that miss share a single build and its result.
    /// The build runs to completion and fills the cache even if every caller
    /// gives up waiting. Errors are not cached; the next call builds again.
    pub async fn get_or_build(&self) -> Result<Artifact<T>, BuildError> {
        let (fresh, generation) = {
            let state = self.state.read();
            (state.fresh(self.ttl), state.generation)
        };
        if let Some(value) = fresh {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(self.copy_out(value));
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let builder = Arc::clone(&self.builder);
        let state = Arc::clone(&self.state);
        let counters = Arc::clone(&self.counters);
        let ttl = self.ttl;

        let value = self
            .flights
            .work((BUILD_KEY, generation), move || {
                async move {
                    let cached = state.read().fresh(ttl);
                    if let Some(value) = cached {
                        return Ok(value);
                    }

                    counters.builds.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(generation, "Building artifact");

                    let result = tokio::spawn(async move { builder.build().await })
                        .await
                        .unwrap_or_else(|e| {
                            tracing::warn!(error = %e, "Artifact build task failed");
                            Err(BuildError::Panicked)
                        });

                    match result {
                        Ok(artifact) => {
                            let value = Arc::new(artifact);
                            let mut state = state.write();
                            if state.generation == generation && !ttl.is_zero() {
                                state.cached = Some(Cached {
                                    value: Arc::clone(&value),
                                    built_at: Instant::now(),
                                    built_at_utc: Utc::now(),
                                });
                            }
                            tracing::debug!(generation, "Artifact built");
                            Ok(value)
                        }
                        Err(e) => {
                            counters.build_failures.fetch_add(1, Ordering::Relaxed);
                            tracing::debug!(generation, error = %e, "Artifact build failed");
                            Err(e)
                        }
                    }
                }
                .boxed()
            })
            .await
            .unwrap_or_else(|| {
                tracing::warn!(generation, "Artifact build flight did not finish");
                Err(BuildError::Panicked)
            })?;

        Ok(self.copy_out(value))
    }

    /// Drop the cached value and start a new generation
    pub fn invalidate(&self) {
        let mut state = self.state.write();
        state.cached = None;
        state.generation += 1;
        tracing::debug!(generation = state.generation, "Artifact cache invalidated");
    }

    /// Whether a cached value exists and is within its TTL
    pub fn is_fresh(&self) -> bool {
        self.state.read().fresh(self.ttl).is_some()
    }

    /// Wall-clock time the cached value was built, if any
    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.state
            .read()
            .cached
            .as_ref()
            .map(|cached| cached.built_at_utc)
    }

    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            builds: self.counters.builds.load(Ordering::Relaxed),
            build_failures: self.counters.build_failures.load(Ordering::Relaxed),
            copy_fallbacks: self.counters.copy_fallbacks.load(Ordering::Relaxed),
        }
    }

    fn copy_out(&self, value: Arc<T>) -> Artifact<T> {
        match (self.copier)(&value) {
            Ok(copy) => Artifact::Owned(copy),
            Err(e) => {
                self.counters.copy_fallbacks.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "Artifact copy failed, returning shared value");
                Artifact::Shared(value)
            }
        }
    }
}
