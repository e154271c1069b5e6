//! Keyed coalescing of concurrent work
//!
//! [`SingleFlight`] keeps a table of in-flight work. The first caller for a
//! key spawns the work as a task; callers arriving while it runs attach to
//! that task and receive a clone of its output. The task removes its own
//! entry when it ends, whether or not anyone is still waiting, so the next
//! caller starts fresh work.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

type Flight<V> = Shared<BoxFuture<'static, Option<V>>>;

type Table<K, V> = Arc<Mutex<HashMap<K, Flight<V>>>>;

/// Removes a key from the table when the owning task ends
struct EntryGuard<K: Eq + Hash, V> {
    table: Table<K, V>,
    key: Option<K>,
}

impl<K: Eq + Hash, V> Drop for EntryGuard<K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.table.lock().remove(&key);
        }
    }
}

/// Table of in-flight work keyed by `K`
pub struct SingleFlight<K, V> {
    in_flight: Table<K, V>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run the work produced by `make` for `key`, or join the run in flight
    ///
    /// `make` is only called when no work for `key` is in flight. The work
    /// runs on its own task and completes even if every caller stops
    /// waiting. Returns `None` if that task panicked or was cancelled.
    ///
    /// # Panics
    ///
    /// Must be called within a Tokio runtime context.
    pub async fn work<F>(&self, key: K, make: F) -> Option<V>
    where
        F: FnOnce() -> BoxFuture<'static, V>,
    {
        let flight = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let guard = EntryGuard {
                        table: Arc::clone(&self.in_flight),
                        key: Some(key.clone()),
                    };
                    let work = make();
                    // The task cannot remove its entry before the insert
                    // below, because that needs the lock held here.
                    let handle = tokio::spawn(async move {
                        let _guard = guard;
                        work.await
                    });
                    let flight = handle.map(|joined| joined.ok()).boxed().shared();
                    in_flight.insert(key, flight.clone());
                    flight
                }
            }
        };

        flight.await
    }

    /// Number of keys with work in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_single_caller_runs_work() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();
        let value = flights.work("key", || async { 7 }.boxed()).await;
        assert_eq!(value, Some(7));
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let flights: Arc<SingleFlight<&'static str, u32>> = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let flights = Arc::clone(&flights);
            let runs = Arc::clone(&runs);
            handles.push(tokio::spawn(async move {
                flights
                    .work("key", move || {
                        async move {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            runs.fetch_add(1, Ordering::SeqCst) + 1
                        }
                        .boxed()
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Some(1));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_run_independently() {
        let flights: SingleFlight<u32, u32> = SingleFlight::new();
        let (a, b) = tokio::join!(
            flights.work(1, || async { 10 }.boxed()),
            flights.work(2, || async { 20 }.boxed()),
        );
        assert_eq!((a, b), (Some(10), Some(20)));
    }

    #[tokio::test]
    async fn test_sequential_calls_start_fresh_work() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();
        let runs = Arc::new(AtomicU32::new(0));

        for expected in 1..=3 {
            let runs = Arc::clone(&runs);
            let value = flights
                .work("key", move || {
                    async move { runs.fetch_add(1, Ordering::SeqCst) + 1 }.boxed()
                })
                .await;
            assert_eq!(value, Some(expected));
        }
    }

    #[tokio::test]
    async fn test_abandoned_work_finishes_and_clears_its_entry() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();
        let finished = Arc::new(AtomicU32::new(0));
        let done = Arc::clone(&finished);

        let first = flights.work("key", move || {
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                done.fetch_add(1, Ordering::SeqCst);
                1
            }
            .boxed()
        });
        // Start the work, then drop the only waiter.
        let _ = tokio::time::timeout(Duration::from_millis(1), first).await;
        assert_eq!(flights.in_flight(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);

        let value = flights.work("key", || async { 2 }.boxed()).await;
        assert_eq!(value, Some(2));
    }

    #[tokio::test]
    async fn test_panicking_work_clears_its_entry() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();

        let value = flights
            .work("key", || {
                async {
                    let crashed: Option<u32> = None;
                    crashed.expect("work crashed")
                }
                .boxed()
            })
            .await;
        assert_eq!(value, None);
        assert_eq!(flights.in_flight(), 0);

        let value = flights.work("key", || async { 3 }.boxed()).await;
        assert_eq!(value, Some(3));
    }
}
