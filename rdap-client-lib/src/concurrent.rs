//! Request coalescing.
//!
//! [`SingleFlight`] guarantees at most one execution per key at any time.
//! Callers that arrive while an execution is running attach to it and receive
//! a clone of its output.
//!
//! The ledger only holds weak handles. The operation is driven by whichever
//! waiter polls it, so dropping one waiter leaves the operation running for
//! the others; once every waiter is gone the operation itself is dropped.

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Prune dead ledger entries once the map grows past this size.
const PRUNE_THRESHOLD: usize = 256;

type Flight<V> = Shared<BoxFuture<'static, V>>;

struct Entry<V: Clone> {
    id: u64,
    flight: WeakShared<BoxFuture<'static, V>>,
}

/// Keyed request coalescer.
pub struct SingleFlight<K, V: Clone> {
    inflight: Mutex<HashMap<K, Entry<V>>>,
    next_id: AtomicU64,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Run the operation built by `make` for `key`, or attach to the one that
    /// is already running.
    ///
    /// `make` is only called when no live execution exists. It is called while
    /// the ledger lock is held, so it should only construct the future.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (id, flight) = self.join_or_start(&key, make);
        let output = flight.await;

        let mut map = self.inflight.lock();
        if map.get(&key).is_some_and(|entry| entry.id == id) {
            map.remove(&key);
        }
        output
    }

    fn join_or_start<F, Fut>(&self, key: &K, make: F) -> (u64, Flight<V>)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let mut map = self.inflight.lock();

        if let Some(entry) = map.get(key) {
            if let Some(flight) = entry.flight.upgrade() {
                return (entry.id, flight);
            }
        }

        if map.len() >= PRUNE_THRESHOLD {
            map.retain(|_, entry| entry.flight.upgrade().is_some());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let flight = make().boxed().shared();
        if let Some(weak) = flight.downgrade() {
            map.insert(key.clone(), Entry { id, flight: weak });
        }
        (id, flight)
    }

    /// Number of keys with a live execution.
    pub fn in_flight(&self) -> usize {
        self.inflight
            .lock()
            .values()
            .filter(|entry| entry.flight.upgrade().is_some())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let flights: Arc<SingleFlight<String, Result<u32, String>>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let flights = flights.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flights
                    .run("example.com".to_string(), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(42)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_errors_are_shared_too() {
        let flights: Arc<SingleFlight<u32, Result<u32, String>>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let run = |calls: Arc<AtomicUsize>| {
            let flights = flights.clone();
            async move {
                flights
                    .run(7, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Err::<u32, _>("upstream down".to_string())
                    })
                    .await
            }
        };

        let (a, b) = tokio::join!(run(calls.clone()), run(calls.clone()));
        assert_eq!(a, Err("upstream down".to_string()));
        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_calls_run_again() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            flights
                .run("key", move || async move {
                    calls.fetch_add(1, Ordering::SeqCst) as u32
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dropping_one_waiter_keeps_flight_alive() {
        let flights: Arc<SingleFlight<u8, u32>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let make = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                7
            }
        };

        let first = {
            let flights = flights.clone();
            let make = make(calls.clone());
            tokio::spawn(async move { flights.run(1, make).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        let second = {
            let flights = flights.clone();
            let make = make(calls.clone());
            tokio::spawn(async move { flights.run(1, make).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        first.abort();
        assert_eq!(second.await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropping_all_waiters_drops_flight() {
        struct SetOnDrop(Arc<AtomicUsize>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.store(1, Ordering::SeqCst);
            }
        }

        let flights: Arc<SingleFlight<u8, u32>> = Arc::new(SingleFlight::new());
        let dropped = Arc::new(AtomicUsize::new(0));

        let waiter = {
            let flights = flights.clone();
            let dropped = dropped.clone();
            tokio::spawn(async move {
                flights
                    .run(1, move || async move {
                        let _guard = SetOnDrop(dropped);
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        1
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.abort();
        let _ = waiter.await;

        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }
}
