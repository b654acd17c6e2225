//! Single-flight coordination for upstream refreshes.
//!
//! The first caller for a key becomes the leader and runs the fetch; callers
//! that arrive while it is in flight subscribe to a broadcast channel and
//! receive the leader's result. The in-flight entry is removed before the
//! result is sent, so a caller arriving afterwards starts a new flight.

use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use common::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

/// Result as seen by followers; the leader's error is carried as text.
type Shared<T> = std::result::Result<T, String>;

pub struct RequestCoalescer<K, T> {
    in_flight: DashMap<K, broadcast::Sender<Shared<T>>>,
    total_requests: AtomicU64,
    coalesced_requests: AtomicU64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CoalescerStats {
    pub total_requests: u64,
    pub coalesced_requests: u64,
}

enum Registration<T> {
    Leader,
    Follower(broadcast::Receiver<Shared<T>>),
}

/// Removes the in-flight entry if the leader future is dropped mid-flight.
/// Dropping the sender closes the channel, so followers observe an error.
struct FlightGuard<'a, K: Hash + Eq, T> {
    coalescer: &'a RequestCoalescer<K, T>,
    key: Option<K>,
}

impl<K: Hash + Eq, T> Drop for FlightGuard<'_, K, T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.coalescer.in_flight.remove(&key);
        }
    }
}

impl<K, T> RequestCoalescer<K, T>
where
    K: Hash + Eq + Clone + std::fmt::Debug,
    T: Clone,
{
    pub fn new() -> Self {
        Self {
            in_flight: DashMap::new(),
            total_requests: AtomicU64::new(0),
            coalesced_requests: AtomicU64::new(0),
        }
    }

    fn register(&self, key: K) -> Registration<T> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        match self.in_flight.entry(key) {
            Entry::Occupied(entry) => {
                self.coalesced_requests.fetch_add(1, Ordering::Relaxed);
                debug!(key = ?entry.key(), "Joining in-flight refresh");
                Registration::Follower(entry.get().subscribe())
            }
            Entry::Vacant(entry) => {
                let (tx, _rx) = broadcast::channel(1);
                entry.insert(tx);
                Registration::Leader
            }
        }
    }

    fn complete(&self, key: &K, result: &Result<T>) {
        if let Some((_, tx)) = self.in_flight.remove(key) {
            let shared = match result {
                Ok(value) => Ok(value.clone()),
                Err(e) => Err(e.to_string()),
            };
            let waiters = tx.receiver_count();
            let _ = tx.send(shared);
            if waiters > 0 {
                debug!(key = ?key, waiters, "Broadcast refresh result");
            }
        }
    }

    /// Run `work` for `key`, or wait for the flight already running it.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self.register(key.clone()) {
            Registration::Follower(mut rx) => match rx.recv().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(message)) => Err(Error::UpstreamUnavailable(message)),
                Err(_) => Err(Error::UpstreamUnavailable(format!(
                    "in-flight refresh for {:?} was abandoned",
                    key
                ))),
            },
            Registration::Leader => {
                let mut guard = FlightGuard {
                    coalescer: self,
                    key: Some(key),
                };
                let result = work().await;
                if let Some(key) = guard.key.take() {
                    self.complete(&key, &result);
                }
                result
            }
        }
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.in_flight.contains_key(key)
    }

    pub fn stats(&self) -> CoalescerStats {
        CoalescerStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            coalesced_requests: self.coalesced_requests.load(Ordering::Relaxed),
        }
    }
}

impl<K, T> Default for RequestCoalescer<K, T>
where
    K: Hash + Eq + Clone + std::fmt::Debug,
    T: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
