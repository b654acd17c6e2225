//! Weather snapshot cache and its refresh orchestration.
//!
//! Each cached snapshot carries two ages. The full age covers the scraped
//! outlook and life indices; the lightweight age covers current conditions
//! only. A read picks the cheapest refresh that brings the entry back inside
//! both windows.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{CacheStats, Location, Result, SourceAdapter, WeatherSnapshot};
use lrucache::LruCache;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::coalesce::{CoalescerStats, RequestCoalescer};
use crate::hazard::HazardIndex;

struct CachedSnapshot {
    snapshot: WeatherSnapshot,
    full_at: Instant,
    light_at: Instant,
}

/// Counters shared with the eviction callback.
#[derive(Debug, Default)]
struct Counters {
    bytes: AtomicI64,
    gets: AtomicI64,
    hits: AtomicI64,
    evictions: AtomicI64,
}

/// Approximate footprint of one entry.
fn entry_cost(key: &str) -> i64 {
    (key.len() + std::mem::size_of::<CachedSnapshot>()) as i64
}

pub struct SnapshotCache {
    entries: Mutex<LruCache<String, CachedSnapshot>>,
    counters: Arc<Counters>,
    in_flight: RequestCoalescer<String, WeatherSnapshot>,
    adapter: Arc<dyn SourceAdapter>,
    hazards: Arc<HazardIndex>,
    full_ttl: Duration,
    light_ttl: Duration,
}

impl SnapshotCache {
    pub fn new(
        capacity: usize,
        full_ttl: Duration,
        light_ttl: Duration,
        adapter: Arc<dyn SourceAdapter>,
        hazards: Arc<HazardIndex>,
    ) -> Self {
        let counters = Arc::new(Counters::default());
        let sink = counters.clone();
        let entries = LruCache::new(capacity).with_on_evicted(move |code: String, _| {
            sink.bytes.fetch_sub(entry_cost(&code), Ordering::Relaxed);
            sink.evictions.fetch_add(1, Ordering::Relaxed);
            debug!("Evicted snapshot {}", code);
        });

        Self {
            entries: Mutex::new(entries),
            counters,
            in_flight: RequestCoalescer::new(),
            adapter,
            hazards,
            full_ttl,
            light_ttl,
        }
    }

    /// Snapshot for `location`, refreshed as far as its ages require.
    ///
    /// A failed full refresh falls back to the cached snapshot when one
    /// exists; a failed lightweight refresh always does.
    pub async fn get(&self, location: &Location) -> Result<WeatherSnapshot> {
        self.counters.gets.fetch_add(1, Ordering::Relaxed);
        let cached = {
            let mut entries = self.entries.lock().await;
            entries.get(&location.code).map(|entry| {
                (
                    entry.snapshot.clone(),
                    entry.full_at.elapsed(),
                    entry.light_at.elapsed(),
                )
            })
        };

        let Some((snapshot, full_age, light_age)) = cached else {
            debug!("Snapshot miss for {}", location.code);
            return self.full_refresh(location).await;
        };
        self.counters.hits.fetch_add(1, Ordering::Relaxed);

        if full_age >= self.full_ttl {
            match self.full_refresh(location).await {
                Ok(fresh) => Ok(fresh),
                Err(e) if e.is_upstream() => {
                    warn!("Full refresh for {} failed, serving stale: {}", location.code, e);
                    Ok(snapshot)
                }
                Err(e) => Err(e),
            }
        } else if light_age >= self.light_ttl {
            Ok(self.light_refresh(&location.code, snapshot).await)
        } else {
            Ok(snapshot)
        }
    }

    async fn full_refresh(&self, location: &Location) -> Result<WeatherSnapshot> {
        self.in_flight
            .run(location.code.clone(), || async {
                let record = self.adapter.fetch_weather(location).await?;
                let current = self.adapter.fetch_current(&location.code).await?;
                let mut snapshot = WeatherSnapshot::assemble(location, record, current);
                self.attach_alerts(&mut snapshot).await;

                let now = Instant::now();
                let entry = CachedSnapshot {
                    snapshot: snapshot.clone(),
                    full_at: now,
                    light_at: now,
                };
                let mut entries = self.entries.lock().await;
                if entries.add(location.code.clone(), entry).is_none() {
                    self.counters
                        .bytes
                        .fetch_add(entry_cost(&location.code), Ordering::Relaxed);
                }
                info!("Snapshot for {} ({}) refreshed", location.full_path, location.code);
                Ok(snapshot)
            })
            .await
    }

    /// Refresh current conditions only. Failure leaves the entry untouched.
    async fn light_refresh(&self, code: &str, mut snapshot: WeatherSnapshot) -> WeatherSnapshot {
        let current = match self.adapter.fetch_current(code).await {
            Ok(current) => current,
            Err(e) => {
                warn!("Current conditions for {} failed, serving cached: {}", code, e);
                return snapshot;
            }
        };

        let mut entries = self.entries.lock().await;
        match entries.get_mut(code) {
            Some(entry) => {
                entry.snapshot.current = current;
                entry.light_at = Instant::now();
                entry.snapshot.clone()
            }
            None => {
                snapshot.current = current;
                snapshot
            }
        }
    }

    async fn attach_alerts(&self, snapshot: &mut WeatherSnapshot) {
        let Some(records) = self.hazards.lookup(&snapshot.code).await else {
            return;
        };
        snapshot.alarm = true;
        for record in records {
            match self.adapter.fetch_hazard_details(&record.file_name).await {
                Ok(details) => snapshot.alerts.push(details),
                Err(e) => warn!("Alert detail {} failed: {}", record.file_name, e),
            }
        }
    }

    pub async fn stats(&self, refresh_rate: i64) -> CacheStats {
        let items = self.entries.lock().await.len() as i64;
        CacheStats {
            bytes: self.counters.bytes.load(Ordering::Relaxed),
            items,
            gets: self.counters.gets.load(Ordering::Relaxed),
            hits: self.counters.hits.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            refresh_rate,
        }
    }

    pub fn coalescer_stats(&self) -> CoalescerStats {
        self.in_flight.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{hazard_feed, location, FakeAdapter};
    use common::Error;

    const FULL: Duration = Duration::from_secs(3600);
    const LIGHT: Duration = Duration::from_secs(180);

    fn cache(adapter: Arc<FakeAdapter>, capacity: usize) -> SnapshotCache {
        SnapshotCache::new(capacity, FULL, LIGHT, adapter, Arc::new(HazardIndex::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_failure_surfaces() {
        let adapter = Arc::new(FakeAdapter::new());
        adapter.set_fail_weather(true);
        let snapshots = cache(adapter, 4);

        let err = snapshots.get(&location("101010200")).await.unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)));
        assert_eq!(snapshots.stats(60).await.items, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entry_served_without_upstream() {
        let adapter = Arc::new(FakeAdapter::new());
        let snapshots = cache(adapter.clone(), 4);
        let loc = location("101010200");

        let first = snapshots.get(&loc).await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;
        let second = snapshots.get(&loc).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.name, "海淀");
        assert_eq!(adapter.weather_calls(), 1);
        assert_eq!(adapter.current_calls(), 1);
        let stats = snapshots.stats(60).await;
        assert_eq!((stats.gets, stats.hits, stats.items), (2, 1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lightweight_refresh_updates_current_only() {
        let adapter = Arc::new(FakeAdapter::new());
        let snapshots = cache(adapter.clone(), 4);
        let loc = location("101010200");
        snapshots.get(&loc).await.unwrap();

        adapter.set_temperature("18");
        adapter.set_update_time("08:00");
        tokio::time::advance(LIGHT).await;
        let refreshed = snapshots.get(&loc).await.unwrap();
        assert_eq!(refreshed.current.temperature, "18");
        assert_eq!(refreshed.update_time, "07:30");
        assert_eq!(adapter.weather_calls(), 1);
        assert_eq!(adapter.current_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_lightweight_refresh_keeps_entry_stale() {
        let adapter = Arc::new(FakeAdapter::new());
        let snapshots = cache(adapter.clone(), 4);
        let loc = location("101010200");
        snapshots.get(&loc).await.unwrap();

        adapter.set_fail_current(true);
        tokio::time::advance(LIGHT).await;
        let served = snapshots.get(&loc).await.unwrap();
        assert_eq!(served.current.temperature, "15");

        // The timestamp did not advance, so the next read retries.
        adapter.set_fail_current(false);
        adapter.set_temperature("20");
        let served = snapshots.get(&loc).await.unwrap();
        assert_eq!(served.current.temperature, "20");
        assert_eq!(adapter.current_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_stale_failure_serves_previous() {
        let adapter = Arc::new(FakeAdapter::new());
        let snapshots = cache(adapter.clone(), 4);
        let loc = location("101010200");
        let before = snapshots.get(&loc).await.unwrap();

        adapter.set_fail_weather(true);
        tokio::time::advance(FULL).await;
        let served = snapshots.get(&loc).await.unwrap();
        assert_eq!(served, before);
        assert_eq!(adapter.weather_calls(), 2);

        adapter.set_fail_weather(false);
        adapter.set_update_time("08:00");
        let served = snapshots.get(&loc).await.unwrap();
        assert_eq!(served.update_time, "08:00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_fetch() {
        let adapter = Arc::new(FakeAdapter::new());
        adapter.set_weather_delay(Duration::from_millis(200));
        let snapshots = Arc::new(cache(adapter.clone(), 4));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let snapshots = snapshots.clone();
            handles.push(tokio::spawn(async move {
                snapshots.get(&location("101010200")).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().update_time, "07:30");
        }

        assert_eq!(adapter.weather_calls(), 1);
        assert_eq!(snapshots.coalescer_stats().coalesced_requests, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_refresh_attaches_alerts() {
        let adapter = Arc::new(FakeAdapter::new());
        let hazards = Arc::new(HazardIndex::new());
        adapter.set_hazard_payload(Some(hazard_feed(&[("北京市", "10101-20261018-0501.html")])));
        hazards.refresh(adapter.as_ref()).await.unwrap();
        let snapshots = SnapshotCache::new(4, FULL, LIGHT, adapter.clone(), hazards);

        let warned = snapshots.get(&location("101010100")).await.unwrap();
        assert!(warned.alarm);
        assert_eq!(warned.alerts.len(), 1);
        assert_eq!(warned.alerts[0].title, "预警 10101-20261018-0501.html");

        let calm = snapshots.get(&location("101020100")).await.unwrap();
        assert!(!calm.alarm);
        assert!(calm.alerts.is_empty());
        assert_eq!(adapter.detail_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_updates_counters() {
        let adapter = Arc::new(FakeAdapter::new());
        let snapshots = cache(adapter, 2);

        for code in ["101010100", "101010200", "101010800"] {
            snapshots.get(&location(code)).await.unwrap();
        }

        let stats = snapshots.stats(60).await;
        assert_eq!(stats.items, 2);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.bytes, 2 * entry_cost("101010200"));
        assert_eq!(stats.refresh_rate, 60);
    }
}
