//! The query surface: one cheaply clonable handle over the region index, the
//! hazard index and both caches.

use std::sync::Arc;

use common::{
    CacheStats, Error, ForecastDay, Location, Result, ServiceConfig, SourceAdapter, Transliterator,
    WeatherSnapshot,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::calendar::{lunar_string, server_time, SystemClock, WallClock};
use crate::forecast::{ForecastCache, RetryPolicy};
use crate::hazard::HazardIndex;
use crate::region::{CityListing, RegionIndex};
use crate::snapshot::SnapshotCache;

struct ServiceInner {
    config: ServiceConfig,
    regions: Arc<RegionIndex>,
    translit: Arc<dyn Transliterator>,
    adapter: Arc<dyn SourceAdapter>,
    hazards: Arc<HazardIndex>,
    snapshots: SnapshotCache,
    forecasts: ForecastCache,
    clock: Arc<dyn WallClock>,
}

#[derive(Clone)]
pub struct WeatherService {
    inner: Arc<ServiceInner>,
}

impl WeatherService {
    pub fn new(
        config: ServiceConfig,
        regions: Arc<RegionIndex>,
        adapter: Arc<dyn SourceAdapter>,
        translit: Arc<dyn Transliterator>,
        hazards: Arc<HazardIndex>,
    ) -> Self {
        Self::with_clock(config, regions, adapter, translit, hazards, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: ServiceConfig,
        regions: Arc<RegionIndex>,
        adapter: Arc<dyn SourceAdapter>,
        translit: Arc<dyn Transliterator>,
        hazards: Arc<HazardIndex>,
        clock: Arc<dyn WallClock>,
    ) -> Self {
        let timing = &config.timing;
        let snapshots = SnapshotCache::new(
            config.cache.capacity,
            timing.full_ttl(),
            timing.lightweight_ttl(),
            adapter.clone(),
            hazards.clone(),
        );
        let forecasts = ForecastCache::new(
            config.cache.forecast_capacity,
            timing.full_ttl(),
            RetryPolicy {
                attempts: config.network.retry_attempts,
                base_delay: config.network.retry_base_delay(),
            },
            adapter.clone(),
            clock.clone(),
        );

        Self {
            inner: Arc::new(ServiceInner {
                config,
                regions,
                translit,
                adapter,
                hazards,
                snapshots,
                forecasts,
                clock,
            }),
        }
    }

    pub fn resolve(&self, path: &str) -> Result<Location> {
        self.inner.regions.resolve(self.inner.translit.as_ref(), path)
    }

    pub fn list(&self, path: &str) -> Result<CityListing> {
        self.inner.regions.list(self.inner.translit.as_ref(), path)
    }

    pub async fn weather(&self, path: &str) -> Result<WeatherSnapshot> {
        let location = self.resolve(path)?;
        self.snapshot_for(&location).await
    }

    pub async fn weather_by_code(&self, code: &str) -> Result<WeatherSnapshot> {
        let location = self
            .inner
            .regions
            .find_by_code(code)
            .cloned()
            .ok_or_else(|| Error::NotFound(code.to_string()))?;
        self.snapshot_for(&location).await
    }

    /// Cached snapshot with the per-read time fields stamped fresh.
    async fn snapshot_for(&self, location: &Location) -> Result<WeatherSnapshot> {
        let mut snapshot = self.inner.snapshots.get(location).await?;
        let now = self.inner.clock.now();
        snapshot.server_time = server_time(now);
        snapshot.lunar = lunar_string(now);
        debug!("Served {} at {}", location.code, snapshot.server_time);
        Ok(snapshot)
    }

    pub async fn forecast(&self, path: &str) -> Result<Vec<ForecastDay>> {
        let location = self.resolve(path)?;
        self.inner.forecasts.get(&location).await
    }

    pub async fn stats(&self) -> CacheStats {
        let refresh_rate = self.inner.config.timing.refresh_interval_minutes as i64;
        self.inner.snapshots.stats(refresh_rate).await
    }

    pub fn hazards(&self) -> &Arc<HazardIndex> {
        &self.inner.hazards
    }

    /// Start the hazard poll loop on the full-refresh period.
    pub fn spawn_hazard_poller(&self, cancel: CancellationToken) -> JoinHandle<Result<()>> {
        let period = self.inner.config.timing.full_ttl();
        tokio::spawn(
            self.inner
                .hazards
                .clone()
                .run_poller(self.inner.adapter.clone(), period, cancel),
        )
    }

    /// Stop background forecast refreshes and wait for them.
    pub async fn shutdown(&self) {
        self.inner.forecasts.shutdown().await;
    }
}
