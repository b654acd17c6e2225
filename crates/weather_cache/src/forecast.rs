//! Multi-week outlook cache with stale-while-revalidate.
//!
//! An entry covers the current and the next calendar month. A stale entry is
//! served as-is while a background task replaces it; an absent or empty
//! entry is fetched synchronously.

use std::sync::Arc;
use std::time::Duration;

use chrono::Datelike;
use common::{Error, ForecastDay, Location, Result, SourceAdapter};
use dashmap::DashSet;
use lrucache::LruCache;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::calendar::{china_time, WallClock};
use crate::coalesce::RequestCoalescer;

type Days = Arc<Vec<ForecastDay>>;

#[derive(Clone)]
struct ForecastEntry {
    days: Days,
    generated_at: Instant,
}

/// Retry policy for one month page.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// A failed attempt `n` is followed by a wait of `n * base_delay`, except
    /// the last one: with three attempts the waits are 1x and 2x, and a page
    /// that fails all three gives up without a trailing 3x sleep.
    pub base_delay: Duration,
}

struct ForecastInner {
    entries: Mutex<LruCache<String, ForecastEntry>>,
    in_flight: RequestCoalescer<String, Days>,
    /// Codes with a background refresh spawned and not yet finished.
    refreshing: DashSet<String>,
    adapter: Arc<dyn SourceAdapter>,
    clock: Arc<dyn WallClock>,
    retry: RetryPolicy,
}

pub struct ForecastCache {
    inner: Arc<ForecastInner>,
    ttl: Duration,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl ForecastCache {
    pub fn new(
        capacity: usize,
        ttl: Duration,
        retry: RetryPolicy,
        adapter: Arc<dyn SourceAdapter>,
        clock: Arc<dyn WallClock>,
    ) -> Self {
        Self {
            inner: Arc::new(ForecastInner {
                entries: Mutex::new(LruCache::new(capacity)),
                in_flight: RequestCoalescer::new(),
                refreshing: DashSet::new(),
                adapter,
                clock,
                retry,
            }),
            ttl,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub async fn get(&self, location: &Location) -> Result<Vec<ForecastDay>> {
        let cached = self.inner.entries.lock().await.get(&location.code).cloned();

        match cached {
            Some(entry) if !entry.days.is_empty() => {
                if entry.generated_at.elapsed() >= self.ttl {
                    self.spawn_refresh(location.code.clone());
                }
                Ok(entry.days.to_vec())
            }
            _ => {
                debug!("Forecast miss for {}", location.full_path);
                let days = self.inner.refresh(&location.code).await?;
                Ok(days.to_vec())
            }
        }
    }

    fn spawn_refresh(&self, code: String) {
        if self.cancel.is_cancelled() || self.inner.in_flight.is_in_flight(&code) {
            return;
        }
        if !self.inner.refreshing.insert(code.clone()) {
            return;
        }
        let inner = self.inner.clone();
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Background forecast refresh for {} cancelled", code)
                }
                result = inner.refresh(&code) => match result {
                    Ok(days) => {
                        debug!("Background forecast refresh for {}: {} days", code, days.len())
                    }
                    Err(e) => warn!("Background forecast refresh for {} failed: {}", code, e),
                },
            }
            inner.refreshing.remove(&code);
        });
    }

    pub async fn len(&self) -> usize {
        self.inner.entries.lock().await.len()
    }

    /// Number of background refreshes still running.
    pub fn pending_refreshes(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel background refreshes and wait for them to finish.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("Forecast cache shut down");
    }
}

impl ForecastInner {
    async fn refresh(&self, code: &str) -> Result<Days> {
        self.in_flight
            .run(code.to_string(), || async {
                let today = china_time(self.clock.now()).date_naive();
                let (year, month) = (today.year(), today.month());
                let (next_year, next_month) = if month == 12 {
                    (year + 1, 1)
                } else {
                    (year, month + 1)
                };

                let mut days = self.fetch_month(code, year, month).await;
                days.extend(self.fetch_month(code, next_year, next_month).await);
                let days = normalize(days);
                if days.is_empty() {
                    return Err(Error::EmptyResult(format!("no forecast records for {}", code)));
                }

                let days = Arc::new(days);
                let entry = ForecastEntry {
                    days: days.clone(),
                    generated_at: Instant::now(),
                };
                self.entries.lock().await.add(code.to_string(), entry);
                info!("Forecast for {} refreshed: {} days", code, days.len());
                Ok(days)
            })
            .await
    }

    /// One month page with retries; a page that never loads contributes nothing.
    async fn fetch_month(&self, code: &str, year: i32, month: u32) -> Vec<ForecastDay> {
        let attempts = self.retry.attempts.max(1);
        for attempt in 1..=attempts {
            match self.adapter.fetch_forecast_month(code, year, month).await {
                Ok(days) => return days,
                Err(e @ Error::DecodeFailure(_)) => {
                    warn!("Forecast page {} {:04}-{:02} undecodable: {}", code, year, month, e);
                    return Vec::new();
                }
                Err(e) => {
                    warn!(
                        "Forecast page {} {:04}-{:02} attempt {}/{} failed: {}",
                        code, year, month, attempt, attempts, e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.base_delay * attempt).await;
                    }
                }
            }
        }
        Vec::new()
    }
}

/// Drop blank records, spell out `<` in wind text, and fill missing sky text
/// from the weather code.
fn normalize(days: Vec<ForecastDay>) -> Vec<ForecastDay> {
    days.into_iter()
        .filter(|d| {
            !(d.weather_code_one.is_empty()
                && d.weather_code_two.is_empty()
                && d.weather.is_empty())
        })
        .map(|mut d| {
            d.wind = d.wind.replace('<', "小于");
            if d.weather.is_empty() && !d.weather_code_one.is_empty() {
                d.weather = sky_for_code(&d.weather_code_one).to_string();
            }
            d
        })
        .collect()
}

/// Sky text for a weather.com.cn weather code ("01", "d07", ...).
pub fn sky_for_code(code: &str) -> &'static str {
    let digits: String = code.chars().filter(char::is_ascii_digit).collect();
    match digits.parse::<u32>() {
        Ok(0) => "晴",
        Ok(1) => "多云",
        Ok(2) => "阴",
        Ok(3) => "阵雨",
        Ok(4) => "雷阵雨",
        Ok(5) => "雷阵雨伴有冰雹",
        Ok(6) => "雨夹雪",
        Ok(7) => "小雨",
        Ok(8) => "中雨",
        Ok(9) => "大雨",
        Ok(10) => "暴雨",
        Ok(11) => "大暴雨",
        Ok(12) => "特大暴雨",
        Ok(13) => "阵雪",
        Ok(14) => "小雪",
        Ok(15) => "中雪",
        Ok(16) => "大雪",
        Ok(17) => "暴雪",
        Ok(18) => "雾",
        Ok(19) => "冻雨",
        Ok(20) => "沙尘暴",
        Ok(21) => "小到中雨",
        Ok(22) => "中到大雨",
        Ok(23) => "大到暴雨",
        Ok(24) => "暴雨到大暴雨",
        Ok(25) => "大暴雨到特大暴雨",
        Ok(26) => "小到中雪",
        Ok(27) => "中到大雪",
        Ok(28) => "大到暴雪",
        Ok(29) => "浮尘",
        Ok(30) => "扬沙",
        Ok(31) => "强沙尘暴",
        Ok(53) => "霾",
        _ => "未知",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{location, FakeAdapter, StepClock};

    const TTL: Duration = Duration::from_secs(3600);

    fn cache(adapter: Arc<FakeAdapter>) -> ForecastCache {
        ForecastCache::new(
            10,
            TTL,
            RetryPolicy {
                attempts: 3,
                base_delay: Duration::from_secs(1),
            },
            adapter,
            Arc::new(StepClock::new()),
        )
    }

    #[test]
    fn test_normalize_filters_and_fills() {
        let days = normalize(vec![
            ForecastDay {
                weather_code_one: "07".into(),
                wind: "<3级".into(),
                ..Default::default()
            },
            ForecastDay::default(),
            ForecastDay {
                weather: "晴".into(),
                ..Default::default()
            },
        ]);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].weather, "小雨");
        assert_eq!(days[0].wind, "小于3级");
        assert_eq!(days[1].weather, "晴");
    }

    #[test]
    fn test_sky_for_code() {
        assert_eq!(sky_for_code("00"), "晴");
        assert_eq!(sky_for_code("d53"), "霾");
        assert_eq!(sky_for_code(""), "未知");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_increasing_delay() {
        let adapter = Arc::new(FakeAdapter::new());
        adapter.fail_next_forecasts(2);
        let forecasts = cache(adapter.clone());

        let days = forecasts.get(&location("101010100")).await.expect("third attempt succeeds");
        assert!(!days.is_empty());

        let attempts = adapter.forecast_attempts();
        // Three attempts for the first month, one for the next.
        assert_eq!(attempts.len(), 4);
        let first_gap = attempts[1] - attempts[0];
        let second_gap = attempts[2] - attempts[1];
        assert_eq!(first_gap, Duration::from_secs(1));
        assert_eq!(second_gap, Duration::from_secs(2));
        assert!(second_gap > first_gap);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_yield_empty_result() {
        let adapter = Arc::new(FakeAdapter::new());
        adapter.fail_next_forecasts(6);
        let forecasts = cache(adapter.clone());

        let err = forecasts.get(&location("101010100")).await.unwrap_err();
        assert!(matches!(err, Error::EmptyResult(_)));
        assert_eq!(adapter.forecast_attempts().len(), 6);
        assert_eq!(forecasts.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entry_is_served_from_cache() {
        let adapter = Arc::new(FakeAdapter::new());
        let forecasts = cache(adapter.clone());
        let loc = location("101010100");

        let first = forecasts.get(&loc).await.unwrap();
        let second = forecasts.get(&loc).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(adapter.forecast_attempts().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_served_while_refreshing() {
        let adapter = Arc::new(FakeAdapter::new());
        let forecasts = cache(adapter.clone());
        let loc = location("101010100");

        let first = forecasts.get(&loc).await.unwrap();
        adapter.set_forecast_wind("北风3级");
        tokio::time::advance(TTL).await;

        // Stale data comes back immediately; the refresh runs behind it.
        let stale = forecasts.get(&loc).await.unwrap();
        assert_eq!(stale, first);
        assert_eq!(forecasts.pending_refreshes(), 1);

        forecasts.tracker.close();
        forecasts.tracker.wait().await;
        let refreshed = forecasts.get(&loc).await.unwrap();
        assert_eq!(refreshed[0].wind, "北风3级");
        assert_eq!(adapter.forecast_attempts().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_stale_reads_start_one_refresh() {
        let adapter = Arc::new(FakeAdapter::new());
        let forecasts = cache(adapter.clone());
        let loc = location("101010100");

        forecasts.get(&loc).await.unwrap();
        tokio::time::advance(TTL).await;

        forecasts.get(&loc).await.unwrap();
        forecasts.get(&loc).await.unwrap();
        assert_eq!(forecasts.pending_refreshes(), 1);

        forecasts.tracker.close();
        forecasts.tracker.wait().await;
        // Two month pages for the first load and two for the single refresh.
        assert_eq!(adapter.forecast_attempts().len(), 4);
        assert!(forecasts.inner.refreshing.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_background_refresh() {
        let adapter = Arc::new(FakeAdapter::new());
        let forecasts = cache(adapter.clone());
        let loc = location("101010100");

        forecasts.get(&loc).await.unwrap();
        tokio::time::advance(TTL).await;
        adapter.fail_next_forecasts(3);
        forecasts.get(&loc).await.unwrap();

        forecasts.shutdown().await;
        assert_eq!(forecasts.pending_refreshes(), 0);
        // No new refreshes are started after shutdown.
        forecasts.get(&loc).await.unwrap();
        assert_eq!(forecasts.pending_refreshes(), 0);
    }
}
