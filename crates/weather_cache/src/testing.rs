//! In-memory source adapter and page fixtures shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use common::{
    AlertDetails, CurrentConditions, DailyOutlook, Error, ForecastDay, LifeIndex, Location,
    Result, SourceAdapter, WeatherRecord,
};
use tokio::time::Instant;

use crate::calendar::WallClock;

pub const DIRECTORY_LOCATOR: &str = "/textFC/hb.shtml";

pub const DIRECTORY_PAGE: &str = r#"<html><body>
<ul class="lqcontentBoxheader">
<li><a href="/textFC/beijing.shtml" target="_blank">北京</a></li>
<li><a href="/textFC/hebei.shtml" target="_blank">河北</a></li>
</ul>
<div class="lqcontentBoxH">
<a href="/textFC/beijing.shtml" target="_blank">北京</a>
</div>
</body></html>"#;

pub const BEIJING_PAGE: &str = r#"<html><body>
<div class="conMidtab3">
<table><tr>
<td class="rowsPan" rowspan="2"><a href="/weather/101010100.shtml" target="_blank">北京</a></td>
<td><a href="/weather/101010100.shtml" target="_blank">北京</a></td>
<td><a href="/weather/101010100.shtml" target="_blank">详情</a></td>
</tr><tr>
<td><a href="/weather/101010200.shtml" target="_blank">海淀</a></td>
<td><a href="/weather/101010200.shtml" target="_blank">详情</a></td>
</tr></table>
</div>
<div class="conMidtab3">
<table><tr>
<td class="rowsPan">延庆</td>
<td><a href="/weather/101010800.shtml" target="_blank">延庆</a></td>
<td><a href="/weather/101010800.shtml" target="_blank">详情</a></td>
</tr></table>
</div>
<div class="conMidtab3">
<table><tr>
<td class="rowsPan"><a href="/weather/101010100.shtml" target="_blank">北京</a></td>
<td><a href="/weather/101019999.shtml" target="_blank">北京</a></td>
</tr></table>
</div>
</body></html>"#;

pub const HEBEI_PAGE: &str = r#"<html><body>
<div class="conMidtab3">
<table><tr>
<td class="rowsPan">石家庄</td>
<td><a href="/weather/101090101.shtml" target="_blank">石家庄</a></td>
<td><a href="/weather/101090101.shtml" target="_blank">详情</a></td>
</tr></table>
</div>
</body></html>"#;

/// Fixed transliteration table; unknown names map to an empty key.
pub fn sample_translit(name: &str) -> String {
    match name {
        "北京" => "beijing",
        "海淀" => "haidian",
        "延庆" => "yanqing",
        "河北" => "hebei",
        "石家庄" => "shijiazhuang",
        "详情" => "xiangqing",
        _ => "",
    }
    .to_string()
}

pub fn location(code: &str) -> Location {
    Location {
        name: "海淀".into(),
        full_path: "北京,北京,海淀".into(),
        ascii_path: "beijing,beijing,haidian".into(),
        code: code.into(),
        locator: format!("/weather/{}.shtml", code),
    }
}

/// Alert feed bytes as served upstream, one row per `(name, file_name)`.
pub fn hazard_feed(rows: &[(&str, &str)]) -> Vec<u8> {
    let data: Vec<serde_json::Value> = rows
        .iter()
        .map(|(name, file)| serde_json::json!([name, file, "116.3", "39.9", "0501", "1"]))
        .collect();
    let body = serde_json::json!({ "count": rows.len().to_string(), "data": data });
    format!("var alarminfo={};", body).into_bytes()
}

pub fn sample_record(update_time: &str) -> WeatherRecord {
    WeatherRecord {
        update_time: update_time.to_string(),
        days: vec![DailyOutlook {
            date: "18日(今天)".into(),
            sun: "晴".into(),
            temperature: [8, 19],
            ..Default::default()
        }],
        life_indices: vec![LifeIndex {
            name: "穿衣指数".into(),
            level: "较舒适".into(),
            tips: "建议穿薄外套".into(),
            stars: String::new(),
        }],
    }
}

pub fn sample_current(temperature: &str) -> CurrentConditions {
    CurrentConditions {
        temperature: temperature.to_string(),
        weather: "晴".into(),
        humidity: "40%".into(),
        ..Default::default()
    }
}

/// Wall clock that moves one second forward on every read.
pub struct StepClock {
    secs: AtomicI64,
}

impl StepClock {
    pub fn new() -> Self {
        let start = Utc
            .with_ymd_and_hms(2026, 10, 18, 6, 0, 0)
            .unwrap()
            .timestamp();
        Self {
            secs: AtomicI64::new(start),
        }
    }
}

impl WallClock for StepClock {
    fn now(&self) -> DateTime<Utc> {
        let secs = self.secs.fetch_add(1, Ordering::SeqCst);
        DateTime::from_timestamp(secs, 0).unwrap()
    }
}

/// Scriptable `SourceAdapter` with call counters.
pub struct FakeAdapter {
    pages: Mutex<HashMap<String, String>>,
    page_calls: AtomicUsize,
    page_delay: Mutex<Duration>,
    pages_in_flight: AtomicUsize,
    peak_pages_in_flight: AtomicUsize,
    weather_calls: AtomicUsize,
    current_calls: AtomicUsize,
    hazard_calls: AtomicUsize,
    detail_calls: AtomicUsize,
    fail_weather: AtomicBool,
    fail_current: AtomicBool,
    weather_delay: Mutex<Duration>,
    update_time: Mutex<String>,
    temperature: Mutex<String>,
    forecast_failures: Mutex<usize>,
    forecast_attempts: Mutex<Vec<Instant>>,
    forecast_empty: AtomicBool,
    forecast_wind: Mutex<String>,
    hazard_payload: Mutex<Option<Vec<u8>>>,
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            page_calls: AtomicUsize::new(0),
            page_delay: Mutex::new(Duration::ZERO),
            pages_in_flight: AtomicUsize::new(0),
            peak_pages_in_flight: AtomicUsize::new(0),
            weather_calls: AtomicUsize::new(0),
            current_calls: AtomicUsize::new(0),
            hazard_calls: AtomicUsize::new(0),
            detail_calls: AtomicUsize::new(0),
            fail_weather: AtomicBool::new(false),
            fail_current: AtomicBool::new(false),
            weather_delay: Mutex::new(Duration::ZERO),
            update_time: Mutex::new("07:30".into()),
            temperature: Mutex::new("15".into()),
            forecast_failures: Mutex::new(0),
            forecast_attempts: Mutex::new(Vec::new()),
            forecast_empty: AtomicBool::new(false),
            forecast_wind: Mutex::new("<3级".into()),
            hazard_payload: Mutex::new(None),
        }
    }

    /// Adapter serving the directory page and both province pages.
    pub fn with_regions() -> Self {
        let adapter = Self::new();
        adapter.set_page(DIRECTORY_LOCATOR, DIRECTORY_PAGE);
        adapter.set_page("/textFC/beijing.shtml", BEIJING_PAGE);
        adapter.set_page("/textFC/hebei.shtml", HEBEI_PAGE);
        adapter
    }

    pub fn set_page(&self, locator: &str, html: &str) {
        self.pages.lock().unwrap().insert(locator.into(), html.into());
    }

    pub fn remove_page(&self, locator: &str) {
        self.pages.lock().unwrap().remove(locator);
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    /// Every page fetch sleeps this long before answering.
    pub fn set_page_delay(&self, delay: Duration) {
        *self.page_delay.lock().unwrap() = delay;
    }

    /// Most page fetches ever in progress at the same time.
    pub fn peak_pages_in_flight(&self) -> usize {
        self.peak_pages_in_flight.load(Ordering::SeqCst)
    }

    pub fn weather_calls(&self) -> usize {
        self.weather_calls.load(Ordering::SeqCst)
    }

    pub fn current_calls(&self) -> usize {
        self.current_calls.load(Ordering::SeqCst)
    }

    pub fn hazard_calls(&self) -> usize {
        self.hazard_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    pub fn set_fail_weather(&self, fail: bool) {
        self.fail_weather.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_current(&self, fail: bool) {
        self.fail_current.store(fail, Ordering::SeqCst);
    }

    pub fn set_weather_delay(&self, delay: Duration) {
        *self.weather_delay.lock().unwrap() = delay;
    }

    pub fn set_update_time(&self, update_time: &str) {
        *self.update_time.lock().unwrap() = update_time.into();
    }

    pub fn set_temperature(&self, temperature: &str) {
        *self.temperature.lock().unwrap() = temperature.into();
    }

    /// The next `n` month fetches fail with an upstream error.
    pub fn fail_next_forecasts(&self, n: usize) {
        *self.forecast_failures.lock().unwrap() = n;
    }

    pub fn forecast_attempts(&self) -> Vec<Instant> {
        self.forecast_attempts.lock().unwrap().clone()
    }

    pub fn set_forecast_empty(&self, empty: bool) {
        self.forecast_empty.store(empty, Ordering::SeqCst);
    }

    pub fn set_forecast_wind(&self, wind: &str) {
        *self.forecast_wind.lock().unwrap() = wind.into();
    }

    /// `None` makes the alert list unavailable.
    pub fn set_hazard_payload(&self, payload: Option<Vec<u8>>) {
        *self.hazard_payload.lock().unwrap() = payload;
    }
}

#[async_trait]
impl SourceAdapter for FakeAdapter {
    async fn fetch_page(&self, locator: &str) -> Result<String> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        let running = self.pages_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_pages_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = *self.page_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.pages_in_flight.fetch_sub(1, Ordering::SeqCst);
        self.pages
            .lock()
            .unwrap()
            .get(locator)
            .cloned()
            .ok_or_else(|| Error::UpstreamUnavailable(format!("404 {}", locator)))
    }

    async fn fetch_weather(&self, location: &Location) -> Result<WeatherRecord> {
        self.weather_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.weather_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_weather.load(Ordering::SeqCst) {
            return Err(Error::UpstreamUnavailable(format!("weather {}", location.code)));
        }
        Ok(sample_record(&self.update_time.lock().unwrap()))
    }

    async fn fetch_current(&self, code: &str) -> Result<CurrentConditions> {
        self.current_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_current.load(Ordering::SeqCst) {
            return Err(Error::UpstreamUnavailable(format!("current {}", code)));
        }
        Ok(sample_current(&self.temperature.lock().unwrap()))
    }

    async fn fetch_forecast_month(
        &self,
        code: &str,
        year: i32,
        month: u32,
    ) -> Result<Vec<ForecastDay>> {
        self.forecast_attempts.lock().unwrap().push(Instant::now());
        {
            let mut failures = self.forecast_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::UpstreamUnavailable(format!(
                    "calendar {} {}-{}",
                    code, year, month
                )));
            }
        }
        if self.forecast_empty.load(Ordering::SeqCst) {
            return Ok(Vec::new());
        }
        let wind = self.forecast_wind.lock().unwrap().clone();
        Ok(vec![
            ForecastDay::default(),
            ForecastDay {
                date: format!("{:04}-{:02}-01", year, month),
                week: "周四".into(),
                weather_code_one: "01".into(),
                weather_code_two: "01".into(),
                wind: wind.clone(),
                high_temp: "19".into(),
                low_temp: "8".into(),
                ..Default::default()
            },
            ForecastDay {
                date: format!("{:04}-{:02}-02", year, month),
                week: "周五".into(),
                weather_code_one: "00".into(),
                weather: "晴".into(),
                wind,
                ..Default::default()
            },
        ])
    }

    async fn fetch_hazard_list(&self) -> Result<Vec<u8>> {
        self.hazard_calls.fetch_add(1, Ordering::SeqCst);
        self.hazard_payload
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::UpstreamUnavailable("alert list".into()))
    }

    async fn fetch_hazard_details(&self, file_name: &str) -> Result<AlertDetails> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        Ok(AlertDetails {
            title: format!("预警 {}", file_name),
            type_code: "05".into(),
            level_code: "01".into(),
            ..Default::default()
        })
    }
}
