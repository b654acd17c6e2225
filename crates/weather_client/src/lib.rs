//! weather.com.cn source adapter.
//!
//! Fetches directory pages, the seven-day page, current conditions, calendar
//! month outlooks, and the alert feed, and turns them into the shared domain
//! records. One attempt per call; retry policy belongs to the caller.

pub mod payload;
pub mod scrape;
pub mod transliterate;

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{
    AlertDetails, CurrentConditions, Error, ForecastDay, Location, Result, SourceAdapter,
    WeatherRecord,
};
use reqwest::header::{HeaderMap, HeaderValue, REFERER};
use tracing::debug;

pub use transliterate::PinyinTransliterator;

pub const WEATHER_SITE: &str = "http://www.weather.com.cn";
/// Directory page listing every province.
pub const REGION_DIRECTORY: &str = "/textFC/hb.shtml";

const CURRENT_URL: &str = "http://d1.weather.com.cn/sk_2d";
const CALENDAR_URL: &str = "https://d1.weather.com.cn/calendarFromMon";
const ALERT_LIST_URL: &str = "http://product.weather.com.cn/alarm/grepalarm_cn.php";
const ALERT_DETAILS_URL: &str = "http://product.weather.com.cn/alarm/webdata/";
const ALERT_FORM_URL: &str = "http://www.weather.com.cn/data/alarminfo/";
const BROWSER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// HTTP client for weather.com.cn with connection pooling and browser headers.
#[derive(Debug, Clone)]
pub struct WeatherComClient {
    client: reqwest::Client,
}

impl WeatherComClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_static("http://www.weather.com.cn/"));

        let client = reqwest::Client::builder()
            .user_agent(BROWSER_AGENT)
            .default_headers(headers)
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!("GET {}", url);

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("HTTP error for {}: {}", url, e)))?;

        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::UpstreamUnavailable(format!(
                "{} returned {}: {}",
                url,
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| {
                Error::UpstreamUnavailable(format!("body read failed for {}: {}", url, e))
            })?;
        Ok(bytes.to_vec())
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        let bytes = self.get_bytes(url).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Absolute URL for a site-relative locator.
fn site_url(locator: &str) -> String {
    if locator.starts_with("http://") || locator.starts_with("https://") {
        locator.to_string()
    } else {
        format!("{}{}", WEATHER_SITE, locator)
    }
}

fn cache_buster() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait]
impl SourceAdapter for WeatherComClient {
    async fn fetch_page(&self, locator: &str) -> Result<String> {
        self.get_text(&site_url(locator)).await
    }

    async fn fetch_weather(&self, location: &Location) -> Result<WeatherRecord> {
        let locator = location.locator.replacen("weather", "weathern", 1);
        let html = self.get_text(&site_url(&locator)).await?;
        let record = scrape::parse_weather_page(&html)?;
        debug!(
            "Parsed {} days, {} indices for {}",
            record.days.len(),
            record.life_indices.len(),
            location.full_path
        );
        Ok(record)
    }

    async fn fetch_current(&self, code: &str) -> Result<CurrentConditions> {
        let url = format!("{}/{}.html?_={}", CURRENT_URL, code, cache_buster());
        let raw = self.get_bytes(&url).await?;
        payload::decode_current(&raw)
    }

    async fn fetch_forecast_month(
        &self,
        code: &str,
        year: i32,
        month: u32,
    ) -> Result<Vec<ForecastDay>> {
        let url = format!(
            "{}/{:04}/{}_{:04}{:02}.html",
            CALENDAR_URL, year, code, year, month
        );
        let raw = self.get_bytes(&url).await?;
        payload::decode_calendar_month(&raw)
    }

    async fn fetch_hazard_list(&self) -> Result<Vec<u8>> {
        let url = format!("{}?_={}", ALERT_LIST_URL, cache_buster());
        self.get_bytes(&url).await
    }

    async fn fetch_hazard_details(&self, file_name: &str) -> Result<AlertDetails> {
        let raw = self
            .get_bytes(&format!("{}{}", ALERT_DETAILS_URL, file_name))
            .await?;
        let mut details = payload::decode_alert(&raw)?;

        let form_url = format!(
            "{}{}?_={}",
            ALERT_FORM_URL,
            payload::alert_form_name(file_name),
            cache_buster()
        );
        let form = match self.get_bytes(&form_url).await {
            Ok(raw) => payload::apply_alert_form(&raw, &mut details),
            Err(e) => Err(e),
        };
        if let Err(e) = form {
            debug!("Alert form unavailable for {}: {}", file_name, e);
        }
        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_url() {
        assert_eq!(
            site_url("/textFC/beijing.shtml"),
            "http://www.weather.com.cn/textFC/beijing.shtml"
        );
        assert_eq!(site_url("https://example.com/x"), "https://example.com/x");
    }

    #[test]
    fn test_client_builds() {
        assert!(WeatherComClient::new(Duration::from_secs(10)).is_ok());
    }
}
