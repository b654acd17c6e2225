//! Seams to the outside world: the upstream source and the name transliterator.

use async_trait::async_trait;

use crate::{
    AlertDetails, CurrentConditions, ForecastDay, Location, Result, WeatherRecord,
};

/// Upstream meteorological data source.
///
/// Implementations own transport and page-specific extraction; callers only
/// see raw pages where the core does its own parsing, and structured records
/// everywhere else. Transport failures and non-success statuses map to
/// `Error::UpstreamUnavailable`, malformed payloads to `Error::DecodeFailure`.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Raw HTML of a directory or region page.
    async fn fetch_page(&self, locator: &str) -> Result<String>;

    /// Slow-changing weather fields for a location.
    async fn fetch_weather(&self, location: &Location) -> Result<WeatherRecord>;

    /// Current conditions for a location code.
    async fn fetch_current(&self, code: &str) -> Result<CurrentConditions>;

    /// One calendar-month page of the long-range outlook.
    async fn fetch_forecast_month(
        &self,
        code: &str,
        year: i32,
        month: u32,
    ) -> Result<Vec<ForecastDay>>;

    /// Raw, still-wrapped active alert list.
    async fn fetch_hazard_list(&self) -> Result<Vec<u8>>;

    /// Detail document for one alert.
    async fn fetch_hazard_details(&self, file_name: &str) -> Result<AlertDetails>;
}

/// Converts a display name into the latin key used by the region index.
pub trait Transliterator: Send + Sync {
    fn ascii_key(&self, name: &str) -> String;
}

impl<F> Transliterator for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn ascii_key(&self, name: &str) -> String {
        self(name)
    }
}
