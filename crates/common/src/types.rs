//! Domain types shared across the service.

use serde::{Deserialize, Serialize};

// ── Locations ─────────────────────────────────────────────────────────

/// A resolved location as handed to callers and to the source adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Display name (e.g. "海淀").
    pub name: String,
    /// Comma-joined display path (e.g. "北京,北京,海淀").
    #[serde(rename = "fullname")]
    pub full_path: String,
    /// Comma-joined ascii-key path (e.g. "beijing,beijing,haidian").
    #[serde(rename = "spell")]
    pub ascii_path: String,
    /// Canonical location code; cache and hazard key.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub code: String,
    /// Upstream locator for this location's pages.
    #[serde(skip)]
    pub locator: String,
}

// ── Weather snapshot ──────────────────────────────────────────────────

/// Wind description for a single day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wind {
    pub from: String,
    pub to: String,
    pub level: String,
}

/// Sunrise and sunset for a single day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SunTurn {
    pub sunrise: String,
    pub sunset: String,
}

/// One day of the short-range outlook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyOutlook {
    pub date: String,
    /// Sky condition text.
    pub sun: String,
    /// `[low, high]` in °C.
    pub temperature: [i32; 2],
    pub wind: Wind,
    pub turn: SunTurn,
}

/// A lifestyle index (dressing, UV, exercise...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifeIndex {
    pub name: String,
    pub level: String,
    pub tips: String,
    pub stars: String,
}

/// Slow-changing part of a snapshot, produced by a full fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherRecord {
    /// Upstream publish time (e.g. "07:30").
    pub update_time: String,
    pub days: Vec<DailyOutlook>,
    pub life_indices: Vec<LifeIndex>,
}

/// Fast-changing current conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentConditions {
    #[serde(rename = "temp")]
    pub temperature: String,
    #[serde(rename = "tempf")]
    pub temperature_f: String,
    #[serde(rename = "windirection")]
    pub wind_direction: String,
    #[serde(rename = "windlevel")]
    pub wind_level: String,
    #[serde(rename = "windspeed")]
    pub wind_speed: String,
    pub humidity: String,
    pub pressure: String,
    pub visibility: String,
    pub time: String,
    #[serde(rename = "aqi")]
    pub air_quality: String,
    pub weather: String,
    pub date: String,
}

/// Full detail of one active weather warning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertDetails {
    pub title: String,
    pub details: String,
    pub standard: String,
    pub manual: String,
    #[serde(rename = "typecode")]
    pub type_code: String,
    #[serde(rename = "levelcode")]
    pub level_code: String,
    #[serde(rename = "signaltype")]
    pub signal_type: String,
    #[serde(rename = "signallevel")]
    pub signal_level: String,
    #[serde(rename = "issuetime")]
    pub issue_time: String,
}

/// Assembled weather response for one location.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    #[serde(skip)]
    pub code: String,
    pub name: String,
    #[serde(rename = "spell")]
    pub ascii_path: String,
    #[serde(rename = "fullname")]
    pub full_path: String,
    #[serde(rename = "updatetime")]
    pub update_time: String,
    /// True when at least one hazard applies.
    pub alarm: bool,
    /// Wall-clock time of this read; recomputed on every access.
    #[serde(rename = "servertime")]
    pub server_time: String,
    /// Lunar calendar rendering of `server_time`; recomputed on every access.
    pub lunar: String,
    #[serde(rename = "nowinfo")]
    pub current: CurrentConditions,
    #[serde(rename = "liveindex")]
    pub life_indices: Vec<LifeIndex>,
    #[serde(rename = "weather")]
    pub days: Vec<DailyOutlook>,
    #[serde(rename = "alarminfo")]
    pub alerts: Vec<AlertDetails>,
}

impl WeatherSnapshot {
    /// Assemble a snapshot from a location and the two fetched halves.
    pub fn assemble(
        location: &Location,
        record: WeatherRecord,
        current: CurrentConditions,
    ) -> Self {
        Self {
            code: location.code.clone(),
            name: location.name.clone(),
            ascii_path: location.ascii_path.clone(),
            full_path: location.full_path.clone(),
            update_time: record.update_time,
            current,
            life_indices: record.life_indices,
            days: record.days,
            ..Default::default()
        }
    }
}

// ── Forecast ──────────────────────────────────────────────────────────

/// One day of the multi-week outlook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastDay {
    pub date: String,
    pub week: String,
    pub lunar: String,
    pub festival: String,
    #[serde(rename = "rfestival")]
    pub r_festival: String,
    #[serde(rename = "solarterm")]
    pub solar_term: String,
    #[serde(rename = "subsolarterm")]
    pub sub_solar_term: String,
    #[serde(rename = "wcodeone")]
    pub weather_code_one: String,
    #[serde(rename = "wcodetwo")]
    pub weather_code_two: String,
    pub weather: String,
    pub wind: String,
    #[serde(rename = "htemp")]
    pub high_temp: String,
    #[serde(rename = "mtemp")]
    pub low_temp: String,
    #[serde(rename = "hmax")]
    pub hist_max: String,
    #[serde(rename = "hmin")]
    pub hist_min: String,
    #[serde(rename = "hrate")]
    pub hist_rain_rate: String,
    #[serde(rename = "hrain")]
    pub hist_rain: String,
    pub ripe: String,
    pub avoid: String,
}

// ── Hazards ───────────────────────────────────────────────────────────

/// One entry of the active alert list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HazardRecord {
    pub name: String,
    /// Detail document name; its prefix before `-` is the location code.
    pub file_name: String,
    pub longitude: String,
    pub latitude: String,
    pub code: String,
    pub code2: String,
}

// ── Stats ─────────────────────────────────────────────────────────────

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub bytes: i64,
    pub items: i64,
    pub gets: i64,
    pub hits: i64,
    pub evictions: i64,
    /// Full-refresh interval in minutes.
    #[serde(rename = "refreshrate")]
    pub refresh_rate: i64,
}
