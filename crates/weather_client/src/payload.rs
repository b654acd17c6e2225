//! Decoders for the script-wrapped JSON endpoints.
//!
//! Most `d1.weather.com.cn` responses are `var name=<json>` assignments; the
//! prefix length is fixed per endpoint.

use common::{AlertDetails, CurrentConditions, Error, ForecastDay, Result};
use serde::Deserialize;

/// `var dataSK=` in front of current conditions.
pub const CURRENT_PREFIX_LEN: usize = 11;
/// `var fc40 = ` in front of a calendar month page.
pub const CALENDAR_PREFIX_LEN: usize = 11;
/// `var alarminfo=` in front of alert documents.
pub const ALERT_PREFIX_LEN: usize = 14;

/// Strip a fixed-length script prefix and any trailing `;`/whitespace.
pub fn unwrap_script(raw: &[u8], prefix_len: usize) -> Result<&[u8]> {
    if raw.len() <= prefix_len {
        return Err(Error::DecodeFailure(format!(
            "payload too short: {} bytes",
            raw.len()
        )));
    }
    let mut body = &raw[prefix_len..];
    while let Some((last, rest)) = body.split_last() {
        if last.is_ascii_whitespace() || *last == b';' {
            body = rest;
        } else {
            break;
        }
    }
    Ok(body)
}

// ── Current conditions ────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CurrentWire {
    temp: String,
    tempf: String,
    #[serde(rename = "WD")]
    wind_direction: String,
    #[serde(rename = "WS")]
    wind_scale: String,
    wse: String,
    #[serde(rename = "SD")]
    humidity: String,
    qy: String,
    njd: String,
    time: String,
    aqi: String,
    weather: String,
    date: String,
}

pub fn decode_current(raw: &[u8]) -> Result<CurrentConditions> {
    let body = unwrap_script(raw, CURRENT_PREFIX_LEN)?;
    let wire: CurrentWire = serde_json::from_slice(body)
        .map_err(|e| Error::DecodeFailure(format!("current conditions: {}", e)))?;
    Ok(CurrentConditions {
        temperature: wire.temp,
        temperature_f: wire.tempf,
        wind_direction: wire.wind_direction,
        wind_level: wire.wind_scale,
        wind_speed: wire.wse,
        humidity: wire.humidity,
        pressure: wire.qy,
        visibility: wire.njd,
        time: wire.time,
        air_quality: wire.aqi,
        weather: wire.weather,
        date: wire.date,
    })
}

// ── Calendar month ────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CalendarWire {
    date: String,
    wk: String,
    nlyf: String,
    nl: String,
    yl: String,
    fe: String,
    jq: String,
    winter: String,
    c1: String,
    c2: String,
    w1: String,
    wd1: String,
    max: String,
    min: String,
    hmax: String,
    hmin: String,
    hgl: String,
    rainobs: String,
    als: String,
    alins: String,
}

/// Decode one calendar month page. Records are passed through unfiltered.
pub fn decode_calendar_month(raw: &[u8]) -> Result<Vec<ForecastDay>> {
    let body = unwrap_script(raw, CALENDAR_PREFIX_LEN)?;
    let rows: Vec<CalendarWire> = serde_json::from_slice(body)
        .map_err(|e| Error::DecodeFailure(format!("calendar month: {}", e)))?;
    Ok(rows
        .into_iter()
        .map(|r| ForecastDay {
            date: r.date,
            week: if r.wk.is_empty() { r.wk } else { format!("周{}", r.wk) },
            lunar: format!("{} {}", r.nlyf, r.nl).trim().to_string(),
            festival: r.yl,
            r_festival: r.fe,
            solar_term: r.jq,
            sub_solar_term: r.winter,
            weather_code_one: r.c1,
            weather_code_two: r.c2,
            weather: r.w1,
            wind: r.wd1,
            high_temp: r.max,
            low_temp: r.min,
            hist_max: r.hmax,
            hist_min: r.hmin,
            hist_rain_rate: r.hgl,
            hist_rain: r.rainobs,
            ripe: r.als,
            avoid: r.alins,
        })
        .collect())
}

// ── Alerts ────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AlertWire {
    head: String,
    #[serde(rename = "SIGNALTYPE")]
    signal_type: String,
    #[serde(rename = "SIGNALLEVEL")]
    signal_level: String,
    #[serde(rename = "TYPECODE")]
    type_code: String,
    #[serde(rename = "LEVELCODE")]
    level_code: String,
    #[serde(rename = "ISSUETIME")]
    issue_time: String,
    #[serde(rename = "ISSUECONTENT")]
    issue_content: String,
}

pub fn decode_alert(raw: &[u8]) -> Result<AlertDetails> {
    let body = unwrap_script(raw, ALERT_PREFIX_LEN)?;
    let wire: AlertWire = serde_json::from_slice(body)
        .map_err(|e| Error::DecodeFailure(format!("alert details: {}", e)))?;
    Ok(AlertDetails {
        title: wire.head,
        details: wire.issue_content,
        type_code: wire.type_code,
        level_code: wire.level_code,
        signal_type: wire.signal_type,
        signal_level: wire.signal_level,
        issue_time: wire.issue_time,
        ..Default::default()
    })
}

/// Name of the form document for an alert file: the part after its last `-`.
pub fn alert_form_name(file_name: &str) -> &str {
    file_name.rsplit('-').next().unwrap_or(file_name)
}

/// Merge the alert form (`var alarminfo=[id,"title","standard","manual"];`).
pub fn apply_alert_form(raw: &[u8], details: &mut AlertDetails) -> Result<()> {
    let body = unwrap_script(raw, ALERT_PREFIX_LEN)?;
    let text = String::from_utf8_lossy(body);
    let fields: Vec<&str> = text
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .collect();
    if fields.len() < 4 {
        return Err(Error::DecodeFailure(format!(
            "alert form has {} fields",
            fields.len()
        )));
    }
    details.title = fields[1].trim().trim_matches('"').to_string();
    details.standard = fields[2].replace('"', "");
    details.manual = fields[3].replace("<br>", "").replace('"', "");
    Ok(())
}
