//! Extraction of the seven-day page (`/weathern/<code>.shtml`).
//!
//! The page carries the outlook in three places: inline script arrays for
//! temperatures and sun times, a date strip, and the sky/wind strip. Lists
//! are aligned from the tail, since some of them include yesterday's column.

use std::collections::HashMap;
use std::sync::OnceLock;

use common::{DailyOutlook, Error, LifeIndex, Result, SunTurn, WeatherRecord, Wind};
use regex::Regex;

pub const OUTLOOK_DAYS: usize = 7;
pub const LIFE_INDEX_COUNT: usize = 6;

const SEVEN_DAY_START: &str = r#"<div class="weather_7d">"#;
const SEVEN_DAY_END: &str = "</script>";
const DATE_STRIP_START: &str = r#"<ul class="date-container">"#;
const DATE_STRIP_END: &str = "</ul>";
const LIFE_INDEX_START: &str = r#"<div class="weather_shzs">"#;
const LIFE_INDEX_END: &str = "</div>\n</div>";
const STAR: &str = "☆";

static SCRIPT_ARRAY: OnceLock<Regex> = OnceLock::new();
static UPDATE_TIME: OnceLock<Regex> = OnceLock::new();
static DATE_NUM: OnceLock<Regex> = OnceLock::new();
static DATE_NAME: OnceLock<Regex> = OnceLock::new();
static SKY: OnceLock<Regex> = OnceLock::new();
static WIND_LEVEL: OnceLock<Regex> = OnceLock::new();
static WIND_ICON: OnceLock<Regex> = OnceLock::new();
static INDEX_NAME: OnceLock<Regex> = OnceLock::new();
static INDEX_LEVEL: OnceLock<Regex> = OnceLock::new();
static INDEX_TIPS: OnceLock<Regex> = OnceLock::new();
static INDEX_STARS: OnceLock<Regex> = OnceLock::new();

fn pattern(cell: &'static OnceLock<Regex>, src: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(src).expect("static pattern compiles"))
}

/// Slice of `haystack` from the end of `start` up to the first `end` after it.
pub(crate) fn section<'a>(haystack: &'a str, start: &str, end: &str) -> Option<&'a str> {
    let from = haystack.find(start)? + start.len();
    let len = haystack[from..].find(end)?;
    Some(&haystack[from..from + len])
}

fn captures(re: &Regex, text: &str) -> Vec<String> {
    re.captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
        .collect()
}

/// `var name = ["a","b",...]` arrays inside the seven-day script.
fn script_arrays(block: &str) -> HashMap<String, Vec<String>> {
    let re = pattern(&SCRIPT_ARRAY, r"var\s+(\w+)\s*=\s*\[([^\]]*)\]");
    re.captures_iter(block)
        .map(|c| {
            let items = c[2]
                .split(',')
                .map(|v| v.trim().trim_matches('"').to_string())
                .filter(|v| !v.is_empty())
                .collect();
            (c[1].to_string(), items)
        })
        .collect()
}

fn temperatures(values: &[String]) -> Vec<i32> {
    values
        .iter()
        .map(|v| v.parse::<i32>().unwrap_or(0))
        .collect()
}

/// Day `i` of `count` days, with `list` aligned to the last day.
fn aligned<T: Clone + Default>(list: &[T], count: usize, i: usize) -> T {
    (i + list.len())
        .checked_sub(count)
        .and_then(|idx| list.get(idx))
        .cloned()
        .unwrap_or_default()
}

/// Parse the seven-day page into the slow-changing half of a snapshot.
pub fn parse_weather_page(html: &str) -> Result<WeatherRecord> {
    let block = section(html, SEVEN_DAY_START, SEVEN_DAY_END)
        .ok_or_else(|| Error::DecodeFailure("seven-day block not found".into()))?;
    let arrays = script_arrays(block);
    let empty = Vec::new();
    let highs = temperatures(arrays.get("eventDay").unwrap_or(&empty));
    let lows = temperatures(arrays.get("eventNight").unwrap_or(&empty));
    let sunrise = arrays.get("sunup").unwrap_or(&empty);
    let sunset = arrays.get("sunset").unwrap_or(&empty);

    let update_time = pattern(
        &UPDATE_TIME,
        r#"<input type="hidden" id="update_time" value="([^"]*)""#,
    )
    .captures(html)
    .map(|c| c[1].to_string())
    .unwrap_or_default();

    let strip_at = html
        .find(DATE_STRIP_START)
        .ok_or_else(|| Error::DecodeFailure("date strip not found".into()))?;
    let date_strip = section(&html[strip_at..], DATE_STRIP_START, DATE_STRIP_END).unwrap_or("");
    let dates = captures(pattern(&DATE_NUM, r#"<p class="date">(.*?)</p>"#), date_strip);
    let names = captures(pattern(&DATE_NAME, r#"<p class="date-info">(.*?)</p>"#), date_strip);

    let after_strip = &html[strip_at..];
    let skies = captures(
        pattern(&SKY, r#"<p class="weather-info" title="([^"]*)""#),
        after_strip,
    );
    let levels = captures(
        pattern(&WIND_LEVEL, r#"<p class="wind-info">(.*?)</p>"#),
        after_strip,
    );
    let wind_icons = captures(
        pattern(&WIND_ICON, r#"<i class="wind-icon[^"]*" title="([^"]*)""#),
        after_strip,
    );
    let wind_pairs: Vec<(String, String)> = wind_icons
        .chunks(2)
        .map(|pair| {
            let from = pair[0].clone();
            let to = pair.get(1).cloned().unwrap_or_else(|| from.clone());
            (from, to)
        })
        .collect();

    let count = dates.len().min(highs.len()).min(lows.len()).min(OUTLOOK_DAYS);
    if count == 0 {
        return Err(Error::DecodeFailure(format!(
            "incomplete outlook: {} dates, {} highs, {} lows",
            dates.len(),
            highs.len(),
            lows.len()
        )));
    }

    let days = (0..count)
        .map(|i| {
            let (from, to) = aligned(&wind_pairs, count, i);
            DailyOutlook {
                date: format!("{}({})", aligned(&dates, count, i), aligned(&names, count, i)),
                sun: aligned(&skies, count, i),
                temperature: [aligned(&lows, count, i), aligned(&highs, count, i)],
                wind: Wind {
                    from,
                    to,
                    level: aligned(&levels, count, i),
                },
                turn: SunTurn {
                    sunrise: aligned(sunrise, count, i),
                    sunset: aligned(sunset, count, i),
                },
            }
        })
        .collect();

    Ok(WeatherRecord {
        update_time,
        days,
        life_indices: parse_life_indices(html),
    })
}

/// Life indices block; absent or malformed blocks yield an empty list.
pub fn parse_life_indices(html: &str) -> Vec<LifeIndex> {
    let Some(block) = section(html, LIFE_INDEX_START, LIFE_INDEX_END) else {
        return Vec::new();
    };
    let names = captures(pattern(&INDEX_NAME, r"<h2>(.*?)</h2>"), block);
    let levels = captures(pattern(&INDEX_LEVEL, r"<em>(.*?)</em>"), block);
    let tips = captures(pattern(&INDEX_TIPS, r"<dd>(.*?)</dd>"), block);
    let stars = captures(pattern(&INDEX_STARS, r"(?s)<p[^>]*>(.*?)</p>"), block);

    names
        .into_iter()
        .zip(levels)
        .zip(tips)
        .take(LIFE_INDEX_COUNT)
        .enumerate()
        .map(|(i, ((name, level), tips))| LifeIndex {
            name,
            level,
            tips,
            stars: STAR.repeat(stars.get(i).map_or(0, |s| s.matches("active").count())),
        })
        .collect()
}
