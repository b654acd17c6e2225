//! Per-read time fields: the server wall-clock string and its sexagenary
//! (干支) rendering.
//!
//! Both are computed in China Standard Time. The sexagenary year turns at
//! 立春 and months turn at the twelve "节" solar terms. Terms are located from
//! the sun's apparent ecliptic longitude (low-precision solar coordinates,
//! good to about 0.01°, i.e. a quarter hour of term time).

use std::f64::consts::PI;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Timelike, Utc};

const STEMS: [&str; 10] = ["甲", "乙", "丙", "丁", "戊", "己", "庚", "辛", "壬", "癸"];
const BRANCHES: [&str; 12] = [
    "子", "丑", "寅", "卯", "辰", "巳", "午", "未", "申", "酉", "戌", "亥",
];
const ANIMALS: [&str; 12] = [
    "鼠", "牛", "虎", "兔", "龙", "蛇", "马", "羊", "猴", "鸡", "狗", "猪",
];

/// Solar longitude of 立春, the first "节"; the others follow every 30°.
const LICHUN_LONGITUDE: f64 = 315.0;

const UNIX_EPOCH_JD: f64 = 2_440_587.5;
const J2000_JD: f64 = 2_451_545.0;

/// 2000-01-01 is 戊午, index 54 of the sixty-day cycle.
const DAY_CYCLE_EPOCH: (i32, u32, u32) = (2000, 1, 1);
const DAY_CYCLE_OFFSET: i64 = 54;

const CST_OFFSET_SECS: i32 = 8 * 3600;

/// Source of the current wall-clock time.
pub trait WallClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl WallClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub(crate) fn china_time(now: DateTime<Utc>) -> DateTime<FixedOffset> {
    match FixedOffset::east_opt(CST_OFFSET_SECS) {
        Some(offset) => now.with_timezone(&offset),
        None => now.fixed_offset(),
    }
}

fn julian_day(now: DateTime<Utc>) -> f64 {
    now.timestamp() as f64 / 86_400.0 + UNIX_EPOCH_JD
}

/// Apparent geocentric longitude of the sun in degrees, `[0, 360)`.
fn solar_longitude(now: DateTime<Utc>) -> f64 {
    let t = (julian_day(now) - J2000_JD) / 36_525.0;
    let rad = PI / 180.0;

    let mean_longitude = 280.46646 + 36_000.76983 * t + 0.0003032 * t * t;
    let anomaly = (357.52911 + 35_999.05029 * t - 0.0001537 * t * t) * rad;
    let centre = (1.914602 - 0.004817 * t - 0.000014 * t * t) * anomaly.sin()
        + (0.019993 - 0.000101 * t) * (2.0 * anomaly).sin()
        + 0.000289 * (3.0 * anomaly).sin();
    let node = (125.04 - 1934.136 * t) * rad;

    (mean_longitude + centre - 0.00569 - 0.00478 * node.sin()).rem_euclid(360.0)
}

/// Months since the last 立春: 0 is the 寅 month, 11 the 丑 month.
fn solar_month(now: DateTime<Utc>) -> i64 {
    ((solar_longitude(now) - LICHUN_LONGITUDE).rem_euclid(360.0) / 30.0) as i64 % 12
}

fn pillar(stem: i64, branch: i64) -> String {
    format!(
        "{}{}",
        STEMS[stem.rem_euclid(10) as usize],
        BRANCHES[branch.rem_euclid(12) as usize]
    )
}

/// `YYYY-MM-DD HH:MM:SS` in China Standard Time.
pub fn server_time(now: DateTime<Utc>) -> String {
    china_time(now).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// e.g. `己卯年(兔) 丙子月 戊午日 戊午时`.
pub fn lunar_string(now: DateTime<Utc>) -> String {
    let local = china_time(now);
    let month_offset = solar_month(now);

    // Early in the Gregorian year, the 子 and 丑 months still belong to the
    // previous solar year.
    let solar_year = if local.month() <= 2 && month_offset >= 10 {
        local.year() - 1
    } else {
        local.year()
    };
    let year_index = i64::from(solar_year - 4).rem_euclid(60);
    let year_stem = year_index % 10;
    let year_branch = year_index % 12;

    let month_branch = (month_offset + 2) % 12;
    // 寅 month stem follows the year stem: 甲/己 → 丙寅, 乙/庚 → 戊寅 ...
    let first_month_stem = (year_stem % 5) * 2 + 2;
    let month_stem = first_month_stem + month_offset;

    let (ey, em, ed) = DAY_CYCLE_EPOCH;
    let elapsed = NaiveDate::from_ymd_opt(ey, em, ed)
        .map(|epoch| (local.date_naive() - epoch).num_days())
        .unwrap_or(0);
    let day_index = (DAY_CYCLE_OFFSET + elapsed).rem_euclid(60);
    let day_stem = day_index % 10;

    let hour_branch = i64::from((local.hour() + 1) / 2) % 12;
    let hour_stem = (day_stem % 5) * 2 + hour_branch;

    format!(
        "{}年({}) {}月 {}日 {}时",
        pillar(year_stem, year_branch),
        ANIMALS[year_branch as usize],
        pillar(month_stem, month_branch),
        pillar(day_index, day_index),
        pillar(hour_stem, hour_branch)
    )
}
