//! Feature engineering for the load forecasters
//!
//! Power and weather are left-joined on the power timeline, then calendar,
//! lag and trailing-mean features are derived. Only rows where every field
//! is defined survive, so a single missing hour of load also removes every
//! later hour whose lags or windows reach back to it.

use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::domain::{timestamp_format, PowerFrame, WeatherFrame, WeatherReading};

/// Lags, in hours, applied to `load`.
pub const LAG_HOURS: [i64; 3] = [1, 2, 24];

/// Trailing window lengths, in hours, for the load means.
pub const ROLLING_WINDOWS: [usize; 2] = [3, 24];

/// Exogenous feature columns in model input order.
pub const FEATURE_NAMES: [&str; 11] = [
    "temp_c",
    "rel_humidity",
    "wind_speed",
    "hour",
    "dow",
    "is_weekend",
    "lag_1h",
    "lag_2h",
    "lag_24h",
    "roll_mean_3h",
    "roll_mean_24h",
];

/// A fully defined supervised-learning row. Field order is the CSV column
/// order: index, `load`, then the features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    #[serde(rename = "datetime", with = "timestamp_format")]
    pub timestamp: NaiveDateTime,
    pub load: f64,
    pub temp_c: f64,
    pub rel_humidity: f64,
    pub wind_speed: f64,
    /// Hour of day (0-23)
    pub hour: u32,
    /// Day of week (0=Monday, 6=Sunday)
    pub dow: u32,
    pub is_weekend: u8,
    pub lag_1h: f64,
    pub lag_2h: f64,
    pub lag_24h: f64,
    pub roll_mean_3h: f64,
    pub roll_mean_24h: f64,
}

impl FeatureRow {
    /// Exogenous features in [`FEATURE_NAMES`] order.
    pub fn features(&self) -> [f64; 11] {
        [
            self.temp_c,
            self.rel_humidity,
            self.wind_speed,
            f64::from(self.hour),
            f64::from(self.dow),
            f64::from(self.is_weekend),
            self.lag_1h,
            self.lag_2h,
            self.lag_24h,
            self.roll_mean_3h,
            self.roll_mean_24h,
        ]
    }
}

/// A joined row before the completeness filter.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRow {
    pub timestamp: NaiveDateTime,
    pub load: Option<f64>,
    pub weather: WeatherReading,
    pub hour: u32,
    pub dow: u32,
    pub is_weekend: u8,
    pub lags: [Option<f64>; 3],
    pub rolling: [Option<f64>; 2],
}

impl CandidateRow {
    /// The row with every field defined, or `None` if anything is missing.
    pub fn complete(&self) -> Option<FeatureRow> {
        let [temp_c, rel_humidity, wind_speed] = self.weather;
        let [lag_1h, lag_2h, lag_24h] = self.lags;
        let [roll_mean_3h, roll_mean_24h] = self.rolling;

        Some(FeatureRow {
            timestamp: self.timestamp,
            load: self.load?,
            temp_c: temp_c?,
            rel_humidity: rel_humidity?,
            wind_speed: wind_speed?,
            hour: self.hour,
            dow: self.dow,
            is_weekend: self.is_weekend,
            lag_1h: lag_1h?,
            lag_2h: lag_2h?,
            lag_24h: lag_24h?,
            roll_mean_3h: roll_mean_3h?,
            roll_mean_24h: roll_mean_24h?,
        })
    }
}

/// Calendar features: (hour, day of week, weekend flag).
pub fn calendar_features(ts: NaiveDateTime) -> (u32, u32, u8) {
    let dow = ts.weekday().num_days_from_monday();
    (ts.hour(), dow, u8::from(dow >= 5))
}

/// Value exactly `hours` earlier on the timeline, undefined when that hour
/// is absent or itself undefined.
pub fn lag_by_hours(
    index: &[NaiveDateTime],
    values: &[Option<f64>],
    hours: i64,
) -> Vec<Option<f64>> {
    let by_time = lookup(index, values);
    index
        .iter()
        .map(|ts| {
            by_time
                .get(&(*ts - Duration::hours(hours)))
                .copied()
                .flatten()
        })
        .collect()
}

/// Mean over the trailing `window` hours ending at and including each row.
/// Defined only when all `window` hours exist and are defined.
pub fn trailing_mean(
    index: &[NaiveDateTime],
    values: &[Option<f64>],
    window: usize,
) -> Vec<Option<f64>> {
    let by_time = lookup(index, values);
    index
        .iter()
        .map(|ts| {
            if window == 0 {
                return None;
            }
            let mut sum = 0.0;
            // Oldest first, so the sum order is the chronological order.
            for back in (0..window as i64).rev() {
                sum += by_time.get(&(*ts - Duration::hours(back))).copied().flatten()?;
            }
            Some(sum / window as f64)
        })
        .collect()
}

fn lookup(index: &[NaiveDateTime], values: &[Option<f64>]) -> HashMap<NaiveDateTime, Option<f64>> {
    index.iter().copied().zip(values.iter().copied()).collect()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureBuilder;

impl FeatureBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Joined rows with every derived field, before dropping incomplete ones.
    pub fn candidates(&self, power: &PowerFrame, weather: &WeatherFrame) -> Vec<CandidateRow> {
        let index = power.index();
        let load = power.load();
        let readings = weather.readings();

        let lags: Vec<Vec<Option<f64>>> = LAG_HOURS
            .iter()
            .map(|&h| lag_by_hours(index, load, h))
            .collect();
        let rolling: Vec<Vec<Option<f64>>> = ROLLING_WINDOWS
            .iter()
            .map(|&w| trailing_mean(index, load, w))
            .collect();

        index
            .iter()
            .enumerate()
            .map(|(i, &timestamp)| {
                let (hour, dow, is_weekend) = calendar_features(timestamp);
                CandidateRow {
                    timestamp,
                    load: load[i],
                    weather: readings.get(&timestamp).copied().unwrap_or([None; 3]),
                    hour,
                    dow,
                    is_weekend,
                    lags: [lags[0][i], lags[1][i], lags[2][i]],
                    rolling: [rolling[0][i], rolling[1][i]],
                }
            })
            .collect()
    }

    /// Join, derive and keep only fully defined rows.
    pub fn build(&self, power: &PowerFrame, weather: &WeatherFrame) -> Vec<FeatureRow> {
        let candidates = self.candidates(power, weather);
        let rows: Vec<FeatureRow> = candidates.iter().filter_map(CandidateRow::complete).collect();

        let matched_weather = candidates
            .iter()
            .filter(|c| c.weather.iter().any(Option::is_some))
            .count();
        debug!(
            power_hours = power.len(),
            weather_hours = weather.len(),
            matched_weather,
            "joined power and weather"
        );
        info!(
            candidates = candidates.len(),
            retained = rows.len(),
            dropped = candidates.len() - rows.len(),
            "feature rows built"
        );
        rows
    }
}
