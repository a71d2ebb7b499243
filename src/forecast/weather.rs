//! Historical hourly weather (Meteostat point data)
//!
//! The provider is queried in bounded date chunks and the result is mapped
//! onto the canonical weather fields. [`WeatherAligner`] wraps a source and a
//! cache: a cached frame covering the requested span is returned verbatim,
//! otherwise the source is fetched, aligned and written through to the cache.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveTime};
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use strum::IntoEnumIterator;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::WeatherConfig;
use crate::domain::{
    is_on_hour, parse_timestamp, HourlySeries, RawTable, SeriesError, WeatherField, WeatherFrame,
};
use crate::ingest::http::{get_bytes, retrying_client, FetchError};
use crate::storage::{CacheError, SeriesCache};

/// Upstream source of hourly weather observations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Hourly observations for every day in `[start, end]`, with
    /// provider-specific column names.
    async fn fetch_hourly(&self, start: NaiveDate, end: NaiveDate) -> Result<RawTable, FetchError>;
}

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("weather series is not hourly: {0}")]
    Series(#[from] SeriesError),
}

impl WeatherError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, WeatherError::Fetch(e) if e.is_retryable())
    }
}

/// Meteostat point/hourly client.
pub struct MeteostatClient {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: Option<String>,
    latitude: f64,
    longitude: f64,
    chunk_days: u32,
}

impl MeteostatClient {
    pub fn new(cfg: &WeatherConfig) -> Result<Self, FetchError> {
        Ok(Self {
            client: retrying_client(cfg.timeout(), cfg.max_retries)?,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone().filter(|k| !k.is_empty()),
            latitude: cfg.latitude,
            longitude: cfg.longitude,
            chunk_days: cfg.chunk_days.max(1),
        })
    }

    fn url(&self, start: NaiveDate, end: NaiveDate) -> String {
        format!(
            "{}/point/hourly?lat={}&lon={}&start={}&end={}",
            self.base_url,
            self.latitude,
            self.longitude,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        )
    }

    async fn fetch_chunk(&self, start: NaiveDate, end: NaiveDate) -> Result<RawTable, FetchError> {
        let url = self.url(start, end);
        let headers: Vec<(&str, &str)> = self
            .api_key
            .as_deref()
            .map(|key| vec![("x-rapidapi-key", key)])
            .unwrap_or_default();

        let body = get_bytes(&self.client, &url, &headers).await?;
        decode_hourly(&body).map_err(|message| FetchError::Decode { url, message })
    }
}

#[async_trait]
impl WeatherSource for MeteostatClient {
    async fn fetch_hourly(&self, start: NaiveDate, end: NaiveDate) -> Result<RawTable, FetchError> {
        let spans = date_chunks(start, end, self.chunk_days);
        info!(
            %start,
            %end,
            chunks = spans.len(),
            lat = self.latitude,
            lon = self.longitude,
            "fetching hourly weather"
        );

        let mut tables = Vec::with_capacity(spans.len());
        for (from, to) in spans {
            let table = self.fetch_chunk(from, to).await?;
            debug!(%from, %to, rows = table.len(), "weather chunk fetched");
            tables.push(table);
        }
        Ok(concat_tables(tables))
    }
}

/// Split `[start, end]` into consecutive inclusive spans of at most
/// `chunk_days` days.
pub fn date_chunks(start: NaiveDate, end: NaiveDate, chunk_days: u32) -> Vec<(NaiveDate, NaiveDate)> {
    let step = i64::from(chunk_days.max(1));
    let mut spans = Vec::new();
    let mut from = start;
    while from <= end {
        let to = (from + Duration::days(step - 1)).min(end);
        spans.push((from, to));
        from = to + Duration::days(1);
    }
    spans
}

#[derive(Debug, Deserialize)]
struct HourlyResponse {
    #[serde(default)]
    data: Vec<serde_json::Map<String, Value>>,
}

/// Decode a `{"data": [{"time": ..., <field>: <number|null>, ...}]}` body.
/// Rows with an unreadable `time` are skipped; non-numeric values are
/// undefined.
fn decode_hourly(body: &[u8]) -> Result<RawTable, String> {
    let response: HourlyResponse = serde_json::from_slice(body).map_err(|e| e.to_string())?;

    let mut columns: Vec<String> = Vec::new();
    for record in &response.data {
        for key in record.keys() {
            if key != "time" && !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }
    columns.sort();

    let mut table = RawTable::new(columns);
    let mut skipped = 0usize;
    for record in &response.data {
        let Some(ts) = record.get("time").and_then(Value::as_str).and_then(parse_timestamp) else {
            skipped += 1;
            continue;
        };
        let values = table
            .columns
            .iter()
            .map(|c| record.get(c).and_then(Value::as_f64).filter(|v| v.is_finite()))
            .collect();
        table.records.push((ts, values));
    }
    if skipped > 0 {
        warn!(skipped, "weather rows without a readable time");
    }
    Ok(table)
}

fn concat_tables(tables: Vec<RawTable>) -> RawTable {
    let mut columns: Vec<String> = Vec::new();
    for table in &tables {
        for c in &table.columns {
            if !columns.contains(c) {
                columns.push(c.clone());
            }
        }
    }

    let mut out = RawTable::new(columns);
    for table in tables {
        let positions: Vec<usize> = table
            .columns
            .iter()
            .filter_map(|c| out.columns.iter().position(|o| o == c))
            .collect();
        for (ts, values) in table.records {
            let mut row = vec![None; out.columns.len()];
            for (pos, value) in positions.iter().zip(values) {
                row[*pos] = value;
            }
            out.records.push((ts, row));
        }
    }
    out
}

/// Map provider columns onto canonical weather fields and shape the rows
/// into an hourly series.
///
/// Only fields present upstream are kept, in canonical order. Rows are sorted
/// by time; off-hour timestamps are dropped and duplicates keep their first
/// occurrence.
pub fn align(raw: &RawTable) -> Result<WeatherFrame, SeriesError> {
    let mut sources: HashMap<WeatherField, usize> = HashMap::new();
    for (pos, name) in raw.columns.iter().enumerate() {
        if let Some(field) = WeatherField::from_provider_name(name) {
            sources.entry(field).or_insert(pos);
        }
    }
    let fields: Vec<WeatherField> = WeatherField::iter().filter(|f| sources.contains_key(f)).collect();
    if fields.is_empty() {
        warn!(columns = ?raw.columns, "no recognised weather fields");
    }

    let mut records: Vec<_> = raw.records.iter().collect();
    records.sort_by_key(|(ts, _)| *ts);

    let mut index = Vec::with_capacity(records.len());
    let mut rows = Vec::with_capacity(records.len());
    let (mut off_hour, mut duplicates) = (0usize, 0usize);
    for (ts, values) in records {
        if !is_on_hour(*ts) {
            off_hour += 1;
            continue;
        }
        if index.last() == Some(ts) {
            duplicates += 1;
            continue;
        }
        index.push(*ts);
        rows.push(
            fields
                .iter()
                .map(|f| {
                    values
                        .get(sources[f])
                        .copied()
                        .flatten()
                        .filter(|v| v.is_finite())
                })
                .collect(),
        );
    }
    if off_hour > 0 || duplicates > 0 {
        warn!(off_hour, duplicates, "weather rows dropped during alignment");
    }

    let columns = fields.iter().map(ToString::to_string).collect();
    let frame = WeatherFrame::new(HourlySeries::new(columns, index, rows)?)?;
    debug!(rows = frame.len(), fields = ?frame.fields(), "weather aligned");
    Ok(frame)
}

/// True when `series` spans every hour from `start` 00:00 to `end` 23:00.
fn covers_span(series: &HourlySeries, start: NaiveDate, end: NaiveDate) -> bool {
    let (Some(first), Some(last)) = (series.first_timestamp(), series.last_timestamp()) else {
        return false;
    };
    let from = start.and_time(NaiveTime::MIN);
    let to = end.and_time(NaiveTime::MIN) + Duration::hours(23);
    first <= from && last >= to
}

/// Cache-aside weather loading.
pub struct WeatherAligner<S, C> {
    source: S,
    cache: C,
    use_cache: bool,
}

impl<S: WeatherSource, C: SeriesCache> WeatherAligner<S, C> {
    pub fn new(source: S, cache: C) -> Self {
        Self {
            source,
            cache,
            use_cache: true,
        }
    }

    /// With `use_cache = false` the lookup is skipped; the fetched frame is
    /// still written through.
    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub async fn load(&self, start: NaiveDate, end: NaiveDate) -> Result<WeatherFrame, WeatherError> {
        if self.use_cache {
            match self.cache.lookup()? {
                Some(series) if covers_span(&series, start, end) => {
                    info!(rows = series.len(), "weather loaded from cache");
                    return Ok(WeatherFrame::new(series)?);
                }
                Some(series) => info!(
                    cached_first = ?series.first_timestamp(),
                    cached_last = ?series.last_timestamp(),
                    %start,
                    %end,
                    "cached weather does not cover the requested span"
                ),
                None => {}
            }
        }

        let raw = self.source.fetch_hourly(start, end).await?;
        let frame = align(&raw)?;
        self.cache.populate(frame.series())?;
        info!(rows = frame.len(), fields = ?frame.fields(), "weather fetched and cached");
        Ok(frame)
    }
}
