//! Minute-to-hour resampling.
//!
//! Readings are bucketed by truncating their timestamp to the hour and every
//! defined value in a bucket is averaged per column. The output covers the
//! complete hourly calendar from the first to the last populated bucket: an
//! hour with no source rows becomes a row whose fields are all undefined,
//! so gaps stay visible to the lag and rolling-window features downstream.

use chrono::{Duration, NaiveDateTime};
use std::collections::BTreeMap;
use tracing::debug;

use crate::domain::{floor_to_hour, HourlySeries, RawTable, SeriesError};

#[derive(Debug, Clone, Copy, Default)]
pub struct Resampler;

#[derive(Debug, Clone)]
struct Bucket {
    sums: Vec<f64>,
    counts: Vec<usize>,
}

impl Bucket {
    fn new(width: usize) -> Self {
        Self {
            sums: vec![0.0; width],
            counts: vec![0; width],
        }
    }

    fn add(&mut self, values: &[Option<f64>]) {
        for (col, value) in values.iter().enumerate().take(self.sums.len()) {
            if let Some(v) = value.filter(|v| v.is_finite()) {
                self.sums[col] += v;
                self.counts[col] += 1;
            }
        }
    }

    fn means(&self) -> Vec<Option<f64>> {
        self.sums
            .iter()
            .zip(&self.counts)
            .map(|(sum, &count)| (count > 0).then(|| sum / count as f64))
            .collect()
    }
}

impl Resampler {
    pub fn new() -> Self {
        Self
    }

    /// Average raw readings into one row per calendar hour.
    pub fn resample(&self, raw: &RawTable) -> Result<HourlySeries, SeriesError> {
        let width = raw.columns.len();

        // Stable sort keeps equal timestamps in source order so summation
        // order, and therefore every bit of the mean, is reproducible.
        let mut order: Vec<usize> = (0..raw.records.len()).collect();
        order.sort_by_key(|&i| raw.records[i].0);

        let mut buckets: BTreeMap<NaiveDateTime, Bucket> = BTreeMap::new();
        for i in order {
            let (ts, values) = &raw.records[i];
            buckets
                .entry(floor_to_hour(*ts))
                .or_insert_with(|| Bucket::new(width))
                .add(values);
        }

        let (Some(&first), Some(&last)) = (buckets.keys().next(), buckets.keys().next_back())
        else {
            return Ok(HourlySeries::empty(raw.columns.clone()));
        };

        let mut index = Vec::new();
        let mut rows = Vec::new();
        let mut ts = first;
        let mut empty_hours = 0usize;
        while ts <= last {
            match buckets.get(&ts) {
                Some(bucket) => rows.push(bucket.means()),
                None => {
                    empty_hours += 1;
                    rows.push(vec![None; width]);
                }
            }
            index.push(ts);
            ts += Duration::hours(1);
        }

        debug!(
            raw_rows = raw.len(),
            hours = index.len(),
            empty_hours,
            "resampled to hourly"
        );
        HourlySeries::new(raw.columns.clone(), index, rows)
    }
}
