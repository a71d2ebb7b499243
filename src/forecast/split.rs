//! Chronological train/test partition.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::info;

use super::features::FeatureRow;
use crate::domain::{format_timestamp, timestamp_format};

/// Inclusive time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    #[serde(with = "timestamp_format")]
    pub start: NaiveDateTime,
    #[serde(with = "timestamp_format")]
    pub end: NaiveDateTime,
}

impl Window {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.start <= ts && ts <= self.end
    }

    pub fn overlaps(&self, other: &Window) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}]",
            format_timestamp(self.start),
            format_timestamp(self.end)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Partition {
    #[strum(serialize = "train")]
    Train,
    #[strum(serialize = "test")]
    Test,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SplitError {
    #[error("{partition} window {window} starts after it ends")]
    InvertedWindow { partition: Partition, window: Window },

    #[error("train window {train} overlaps test window {test}")]
    Overlap { train: Window, test: Window },

    #[error("{partition} window {window} matches none of the {available} feature rows")]
    EmptySplit {
        partition: Partition,
        window: Window,
        available: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainTestSplit {
    pub train: Vec<FeatureRow>,
    pub test: Vec<FeatureRow>,
}

#[derive(Debug, Clone, Copy)]
pub struct Splitter {
    train: Window,
    test: Window,
}

impl Splitter {
    pub fn new(train: Window, test: Window) -> Result<Self, SplitError> {
        for (partition, window) in [(Partition::Train, train), (Partition::Test, test)] {
            if window.start > window.end {
                return Err(SplitError::InvertedWindow { partition, window });
            }
        }
        if train.overlaps(&test) {
            return Err(SplitError::Overlap { train, test });
        }
        Ok(Self { train, test })
    }

    pub fn train_window(&self) -> Window {
        self.train
    }

    pub fn test_window(&self) -> Window {
        self.test
    }

    /// Select rows by timestamp. Order is preserved; rows outside both
    /// windows are discarded.
    pub fn split(&self, rows: &[FeatureRow]) -> Result<TrainTestSplit, SplitError> {
        let select = |window: Window| -> Vec<FeatureRow> {
            rows.iter()
                .filter(|row| window.contains(row.timestamp))
                .cloned()
                .collect()
        };

        let train = select(self.train);
        let test = select(self.test);

        for (partition, window, selected) in [
            (Partition::Train, self.train, &train),
            (Partition::Test, self.test, &test),
        ] {
            if selected.is_empty() {
                return Err(SplitError::EmptySplit {
                    partition,
                    window,
                    available: rows.len(),
                });
            }
        }

        info!(
            train_rows = train.len(),
            test_rows = test.len(),
            discarded = rows.len() - train.len() - test.len(),
            "feature rows split"
        );
        Ok(TrainTestSplit { train, test })
    }
}

/// One-shot form of [`Splitter::split`].
pub fn split(rows: &[FeatureRow], train: Window, test: Window) -> Result<TrainTestSplit, SplitError> {
    Splitter::new(train, test)?.split(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::features::calendar_features;
    use chrono::{Duration, NaiveDate};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn ymd_hms(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    fn row(timestamp: NaiveDateTime) -> FeatureRow {
        let (hour, dow, is_weekend) = calendar_features(timestamp);
        FeatureRow {
            timestamp,
            load: 1.0,
            temp_c: 10.0,
            rel_humidity: 70.0,
            wind_speed: 2.0,
            hour,
            dow,
            is_weekend,
            lag_1h: 1.0,
            lag_2h: 1.0,
            lag_24h: 1.0,
            roll_mean_3h: 1.0,
            roll_mean_24h: 1.0,
        }
    }

    fn default_windows() -> (Window, Window) {
        (
            Window::new(ymd_hms(2006, 1, 1, 0, 0, 0), ymd_hms(2009, 12, 31, 23, 59, 59)),
            Window::new(ymd_hms(2010, 1, 1, 0, 0, 0), ymd_hms(2010, 12, 31, 23, 59, 59)),
        )
    }

    #[test]
    fn test_five_years_split_without_overlap() {
        // Every sixth hour from late 2006 to the end of 2010.
        let start = ymd_hms(2006, 12, 16, 17, 0, 0);
        let end = ymd_hms(2010, 12, 31, 23, 0, 0);
        let rows: Vec<FeatureRow> = (0..)
            .map(|i| start + Duration::hours(6 * i))
            .take_while(|ts| *ts <= end)
            .map(row)
            .collect();

        let (train, test) = default_windows();
        let parts = split(&rows, train, test).unwrap();

        let train_ts: HashSet<_> = parts.train.iter().map(|r| r.timestamp).collect();
        let test_ts: HashSet<_> = parts.test.iter().map(|r| r.timestamp).collect();
        assert!(train_ts.is_disjoint(&test_ts));
        assert_eq!(parts.train.len() + parts.test.len(), rows.len());
        assert!(parts.train.iter().all(|r| r.timestamp.format("%Y").to_string() != "2010"));
        assert!(parts.test.iter().all(|r| r.timestamp.format("%Y").to_string() == "2010"));
        assert_eq!(parts.test.last().unwrap().timestamp, ymd_hms(2010, 12, 31, 23, 0, 0));
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let (train, test) = default_windows();
        let rows = vec![row(ymd_hms(2009, 12, 31, 23, 0, 0)), row(ymd_hms(2010, 1, 1, 0, 0, 0))];
        let parts = split(&rows, train, test).unwrap();
        assert_eq!(parts.train.len(), 1);
        assert_eq!(parts.test.len(), 1);
    }

    #[test]
    fn test_empty_test_window_is_an_error() {
        let (train, test) = default_windows();
        let rows = vec![row(ymd_hms(2007, 6, 1, 12, 0, 0))];
        let err = split(&rows, train, test).unwrap_err();
        assert!(matches!(
            err,
            SplitError::EmptySplit {
                partition: Partition::Test,
                available: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_rejects_overlapping_and_inverted_windows() {
        let (train, _) = default_windows();
        let overlapping = Window::new(ymd_hms(2009, 6, 1, 0, 0, 0), ymd_hms(2010, 6, 1, 0, 0, 0));
        assert!(matches!(
            Splitter::new(train, overlapping),
            Err(SplitError::Overlap { .. })
        ));

        let inverted = Window::new(ymd_hms(2011, 1, 1, 0, 0, 0), ymd_hms(2010, 1, 1, 0, 0, 0));
        assert!(matches!(
            Splitter::new(train, inverted),
            Err(SplitError::InvertedWindow {
                partition: Partition::Test,
                ..
            })
        ));
    }

    proptest! {
        #[test]
        fn prop_split_is_disjoint_and_ordered(
            offsets in proptest::collection::btree_set(0i64..2_000, 2..300),
            cut in 1i64..1_999,
            gap in 0i64..50,
        ) {
            let base = ymd_hms(2008, 1, 1, 0, 0, 0);
            let rows: Vec<FeatureRow> = offsets.iter().map(|o| row(base + Duration::hours(*o))).collect();
            let train = Window::new(base, base + Duration::hours(cut - 1));
            let test = Window::new(base + Duration::hours(cut + gap), base + Duration::hours(2_100));

            match split(&rows, train, test) {
                Ok(parts) => {
                    let outside = rows
                        .iter()
                        .filter(|r| !train.contains(r.timestamp) && !test.contains(r.timestamp))
                        .count();
                    prop_assert_eq!(parts.train.len() + parts.test.len() + outside, rows.len());
                    prop_assert!(parts.train.iter().all(|r| train.contains(r.timestamp)));
                    prop_assert!(parts.test.iter().all(|r| test.contains(r.timestamp)));
                    prop_assert!(parts.train.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
                    if let (Some(a), Some(b)) = (parts.train.last(), parts.test.first()) {
                        prop_assert!(a.timestamp < b.timestamp);
                    }
                }
                Err(SplitError::EmptySplit { .. }) => {}
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
        }
    }
}
