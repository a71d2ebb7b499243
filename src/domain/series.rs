//! Hourly time-indexed series
//!
//! An [`HourlySeries`] holds one row per calendar hour with a strictly
//! increasing index. Values are `Option<f64>`; `None` marks an undefined
//! observation (missing marker, unparseable text or an empty hour bucket).

use chrono::{Duration, NaiveDateTime, Timelike};
use thiserror::Error;

/// Rendering used for every timestamp written to or read from CSV.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Name of the index column in every CSV the pipeline writes.
pub const INDEX_COLUMN: &str = "datetime";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeriesError {
    #[error("timestamp {at} is not on the hour")]
    NotOnHour { at: NaiveDateTime },

    #[error("index is not strictly increasing: {at} follows {previous}")]
    NotIncreasing {
        previous: NaiveDateTime,
        at: NaiveDateTime,
    },

    #[error("index has {index} timestamps but {rows} rows")]
    LengthMismatch { index: usize, rows: usize },

    #[error("row {row} has {got} values, expected {expected}")]
    RowWidth {
        row: usize,
        got: usize,
        expected: usize,
    },

    #[error("unknown column '{0}'")]
    UnknownColumn(String),
}

/// Loosely shaped table as it comes out of a source: named numeric columns,
/// timestamps in any order, possibly off the hour or duplicated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub records: Vec<(NaiveDateTime, Vec<Option<f64>>)>,
}

impl RawTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Time-indexed numeric table with exactly one row per hour.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlySeries {
    columns: Vec<String>,
    index: Vec<NaiveDateTime>,
    rows: Vec<Vec<Option<f64>>>,
}

impl HourlySeries {
    /// Build a series, enforcing the hourly invariant.
    pub fn new(
        columns: Vec<String>,
        index: Vec<NaiveDateTime>,
        rows: Vec<Vec<Option<f64>>>,
    ) -> Result<Self, SeriesError> {
        if index.len() != rows.len() {
            return Err(SeriesError::LengthMismatch {
                index: index.len(),
                rows: rows.len(),
            });
        }
        if let Some((row, values)) = rows
            .iter()
            .enumerate()
            .find(|(_, values)| values.len() != columns.len())
        {
            return Err(SeriesError::RowWidth {
                row,
                got: values.len(),
                expected: columns.len(),
            });
        }
        validate_hourly_index(&index)?;

        Ok(Self {
            columns,
            index,
            rows,
        })
    }

    pub fn empty(columns: Vec<String>) -> Self {
        Self {
            columns,
            index: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn rows(&self) -> &[Vec<Option<f64>>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.index.first().copied()
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.index.last().copied()
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Values of a single column in index order.
    pub fn column(&self, name: &str) -> Result<Vec<Option<f64>>, SeriesError> {
        let pos = self
            .column_position(name)
            .ok_or_else(|| SeriesError::UnknownColumn(name.to_string()))?;
        Ok(self.rows.iter().map(|row| row[pos]).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDateTime, &[Option<f64>])> + '_ {
        self.index
            .iter()
            .copied()
            .zip(self.rows.iter().map(Vec::as_slice))
    }
}

/// Check that every timestamp is on the hour and the index strictly increases.
pub fn validate_hourly_index(index: &[NaiveDateTime]) -> Result<(), SeriesError> {
    if let Some(&at) = index.iter().find(|ts| !is_on_hour(**ts)) {
        return Err(SeriesError::NotOnHour { at });
    }
    if let Some(pair) = index.windows(2).find(|pair| pair[1] <= pair[0]) {
        return Err(SeriesError::NotIncreasing {
            previous: pair[0],
            at: pair[1],
        });
    }
    Ok(())
}

pub fn is_on_hour(ts: NaiveDateTime) -> bool {
    ts.minute() == 0 && ts.second() == 0 && ts.nanosecond() == 0
}

/// Truncate a timestamp to the start of its containing hour.
pub fn floor_to_hour(ts: NaiveDateTime) -> NaiveDateTime {
    ts - Duration::seconds(i64::from(ts.minute() * 60 + ts.second()))
        - Duration::nanoseconds(i64::from(ts.nanosecond()))
}

/// Parse a CSV timestamp, accepting both the space and the ISO `T` separator.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Serde adapter writing timestamps as `YYYY-MM-DD HH:MM:SS`.
pub mod timestamp_format {
    use chrono::NaiveDateTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_timestamp(*ts))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        super::parse_timestamp(&text)
            .ok_or_else(|| de::Error::custom(format!("invalid timestamp '{text}'")))
    }
}
