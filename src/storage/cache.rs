use std::path::{Path, PathBuf};
use tracing::debug;

use super::{write_csv_atomically, CacheError};
use crate::domain::{format_timestamp, parse_timestamp, HourlySeries, INDEX_COLUMN};

/// Cache-aside storage for one hourly series.
///
/// `lookup` returns `Ok(None)` on a miss; a present but unreadable entry is an
/// error, never a miss.
#[cfg_attr(test, mockall::automock)]
pub trait SeriesCache: Send + Sync {
    fn lookup(&self) -> Result<Option<HourlySeries>, CacheError>;

    fn populate(&self, series: &HourlySeries) -> Result<(), CacheError>;
}

/// Hourly series stored as `datetime,<columns...>`; an empty cell is an
/// undefined value.
#[derive(Debug, Clone)]
pub struct CsvSeriesCache {
    path: PathBuf,
}

impl CsvSeriesCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<HourlySeries, CacheError> {
        let path = self.path.as_path();
        let corrupt = |line: u64, message: String| CacheError::Corrupt {
            path: path.to_path_buf(),
            line,
            message,
        };

        let mut reader = csv::Reader::from_path(path).map_err(CacheError::csv(path))?;
        let headers = reader.headers().map_err(CacheError::csv(path))?.clone();
        match headers.get(0) {
            Some(INDEX_COLUMN) => {}
            other => {
                return Err(corrupt(
                    1,
                    format!("expected '{INDEX_COLUMN}' as first column, found {other:?}"),
                ))
            }
        }
        let columns: Vec<String> = headers.iter().skip(1).map(str::to_string).collect();

        let mut index = Vec::new();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(CacheError::csv(path))?;
            let line = record.position().map(|p| p.line()).unwrap_or(0);

            let raw_ts = record.get(0).unwrap_or_default();
            let ts = parse_timestamp(raw_ts)
                .ok_or_else(|| corrupt(line, format!("invalid timestamp '{raw_ts}'")))?;

            let values = record
                .iter()
                .skip(1)
                .map(|cell| {
                    let cell = cell.trim();
                    if cell.is_empty() {
                        return Ok(None);
                    }
                    cell.parse::<f64>()
                        .map(|v| v.is_finite().then_some(v))
                        .map_err(|_| corrupt(line, format!("invalid number '{cell}'")))
                })
                .collect::<Result<Vec<_>, _>>()?;

            index.push(ts);
            rows.push(values);
        }

        HourlySeries::new(columns, index, rows).map_err(|source| CacheError::Series {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl SeriesCache for CsvSeriesCache {
    fn lookup(&self) -> Result<Option<HourlySeries>, CacheError> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "cache miss");
            return Ok(None);
        }
        let series = self.read()?;
        debug!(path = %self.path.display(), rows = series.len(), "cache hit");
        Ok(Some(series))
    }

    fn populate(&self, series: &HourlySeries) -> Result<(), CacheError> {
        write_csv_atomically(&self.path, |w| {
            let mut header = vec![INDEX_COLUMN.to_string()];
            header.extend(series.columns().iter().cloned());
            w.write_record(&header)?;

            for (ts, values) in series.iter() {
                let mut record = Vec::with_capacity(values.len() + 1);
                record.push(format_timestamp(ts));
                record.extend(values.iter().map(|v| v.map(|x| x.to_string()).unwrap_or_default()));
                w.write_record(&record)?;
            }
            Ok(())
        })?;
        debug!(path = %self.path.display(), rows = series.len(), "cache populated");
        Ok(())
    }
}
