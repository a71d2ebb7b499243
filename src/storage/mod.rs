//! On-disk caches and result exports.
//!
//! Every write lands in a temp file inside the destination directory and is
//! renamed into place, so a reader never sees a half-written CSV.

pub mod cache;
pub mod export;

pub use cache::{CsvSeriesCache, SeriesCache};
pub use export::{read_features, write_features, write_metrics, write_predictions};

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::domain::SeriesError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{path} line {line}: {message}")]
    Corrupt {
        path: PathBuf,
        line: u64,
        message: String,
    },

    #[error("{path} does not hold an hourly series: {source}")]
    Series {
        path: PathBuf,
        #[source]
        source: SeriesError,
    },
}

impl CacheError {
    pub(crate) fn io(path: &Path) -> impl FnOnce(io::Error) -> CacheError + '_ {
        move |source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn csv(path: &Path) -> impl FnOnce(csv::Error) -> CacheError + '_ {
        move |source| CacheError::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Write a CSV through a temp file in the destination directory and rename
/// it over `path`.
pub(crate) fn write_csv_atomically<F>(path: &Path, write: F) -> Result<(), CacheError>
where
    F: FnOnce(&mut csv::Writer<&mut File>) -> Result<(), csv::Error>,
{
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(CacheError::io(dir))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(CacheError::io(path))?;
    {
        let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
        write(&mut writer).map_err(CacheError::csv(path))?;
        writer.flush().map_err(CacheError::io(path))?;
    }
    tmp.as_file_mut().flush().map_err(CacheError::io(path))?;
    tmp.persist(path).map_err(|e| CacheError::io(path)(e.error))?;
    Ok(())
}
