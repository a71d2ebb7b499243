//! Raw power acquisition: archive download, text parsing and hourly
//! resampling.

pub mod archive;
pub mod http;
pub mod raw;
pub mod resample;

pub use archive::{extract_text_member, ArchiveFetcher};
pub use http::{retrying_client, FetchError};
pub use raw::{coerce_numeric, parse_raw_power, read_raw_power, RawPowerTable};
pub use resample::Resampler;

use std::path::PathBuf;
use thiserror::Error;

use crate::domain::SeriesError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed delimited input: {0}")]
    Csv(#[from] csv::Error),

    #[error("raw file has no '{0}' column")]
    MissingColumn(String),

    #[error("archive contains no .txt member")]
    NoTextMember,

    #[error("invalid archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Series(#[from] SeriesError),
}

impl IngestError {
    /// Only network failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::Fetch(e) if e.is_retryable())
    }
}
