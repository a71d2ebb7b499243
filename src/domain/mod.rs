pub mod frames;
pub mod series;

pub use frames::*;
pub use series::{
    floor_to_hour, format_timestamp, is_on_hour, parse_timestamp, timestamp_format,
    validate_hourly_index, HourlySeries, RawTable, SeriesError, INDEX_COLUMN, TIMESTAMP_FORMAT,
};
