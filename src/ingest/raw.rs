//! Reader for the raw minute-level household power text file.
//!
//! The file is semicolon delimited with a header row. `Date` (day first) and
//! `Time` combine into the row timestamp; every other column is treated as a
//! numeric measurement. Bytes are decoded lossily so stray non-UTF-8 bytes
//! never abort a read.

use chrono::NaiveDateTime;
use csv::{ByteRecord, ReaderBuilder};
use std::borrow::Cow;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

use super::IngestError;
use crate::domain::RawTable;

const DATE_COLUMN: &str = "Date";
const TIME_COLUMN: &str = "Time";
const MISSING_MARKER: &str = "?";

/// Parsed raw readings plus a count of rows dropped for bad timestamps.
#[derive(Debug, Clone, Default)]
pub struct RawPowerTable {
    pub table: RawTable,
    pub skipped_rows: usize,
}

pub fn read_raw_power(path: &Path) -> Result<RawPowerTable, IngestError> {
    let file = File::open(path).map_err(|source| IngestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), "reading raw power file");
    parse_raw_power(file)
}

pub fn parse_raw_power<R: Read>(reader: R) -> Result<RawPowerTable, IngestError> {
    let mut csv = ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = csv
        .byte_headers()?
        .iter()
        .map(|field| decode(field).trim().to_string())
        .collect();

    let date_idx = headers
        .iter()
        .position(|h| h == DATE_COLUMN)
        .ok_or_else(|| IngestError::MissingColumn(DATE_COLUMN.to_string()))?;
    let time_idx = headers
        .iter()
        .position(|h| h == TIME_COLUMN)
        .ok_or_else(|| IngestError::MissingColumn(TIME_COLUMN.to_string()))?;

    let measurement_idx: Vec<usize> = (0..headers.len())
        .filter(|&i| i != date_idx && i != time_idx)
        .collect();
    let columns = measurement_idx.iter().map(|&i| headers[i].clone()).collect();

    let mut out = RawPowerTable {
        table: RawTable::new(columns),
        skipped_rows: 0,
    };

    let mut record = ByteRecord::new();
    while csv.read_byte_record(&mut record)? {
        let timestamp = match (record.get(date_idx), record.get(time_idx)) {
            (Some(date), Some(time)) => parse_day_first(&decode(date), &decode(time)),
            _ => None,
        };
        let Some(timestamp) = timestamp else {
            out.skipped_rows += 1;
            continue;
        };

        let values = measurement_idx
            .iter()
            .map(|&i| record.get(i).and_then(|field| coerce_numeric(&decode(field))))
            .collect();
        out.table.records.push((timestamp, values));
    }

    if out.skipped_rows > 0 {
        warn!(skipped = out.skipped_rows, "raw rows dropped for unparseable timestamps");
    }
    debug!(
        rows = out.table.len(),
        columns = out.table.columns.len(),
        "raw power file parsed"
    );
    Ok(out)
}

/// Coerce a field to a finite number; the missing marker, blanks and any
/// unparseable or non-finite text become undefined.
pub fn coerce_numeric(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() || text == MISSING_MARKER {
        return None;
    }
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_day_first(date: &str, time: &str) -> Option<NaiveDateTime> {
    let joined = format!("{} {}", date.trim(), time.trim());
    NaiveDateTime::parse_from_str(&joined, "%d/%m/%Y %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(&joined, "%d/%m/%Y %H:%M"))
        .ok()
}

fn decode(field: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rstest::rstest;

    const SAMPLE: &str = "Date;Time;Global_active_power;Voltage\n\
16/12/2006;17:24:00;4.216;234.840\n\
16/12/2006;17:25:00;?;233.630\n\
not-a-date;17:26:00;1.0;230.0\n\
16/12/2006;17:27:00;abc;\n";

    #[test]
    fn test_parse_sample() {
        let parsed = parse_raw_power(SAMPLE.as_bytes()).unwrap();

        assert_eq!(parsed.table.columns, vec!["Global_active_power", "Voltage"]);
        assert_eq!(parsed.table.len(), 3);
        assert_eq!(parsed.skipped_rows, 1);

        let (ts, values) = &parsed.table.records[0];
        assert_eq!(
            *ts,
            NaiveDate::from_ymd_opt(2006, 12, 16)
                .unwrap()
                .and_hms_opt(17, 24, 0)
                .unwrap()
        );
        assert_eq!(values, &vec![Some(4.216), Some(234.84)]);
        assert_eq!(parsed.table.records[1].1, vec![None, Some(233.63)]);
        assert_eq!(parsed.table.records[2].1, vec![None, None]);
    }

    #[test]
    fn test_tolerates_non_utf8_bytes() {
        let mut bytes = b"Date;Time;Global_active_power\n".to_vec();
        bytes.extend_from_slice(b"01/01/2007;00:00:00;1.5\xe9\n");
        bytes.extend_from_slice(b"01/01/2007;00:01:00;2.5\n");

        let parsed = parse_raw_power(bytes.as_slice()).unwrap();
        assert_eq!(parsed.table.len(), 2);
        assert_eq!(parsed.table.records[0].1, vec![None]);
        assert_eq!(parsed.table.records[1].1, vec![Some(2.5)]);
    }

    #[test]
    fn test_missing_time_column() {
        let err = parse_raw_power("Date;Value\n01/01/2007;1\n".as_bytes()).unwrap_err();
        assert!(matches!(err, IngestError::MissingColumn(ref c) if c == "Time"));
    }

    #[rstest]
    #[case("4.216", Some(4.216))]
    #[case(" 1 ", Some(1.0))]
    #[case("?", None)]
    #[case("", None)]
    #[case("nan", None)]
    #[case("inf", None)]
    #[case("1,5", None)]
    fn test_coerce_numeric(#[case] text: &str, #[case] expected: Option<f64>) {
        assert_eq!(coerce_numeric(text), expected);
    }
}
