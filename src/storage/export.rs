//! Feature and result CSV files.

use std::path::Path;
use tracing::info;

use super::{write_csv_atomically, CacheError};
use crate::domain::{format_timestamp, validate_hourly_index, INDEX_COLUMN};
use crate::forecast::features::FeatureRow;
use crate::forecast::metrics::{ComparisonTable, MetricsTable};

/// Column header of the actual load in the predictions file.
pub const ACTUAL_COLUMN: &str = "Actual";

pub fn write_features(path: &Path, rows: &[FeatureRow]) -> Result<(), CacheError> {
    write_csv_atomically(path, |w| {
        if rows.is_empty() {
            // serde only emits a header alongside the first record
            w.write_record(feature_header())?;
        }
        for row in rows {
            w.serialize(row)?;
        }
        Ok(())
    })?;
    info!(path = %path.display(), rows = rows.len(), "features exported");
    Ok(())
}

fn feature_header() -> Vec<&'static str> {
    let mut header = vec![INDEX_COLUMN, "load"];
    header.extend(crate::forecast::features::FEATURE_NAMES);
    header
}

/// Read an exported feature file back, checking the index is on the hour and
/// strictly increasing.
pub fn read_features(path: &Path) -> Result<Vec<FeatureRow>, CacheError> {
    let mut reader = csv::Reader::from_path(path).map_err(CacheError::csv(path))?;
    let rows = reader
        .deserialize()
        .collect::<Result<Vec<FeatureRow>, _>>()
        .map_err(CacheError::csv(path))?;

    let index: Vec<_> = rows.iter().map(|r| r.timestamp).collect();
    validate_hourly_index(&index).map_err(|source| CacheError::Series {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), rows = rows.len(), "features loaded");
    Ok(rows)
}

/// `datetime,Actual,<model>...` in the table's model order.
pub fn write_predictions(path: &Path, table: &ComparisonTable) -> Result<(), CacheError> {
    write_csv_atomically(path, |w| {
        let mut header = vec![INDEX_COLUMN.to_string(), ACTUAL_COLUMN.to_string()];
        header.extend(table.models().iter().map(ToString::to_string));
        w.write_record(&header)?;

        for (i, ts) in table.index.iter().enumerate() {
            let mut record = vec![format_timestamp(*ts), table.actual[i].to_string()];
            record.extend(table.predictions.iter().map(|(_, values)| values[i].to_string()));
            w.write_record(&record)?;
        }
        Ok(())
    })?;
    info!(path = %path.display(), rows = table.index.len(), "predictions exported");
    Ok(())
}

/// `model,MAE,RMSE`, one row per model.
pub fn write_metrics(path: &Path, table: &MetricsTable) -> Result<(), CacheError> {
    write_csv_atomically(path, |w| {
        if table.scores.is_empty() {
            w.write_record(["model", "MAE", "RMSE"])?;
        }
        for score in &table.scores {
            w.serialize(score)?;
        }
        Ok(())
    })?;
    info!(path = %path.display(), models = table.scores.len(), "metrics exported");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::features::calendar_features;
    use crate::forecast::metrics::ModelScore;
    use crate::ml::ModelKind;
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use std::fs;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2010, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn row(h: i64, load: f64) -> FeatureRow {
        let timestamp = t0() + Duration::hours(h);
        let (hour, dow, is_weekend) = calendar_features(timestamp);
        FeatureRow {
            timestamp,
            load,
            temp_c: 3.5,
            rel_humidity: 91.0,
            wind_speed: 1.25,
            hour,
            dow,
            is_weekend,
            lag_1h: 0.5,
            lag_2h: 0.25,
            lag_24h: 1.0 / 3.0,
            roll_mean_3h: 0.7,
            roll_mean_24h: 0.8,
        }
    }

    #[test]
    fn test_feature_file_layout_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("train_features.csv");
        let rows = vec![row(0, 1.1), row(1, 2.2), row(5, 3.3)];

        write_features(&path, &rows).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let header = text.lines().next().unwrap();
        assert_eq!(
            header,
            "datetime,load,temp_c,rel_humidity,wind_speed,hour,dow,is_weekend,\
             lag_1h,lag_2h,lag_24h,roll_mean_3h,roll_mean_24h"
        );
        assert!(text.lines().nth(1).unwrap().starts_with("2010-01-01 00:00:00,1.1,"));
        assert_eq!(read_features(&path).unwrap(), rows);
    }

    #[test]
    fn test_empty_feature_file_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features_full.csv");
        write_features(&path, &[]).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 1);
        assert!(read_features(&path).unwrap().is_empty());
    }

    #[test]
    fn test_unordered_feature_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_features.csv");
        write_features(&path, &[row(3, 1.0), row(2, 1.0)]).unwrap();

        assert!(matches!(read_features(&path), Err(CacheError::Series { .. })));
    }

    #[test]
    fn test_prediction_and_metric_files() {
        let dir = tempfile::tempdir().unwrap();
        let index = vec![t0(), t0() + Duration::hours(1)];
        let comparison = ComparisonTable {
            index,
            actual: vec![1.0, 2.0],
            predictions: vec![(ModelKind::Sarima, vec![1.5, 2.5]), (ModelKind::Lstm, vec![0.5, 1.75])],
        };
        let metrics = MetricsTable {
            scores: vec![ModelScore {
                model: ModelKind::GradientBoosting,
                mae: 0.25,
                rmse: 0.5,
            }],
        };

        let predictions_path = dir.path().join("predictions_test.csv");
        let metrics_path = dir.path().join("model_results.csv");
        write_predictions(&predictions_path, &comparison).unwrap();
        write_metrics(&metrics_path, &metrics).unwrap();

        assert_eq!(
            fs::read_to_string(&predictions_path).unwrap(),
            "datetime,Actual,SARIMA,LSTM\n\
             2010-01-01 00:00:00,1,1.5,0.5\n\
             2010-01-01 01:00:00,2,2.5,1.75\n"
        );
        assert_eq!(
            fs::read_to_string(&metrics_path).unwrap(),
            "model,MAE,RMSE\nXGBoost,0.25,0.5\n"
        );
    }
}
