//! Model-facing view of feature rows.

use chrono::NaiveDateTime;

use super::ModelError;
use crate::forecast::features::{FeatureRow, FEATURE_NAMES};

/// Feature matrix, target vector and their shared timestamp index.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    index: Vec<NaiveDateTime>,
    features: Vec<Vec<f64>>,
    targets: Vec<f64>,
    feature_names: Vec<String>,
}

impl Dataset {
    pub fn new(
        index: Vec<NaiveDateTime>,
        features: Vec<Vec<f64>>,
        targets: Vec<f64>,
        feature_names: Vec<String>,
    ) -> Result<Self, ModelError> {
        if index.len() != features.len() || index.len() != targets.len() {
            return Err(ModelError::InvalidDataset(format!(
                "{} timestamps, {} feature rows, {} targets",
                index.len(),
                features.len(),
                targets.len()
            )));
        }
        if let Some(row) = features.iter().position(|r| r.len() != feature_names.len()) {
            return Err(ModelError::InvalidDataset(format!(
                "feature row {row} has {} values for {} names",
                features[row].len(),
                feature_names.len()
            )));
        }
        Ok(Self {
            index,
            features,
            targets,
            feature_names,
        })
    }

    /// `load` becomes the target; the exogenous columns become features.
    pub fn from_rows(rows: &[FeatureRow]) -> Self {
        Self {
            index: rows.iter().map(|r| r.timestamp).collect(),
            features: rows.iter().map(|r| r.features().to_vec()).collect(),
            targets: rows.iter().map(|r| r.load).collect(),
            feature_names: FEATURE_NAMES.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn features(&self) -> &[Vec<f64>] {
        &self.features
    }

    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn width(&self) -> usize {
        self.feature_names.len()
    }

    /// Row-major copy of the feature matrix.
    pub fn flat_features(&self) -> Vec<f64> {
        self.features.iter().flatten().copied().collect()
    }
}

/// Z-score standardisation with statistics taken from the training rows.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureScaler {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl FeatureScaler {
    pub fn fit(dataset: &Dataset) -> Self {
        let n = dataset.len().max(1) as f64;
        let width = dataset.width();

        let mut means = vec![0.0; width];
        for row in dataset.features() {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v;
            }
        }
        means.iter_mut().for_each(|m| *m /= n);

        let mut stds = vec![0.0; width];
        for row in dataset.features() {
            for ((s, v), m) in stds.iter_mut().zip(row).zip(&means) {
                *s += (v - m).powi(2);
            }
        }
        stds.iter_mut().for_each(|s| *s = (*s / n).sqrt());

        Self { means, stds }
    }

    pub fn width(&self) -> usize {
        self.means.len()
    }

    /// Standardise one row; constant columns map to zero.
    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(f, (mean, std))| {
                if std.abs() < 1e-10 {
                    0.0
                } else {
                    (f - mean) / std
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn ts(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2009, 1, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_rejects_ragged_features() {
        let result = Dataset::new(
            vec![ts(0), ts(1)],
            vec![vec![1.0, 2.0], vec![1.0]],
            vec![0.0, 0.0],
            vec!["a".into(), "b".into()],
        );
        assert!(matches!(result, Err(ModelError::InvalidDataset(_))));
    }

    #[test]
    fn test_scaler_standardises_and_handles_constant_columns() {
        let dataset = Dataset::new(
            vec![ts(0), ts(1), ts(2)],
            vec![vec![1.0, 5.0], vec![2.0, 5.0], vec![3.0, 5.0]],
            vec![0.0; 3],
            vec!["a".into(), "b".into()],
        )
        .unwrap();

        let scaler = FeatureScaler::fit(&dataset);
        let scaled = scaler.transform(&[3.0, 5.0]);

        assert_relative_eq!(scaled[0], 1.0 / (2.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_eq!(scaled[1], 0.0);
        assert_eq!(dataset.flat_features(), vec![1.0, 5.0, 2.0, 5.0, 3.0, 5.0]);
    }
}
