//! Model scoring
//!
//! Per-model accuracy against the actual test load, plus the comparison
//! table of actual and predicted values keyed by model in display order.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use super::engine::PredictionSeries;
use super::features::FeatureRow;
use crate::ml::ModelKind;

/// Error statistics of one prediction vector against the actual load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastMetrics {
    /// Mean Absolute Error
    pub mae: f64,
    /// Root of the mean squared error
    pub rmse: f64,
    /// Mean Absolute Percentage Error (%), over non-zero actuals
    pub mape: f64,
    /// Coefficient of determination, 0 when the actual load is constant
    pub r2: f64,
    /// Hours scored
    pub sample_count: usize,
    /// Largest absolute error observed
    pub max_error: f64,
}

impl ForecastMetrics {
    /// Fails on unequal lengths or an empty test set.
    pub fn calculate(actual: &[f64], predicted: &[f64]) -> Result<Self, ForecastMetricsError> {
        if actual.len() != predicted.len() {
            return Err(ForecastMetricsError::DimensionMismatch {
                actual: actual.len(),
                predicted: predicted.len(),
            });
        }
        if actual.is_empty() {
            return Err(ForecastMetricsError::EmptyData);
        }

        let n = actual.len() as f64;
        let errors: Vec<f64> = actual.iter().zip(predicted).map(|(a, p)| a - p).collect();

        let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
        let sse: f64 = errors.iter().map(|e| e * e).sum();
        let rmse = (sse / n).sqrt();

        let percentage: Vec<f64> = actual
            .iter()
            .zip(&errors)
            .filter(|(a, _)| a.abs() > 1e-6)
            .map(|(a, e)| e.abs() / a.abs() * 100.0)
            .collect();
        let mape = if percentage.is_empty() {
            0.0
        } else {
            percentage.iter().sum::<f64>() / percentage.len() as f64
        };

        let mean_actual = actual.iter().sum::<f64>() / n;
        let total_variance: f64 = actual.iter().map(|a| (a - mean_actual).powi(2)).sum();
        let r2 = if total_variance > 1e-10 {
            1.0 - sse / total_variance
        } else {
            0.0
        };

        let max_error = errors.iter().map(|e| e.abs()).fold(0.0f64, f64::max);

        Ok(ForecastMetrics {
            mae,
            rmse,
            mape,
            r2,
            sample_count: actual.len(),
            max_error,
        })
    }
}

impl fmt::Display for ForecastMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MAE={:.4}, RMSE={:.4}, MAPE={:.2}%, R²={:.3}, max={:.3}, n={}",
            self.mae, self.rmse, self.mape, self.r2, self.max_error, self.sample_count
        )
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ForecastMetricsError {
    #[error("{predicted} predictions for {actual} actual values")]
    DimensionMismatch { actual: usize, predicted: usize },

    #[error("nothing to score")]
    EmptyData,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error("no predictions to evaluate")]
    NoPredictions,

    #[error("{model} predictions are not aligned with the test index")]
    IndexMismatch { model: ModelKind },

    #[error("{model} appears more than once")]
    DuplicateModel { model: ModelKind },

    #[error("{model}: {source}")]
    Metrics {
        model: ModelKind,
        #[source]
        source: ForecastMetricsError,
    },
}

/// One row of `model_results.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelScore {
    pub model: ModelKind,
    #[serde(rename = "MAE")]
    pub mae: f64,
    #[serde(rename = "RMSE")]
    pub rmse: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricsTable {
    pub scores: Vec<ModelScore>,
}

impl MetricsTable {
    pub fn get(&self, model: ModelKind) -> Option<&ModelScore> {
        self.scores.iter().find(|s| s.model == model)
    }
}

/// Actual test load and every model's prediction on the same index.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonTable {
    pub index: Vec<NaiveDateTime>,
    pub actual: Vec<f64>,
    pub predictions: Vec<(ModelKind, Vec<f64>)>,
}

impl ComparisonTable {
    pub fn models(&self) -> Vec<ModelKind> {
        self.predictions.iter().map(|(m, _)| *m).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub metrics: MetricsTable,
    pub comparison: ComparisonTable,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator;

impl Evaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(
        &self,
        test: &[FeatureRow],
        predictions: &[PredictionSeries],
    ) -> Result<Evaluation, EvaluationError> {
        if predictions.is_empty() {
            return Err(EvaluationError::NoPredictions);
        }

        let index: Vec<NaiveDateTime> = test.iter().map(|r| r.timestamp).collect();
        let actual: Vec<f64> = test.iter().map(|r| r.load).collect();

        let mut ordered: Vec<&PredictionSeries> = predictions.iter().collect();
        ordered.sort_by_key(|p| p.model());
        if let Some(pair) = ordered.windows(2).find(|w| w[0].model() == w[1].model()) {
            return Err(EvaluationError::DuplicateModel {
                model: pair[0].model(),
            });
        }

        let mut scores = Vec::with_capacity(ordered.len());
        for series in &ordered {
            let model = series.model();
            if series.index() != index.as_slice() {
                return Err(EvaluationError::IndexMismatch { model });
            }
            let metrics = ForecastMetrics::calculate(&actual, series.values())
                .map_err(|source| EvaluationError::Metrics { model, source })?;

            info!(
                model = %model,
                mae = metrics.mae,
                rmse = metrics.rmse,
                mape = metrics.mape,
                r2 = metrics.r2,
                max_error = metrics.max_error,
                samples = metrics.sample_count,
                "model evaluated"
            );
            scores.push(ModelScore {
                model,
                mae: metrics.mae,
                rmse: metrics.rmse,
            });
        }

        Ok(Evaluation {
            metrics: MetricsTable { scores },
            comparison: ComparisonTable {
                index,
                actual,
                predictions: ordered
                    .iter()
                    .map(|p| (p.model(), p.values().to_vec()))
                    .collect(),
            },
        })
    }
}
