//! Forecasting models
//!
//! Four model families share one fit/predict capability:
//! - Seasonal ARIMA (univariate, forecasts a horizon)
//! - Additive Holt-Winters (univariate, forecasts a horizon)
//! - Gradient-boosted regression trees (exogenous features, per row)
//! - Single-step LSTM regressor (exogenous features, per row)
//!
//! Univariate models ignore every feature column and extrapolate from the
//! end of the training load. Exogenous models map each test row's own
//! features to a prediction without feeding earlier predictions back in.

use serde::{Deserialize, Serialize};
use strum::EnumIter;
use thiserror::Error;

pub mod dataset;
pub mod ets;
pub mod gbt;
pub mod lstm;
pub mod optimize;
pub mod sarima;

pub use dataset::{Dataset, FeatureScaler};
pub use ets::{EtsConfig, HoltWinters};
pub use gbt::{GbtConfig, GradientBoostedTrees};
pub use lstm::{LstmConfig, LstmRegressor};
pub use sarima::{Sarima, SarimaConfig};

/// Forecaster family; the display name is the column header used in every
/// result file. Declaration order is the display order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    EnumIter,
)]
pub enum ModelKind {
    #[strum(serialize = "SARIMA")]
    #[serde(rename = "SARIMA")]
    Sarima,
    #[strum(serialize = "ETS")]
    #[serde(rename = "ETS")]
    Ets,
    #[strum(to_string = "XGBoost", serialize = "GBT")]
    #[serde(rename = "XGBoost", alias = "GBT")]
    GradientBoosting,
    #[strum(serialize = "LSTM")]
    #[serde(rename = "LSTM")]
    Lstm,
}

/// What a model consumes at prediction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelInput {
    /// Only the training load sequence; predicts a number of steps ahead.
    Univariate,
    /// One exogenous feature vector per predicted row.
    Exogenous,
}

#[derive(Debug, Clone, Copy)]
pub enum ForecastRequest<'a> {
    Horizon(usize),
    Features(&'a Dataset),
}

impl ForecastRequest<'_> {
    /// Number of predictions the request asks for.
    pub fn len(&self) -> usize {
        match self {
            ForecastRequest::Horizon(h) => *h,
            ForecastRequest::Features(dataset) => dataset.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{model} needs at least {needed} training rows, got {got}")]
    InsufficientData {
        model: ModelKind,
        needed: usize,
        got: usize,
    },

    #[error("{model} cannot serve a {request} request")]
    UnsupportedRequest {
        model: ModelKind,
        request: &'static str,
    },

    #[error("{model} was trained on {expected} features, got {got}")]
    FeatureWidth {
        model: ModelKind,
        expected: usize,
        got: usize,
    },

    #[error("{model} training failed: {message}")]
    Training { model: ModelKind, message: String },

    #[error("{model} produced {got} predictions for {expected} test rows")]
    ShapeMismatch {
        model: ModelKind,
        expected: usize,
        got: usize,
    },

    #[error("{model} produced a non-finite prediction at row {row}")]
    NonFinitePrediction { model: ModelKind, row: usize },

    #[error("invalid dataset: {0}")]
    InvalidDataset(String),
}

/// An untrained forecaster with fixed hyperparameters.
pub trait Forecaster: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn input(&self) -> ModelInput;

    /// Train on the training window. Univariate models read only
    /// [`Dataset::targets`].
    fn fit(&self, train: &Dataset) -> Result<Box<dyn FittedModel>, ModelError>;
}

/// A trained model, ready to predict.
pub trait FittedModel: Send {
    fn predict(&self, request: ForecastRequest<'_>) -> Result<Vec<f64>, ModelError>;
}

/// Guard shared by the univariate models.
pub(crate) fn horizon_of(model: ModelKind, request: ForecastRequest<'_>) -> Result<usize, ModelError> {
    match request {
        ForecastRequest::Horizon(h) => Ok(h),
        ForecastRequest::Features(_) => Err(ModelError::UnsupportedRequest {
            model,
            request: "feature",
        }),
    }
}

/// Guard shared by the exogenous models.
pub(crate) fn features_of<'a>(
    model: ModelKind,
    request: ForecastRequest<'a>,
    expected_width: usize,
) -> Result<&'a Dataset, ModelError> {
    match request {
        ForecastRequest::Features(dataset) if dataset.width() == expected_width => Ok(dataset),
        ForecastRequest::Features(dataset) => Err(ModelError::FeatureWidth {
            model,
            expected: expected_width,
            got: dataset.width(),
        }),
        ForecastRequest::Horizon(_) => Err(ModelError::UnsupportedRequest {
            model,
            request: "horizon",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_display_order_and_names() {
        let names: Vec<String> = ModelKind::iter().map(|k| k.to_string()).collect();
        assert_eq!(names, vec!["SARIMA", "ETS", "XGBoost", "LSTM"]);
        assert_eq!(ModelKind::from_str("XGBoost").unwrap(), ModelKind::GradientBoosting);
        assert_eq!(ModelKind::from_str("GBT").unwrap(), ModelKind::GradientBoosting);
    }

    #[test]
    fn test_request_guards() {
        let dataset = Dataset::new(Vec::new(), vec![vec![1.0, 2.0]], vec![0.0], vec!["a".into(), "b".into()]);
        assert!(dataset.is_err());

        assert_eq!(horizon_of(ModelKind::Ets, ForecastRequest::Horizon(3)).unwrap(), 3);
        assert!(matches!(
            features_of(ModelKind::Lstm, ForecastRequest::Horizon(3), 11),
            Err(ModelError::UnsupportedRequest { .. })
        ));
    }
}
