use chrono::NaiveDateTime;
use std::time::Instant;
use tracing::info;

use super::split::TrainTestSplit;
use crate::config::ModelsConfig;
use crate::ml::{
    Dataset, ForecastRequest, Forecaster, GradientBoostedTrees, HoltWinters, LstmRegressor, ModelError,
    ModelInput, ModelKind, Sarima,
};

/// Point forecasts of one model over the test index.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionSeries {
    model: ModelKind,
    index: Vec<NaiveDateTime>,
    values: Vec<f64>,
}

impl PredictionSeries {
    /// Pair predictions with the test index, rejecting a length mismatch or
    /// any non-finite value.
    pub fn aligned(
        model: ModelKind,
        index: &[NaiveDateTime],
        values: Vec<f64>,
    ) -> Result<Self, ModelError> {
        if values.len() != index.len() {
            return Err(ModelError::ShapeMismatch {
                model,
                expected: index.len(),
                got: values.len(),
            });
        }
        if let Some(row) = values.iter().position(|v| !v.is_finite()) {
            return Err(ModelError::NonFinitePrediction { model, row });
        }
        Ok(Self {
            model,
            index: index.to_vec(),
            values,
        })
    }

    pub fn model(&self) -> ModelKind {
        self.model
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

/// Trains every forecaster on the same split and collects aligned
/// predictions in display order.
pub struct ForecastHarness {
    forecasters: Vec<Box<dyn Forecaster>>,
}

impl ForecastHarness {
    pub fn new(mut forecasters: Vec<Box<dyn Forecaster>>) -> Self {
        forecasters.sort_by_key(|f| f.kind());
        Self { forecasters }
    }

    pub fn from_config(models: &ModelsConfig) -> Self {
        Self::new(vec![
            Box::new(Sarima::new(models.sarima.clone())),
            Box::new(HoltWinters::new(models.ets.clone())),
            Box::new(GradientBoostedTrees::new(models.gbt.clone())),
            Box::new(LstmRegressor::new(models.lstm.clone())),
        ])
    }

    pub fn kinds(&self) -> Vec<ModelKind> {
        self.forecasters.iter().map(|f| f.kind()).collect()
    }

    pub fn run(&self, split: &TrainTestSplit) -> Result<Vec<PredictionSeries>, ModelError> {
        let train = Dataset::from_rows(&split.train);
        let test = Dataset::from_rows(&split.test);

        self.forecasters
            .iter()
            .map(|forecaster| {
                let kind = forecaster.kind();
                let started = Instant::now();
                info!(model = %kind, train_rows = train.len(), "fitting model");

                let fitted = forecaster.fit(&train)?;
                let request = match forecaster.input() {
                    ModelInput::Univariate => ForecastRequest::Horizon(test.len()),
                    ModelInput::Exogenous => ForecastRequest::Features(&test),
                };
                let values = fitted.predict(request)?;
                let series = PredictionSeries::aligned(kind, test.index(), values)?;

                info!(
                    model = %kind,
                    predictions = series.values().len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "model finished"
                );
                Ok(series)
            })
            .collect()
    }
}
