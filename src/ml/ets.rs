//! Additive Holt-Winters (additive trend, additive season).

use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::Validate;

use super::optimize::{minimize, NelderMead};
use super::{horizon_of, Dataset, FittedModel, ForecastRequest, Forecaster, ModelError, ModelInput, ModelKind};

const SMOOTHING_BOUNDS: (f64, f64) = (0.0001, 0.9999);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct EtsConfig {
    #[validate(range(min = 2))]
    pub seasonal_period: usize,
    #[validate(range(min = 1))]
    pub max_iter: usize,
}

impl Default for EtsConfig {
    fn default() -> Self {
        Self {
            seasonal_period: 24,
            max_iter: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Smoothing {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct State {
    level: f64,
    trend: f64,
    seasonals: Vec<f64>,
}

impl State {
    /// Level from the first season's mean, trend from the average
    /// season-over-season change, seasonals as first-season deviations.
    fn initial(values: &[f64], period: usize) -> Self {
        let first = &values[..period];
        let level = first.iter().sum::<f64>() / period as f64;
        let trend = if values.len() >= 2 * period {
            (0..period)
                .map(|i| (values[period + i] - values[i]) / period as f64)
                .sum::<f64>()
                / period as f64
        } else {
            0.0
        };
        let seasonals = first.iter().map(|y| y - level).collect();
        Self {
            level,
            trend,
            seasonals,
        }
    }
}

/// Run the smoothing recursion from the end of the first season and return
/// the one-step SSE and the final state.
fn smooth(values: &[f64], period: usize, s: Smoothing) -> (f64, State) {
    let mut state = State::initial(values, period);
    let mut sse = 0.0;

    for (t, &y) in values.iter().enumerate().skip(period) {
        let idx = t % period;
        let season = state.seasonals[idx];
        let error = y - (state.level + state.trend + season);
        sse += error * error;

        let previous_level = state.level;
        state.level = s.alpha * (y - season) + (1.0 - s.alpha) * (previous_level + state.trend);
        state.trend = s.beta * (state.level - previous_level) + (1.0 - s.beta) * state.trend;
        state.seasonals[idx] = s.gamma * (y - state.level) + (1.0 - s.gamma) * season;
    }
    (sse, state)
}

#[derive(Debug, Clone, Default)]
pub struct HoltWinters {
    config: EtsConfig,
}

impl HoltWinters {
    pub fn new(config: EtsConfig) -> Self {
        Self { config }
    }

    pub fn fit_series(&self, series: &[f64]) -> Result<FittedHoltWinters, ModelError> {
        let period = self.config.seasonal_period;
        let needed = 2 * period;
        if series.len() < needed {
            return Err(ModelError::InsufficientData {
                model: ModelKind::Ets,
                needed,
                got: series.len(),
            });
        }

        let objective = |p: &[f64]| {
            let (sse, _) = smooth(
                series,
                period,
                Smoothing {
                    alpha: p[0],
                    beta: p[1],
                    gamma: p[2],
                },
            );
            if sse.is_finite() {
                sse
            } else {
                f64::MAX
            }
        };
        let bounds = [SMOOTHING_BOUNDS; 3];
        let result = minimize(
            objective,
            &[0.3, 0.1, 0.1],
            Some(&bounds),
            NelderMead::default().with_max_iter(self.config.max_iter),
        );

        let smoothing = Smoothing {
            alpha: result.point[0],
            beta: result.point[1],
            gamma: result.point[2],
        };
        let (sse, state) = smooth(series, period, smoothing);
        debug!(
            alpha = smoothing.alpha,
            beta = smoothing.beta,
            gamma = smoothing.gamma,
            sse,
            "Holt-Winters fitted"
        );

        Ok(FittedHoltWinters {
            smoothing,
            state,
            period,
            observed: series.len(),
        })
    }
}

impl Forecaster for HoltWinters {
    fn kind(&self) -> ModelKind {
        ModelKind::Ets
    }

    fn input(&self) -> ModelInput {
        ModelInput::Univariate
    }

    fn fit(&self, train: &Dataset) -> Result<Box<dyn FittedModel>, ModelError> {
        Ok(Box::new(self.fit_series(train.targets())?))
    }
}

#[derive(Debug, Clone)]
pub struct FittedHoltWinters {
    smoothing: Smoothing,
    state: State,
    period: usize,
    observed: usize,
}

impl FittedHoltWinters {
    pub fn smoothing(&self) -> Smoothing {
        self.smoothing
    }

    pub fn forecast(&self, horizon: usize) -> Vec<f64> {
        (1..=horizon)
            .map(|h| {
                let season = self.state.seasonals[(self.observed + h - 1) % self.period];
                self.state.level + h as f64 * self.state.trend + season
            })
            .collect()
    }
}

impl FittedModel for FittedHoltWinters {
    fn predict(&self, request: ForecastRequest<'_>) -> Result<Vec<f64>, ModelError> {
        let horizon = horizon_of(ModelKind::Ets, request)?;
        Ok(self.forecast(horizon))
    }
}
