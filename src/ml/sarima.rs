//! Seasonal ARIMA fitted by conditional sum of squares.
//!
//! The load sequence is differenced by `(1 - B)^d (1 - B^s)^D`, then a
//! multiplicative ARMA `φ(B)Φ(B^s) w_t = θ(B)Θ(B^s) e_t` is fitted by
//! minimising the conditional sum of squared one-step errors with
//! Nelder-Mead. Coefficients are unconstrained: a non-stationary or
//! non-invertible optimum is accepted rather than rejected. There is no
//! intercept.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use validator::Validate;

use super::optimize::{minimize, NelderMead};
use super::{horizon_of, Dataset, FittedModel, ForecastRequest, Forecaster, ModelError, ModelInput, ModelKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub p: usize,
    pub d: usize,
    pub q: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SeasonalOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    #[validate(range(min = 2))]
    pub period: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SarimaConfig {
    pub order: Order,
    #[validate(nested)]
    pub seasonal: SeasonalOrder,
    #[validate(range(min = 1))]
    pub max_iter: usize,
}

impl Default for SarimaConfig {
    fn default() -> Self {
        Self {
            order: Order { p: 2, d: 1, q: 2 },
            seasonal: SeasonalOrder {
                p: 1,
                d: 1,
                q: 1,
                period: 24,
            },
            max_iter: 500,
        }
    }
}

/// Sparse lag polynomial: `(lag, coefficient)` pairs, lag >= 1.
type LagTerms = Vec<(usize, f64)>;

/// Expand `(1 ∓ Σ a_i B^i)(1 ∓ Σ A_j B^{sj})` into lag terms of the
/// right-hand side. `cross_sign` is the sign of the product terms: -1 for
/// the AR side, +1 for the MA side.
fn expand(nonseasonal: &[f64], seasonal: &[f64], period: usize, cross_sign: f64) -> LagTerms {
    let mut terms: BTreeMap<usize, f64> = BTreeMap::new();
    for (i, a) in nonseasonal.iter().enumerate() {
        *terms.entry(i + 1).or_default() += a;
    }
    for (j, big_a) in seasonal.iter().enumerate() {
        let seasonal_lag = period * (j + 1);
        *terms.entry(seasonal_lag).or_default() += big_a;
        for (i, a) in nonseasonal.iter().enumerate() {
            *terms.entry(i + 1 + seasonal_lag).or_default() += cross_sign * a * big_a;
        }
    }
    terms.into_iter().collect()
}

fn max_lag(terms: &LagTerms) -> usize {
    terms.iter().map(|(lag, _)| *lag).max().unwrap_or(0)
}

/// Coefficients of `(1 - B)^d (1 - B^s)^D`, index = lag.
fn differencing_polynomial(d: usize, seasonal_d: usize, period: usize) -> Vec<f64> {
    let mut poly = vec![1.0];
    let mut multiply = |lag: usize| {
        let mut next = vec![0.0; poly.len() + lag];
        for (k, c) in poly.iter().enumerate() {
            next[k] += c;
            next[k + lag] -= c;
        }
        poly = next;
    };
    for _ in 0..d {
        multiply(1);
    }
    for _ in 0..seasonal_d {
        multiply(period);
    }
    poly
}

fn apply_differencing(series: &[f64], poly: &[f64]) -> Vec<f64> {
    let order = poly.len() - 1;
    (order..series.len())
        .map(|t| poly.iter().enumerate().map(|(k, c)| c * series[t - k]).sum())
        .collect()
}

/// One-step residuals of the ARMA recursion; errors before the first full
/// lag window are taken as zero.
fn residuals(w: &[f64], ar: &LagTerms, ma: &LagTerms) -> Vec<f64> {
    let start = max_lag(ar).max(max_lag(ma));
    let mut e = vec![0.0; w.len()];
    for t in start..w.len() {
        let mut pred = 0.0;
        for (lag, coef) in ar {
            pred += coef * w[t - lag];
        }
        for (lag, coef) in ma {
            pred += coef * e[t - lag];
        }
        e[t] = w[t] - pred;
    }
    e
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Params<'a> {
    ar: &'a [f64],
    seasonal_ar: &'a [f64],
    ma: &'a [f64],
    seasonal_ma: &'a [f64],
}

impl<'a> Params<'a> {
    fn unpack(config: &SarimaConfig, flat: &'a [f64]) -> Self {
        let (ar, rest) = flat.split_at(config.order.p);
        let (seasonal_ar, rest) = rest.split_at(config.seasonal.p);
        let (ma, seasonal_ma) = rest.split_at(config.order.q);
        Self {
            ar,
            seasonal_ar,
            ma,
            seasonal_ma,
        }
    }

    fn terms(&self, period: usize) -> (LagTerms, LagTerms) {
        (
            expand(self.ar, self.seasonal_ar, period, -1.0),
            expand(self.ma, self.seasonal_ma, period, 1.0),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sarima {
    config: SarimaConfig,
}

impl Sarima {
    pub fn new(config: SarimaConfig) -> Self {
        Self { config }
    }

    fn min_rows(&self) -> usize {
        let c = &self.config;
        let s = c.seasonal.period;
        let ar_lag = c.order.p + s * c.seasonal.p;
        let ma_lag = c.order.q + s * c.seasonal.q;
        c.order.d + s * c.seasonal.d + ar_lag.max(ma_lag) + 1
    }

    pub fn fit_series(&self, series: &[f64]) -> Result<FittedSarima, ModelError> {
        let needed = self.min_rows();
        if series.len() < needed {
            return Err(ModelError::InsufficientData {
                model: ModelKind::Sarima,
                needed,
                got: series.len(),
            });
        }

        let c = &self.config;
        let period = c.seasonal.period;
        let diff_poly = differencing_polynomial(c.order.d, c.seasonal.d, period);
        let w = apply_differencing(series, &diff_poly);

        let initial: Vec<f64> = (0..c.order.p)
            .map(|i| 0.1 / (i + 1) as f64)
            .chain(std::iter::repeat(0.1).take(c.seasonal.p))
            .chain((0..c.order.q).map(|i| 0.1 / (i + 1) as f64))
            .chain(std::iter::repeat(0.1).take(c.seasonal.q))
            .collect();

        let css = |flat: &[f64]| -> f64 {
            let (ar, ma) = Params::unpack(c, flat).terms(period);
            let start = max_lag(&ar).max(max_lag(&ma));
            let sse: f64 = residuals(&w, &ar, &ma)[start..].iter().map(|e| e * e).sum();
            if sse.is_finite() {
                sse
            } else {
                f64::MAX
            }
        };

        let result = minimize(css, &initial, None, NelderMead::default().with_max_iter(c.max_iter));
        if !result.converged {
            warn!(
                iterations = result.iterations,
                css = result.value,
                "SARIMA optimiser stopped before convergence"
            );
        }
        debug!(coefficients = ?result.point, css = result.value, "SARIMA fitted");

        let (ar, ma) = Params::unpack(c, &result.point).terms(period);
        let errors = residuals(&w, &ar, &ma);

        Ok(FittedSarima {
            ar,
            ma,
            diff_poly,
            history: series.to_vec(),
            differenced: w,
            errors,
        })
    }
}

impl Forecaster for Sarima {
    fn kind(&self) -> ModelKind {
        ModelKind::Sarima
    }

    fn input(&self) -> ModelInput {
        ModelInput::Univariate
    }

    fn fit(&self, train: &Dataset) -> Result<Box<dyn FittedModel>, ModelError> {
        Ok(Box::new(self.fit_series(train.targets())?))
    }
}

#[derive(Debug, Clone)]
pub struct FittedSarima {
    ar: LagTerms,
    ma: LagTerms,
    diff_poly: Vec<f64>,
    history: Vec<f64>,
    differenced: Vec<f64>,
    errors: Vec<f64>,
}

impl FittedSarima {
    /// Forecast `horizon` steps past the end of training. Future errors are
    /// zero; each differenced forecast is integrated back onto the level of
    /// the series using the previous levels (observed, then forecast).
    pub fn forecast(&self, horizon: usize) -> Vec<f64> {
        let mut w = self.differenced.clone();
        let mut e = self.errors.clone();
        let mut y = self.history.clone();

        for _ in 0..horizon {
            let t = w.len();
            let mut next_w = 0.0;
            for (lag, coef) in &self.ar {
                if let Some(prev) = t.checked_sub(*lag).map(|i| w[i]) {
                    next_w += coef * prev;
                }
            }
            for (lag, coef) in &self.ma {
                if let Some(prev) = t.checked_sub(*lag).map(|i| e[i]) {
                    next_w += coef * prev;
                }
            }
            w.push(next_w);
            e.push(0.0);

            let n = y.len();
            let carried: f64 = self
                .diff_poly
                .iter()
                .enumerate()
                .skip(1)
                .map(|(k, c)| c * y[n - k])
                .sum();
            y.push(next_w - carried);
        }

        y.split_off(self.history.len())
    }
}

impl FittedModel for FittedSarima {
    fn predict(&self, request: ForecastRequest<'_>) -> Result<Vec<f64>, ModelError> {
        let horizon = horizon_of(ModelKind::Sarima, request)?;
        Ok(self.forecast(horizon))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_expand_multiplicative_polynomial() {
        let terms = expand(&[0.5], &[0.2], 4, -1.0);
        assert_eq!(terms, vec![(1, 0.5), (4, 0.2), (5, -0.1)]);

        let ma = expand(&[0.5], &[0.2], 4, 1.0);
        assert_abs_diff_eq!(ma[2].1, 0.1, epsilon = 1e-15);
    }

    #[test]
    fn test_differencing_polynomial() {
        assert_eq!(differencing_polynomial(1, 0, 24), vec![1.0, -1.0]);
        let both = differencing_polynomial(1, 1, 3);
        // (1 - B)(1 - B^3) = 1 - B - B^3 + B^4
        assert_eq!(both, vec![1.0, -1.0, 0.0, -1.0, 1.0]);
    }

    #[test]
    fn test_pure_seasonal_pattern_is_repeated() {
        let pattern = [1.0, 3.0, 2.0, 5.0];
        let series: Vec<f64> = (0..80).map(|i| pattern[i % 4] + 0.5 * i as f64).collect();

        let model = Sarima::new(SarimaConfig {
            order: Order { p: 0, d: 1, q: 0 },
            seasonal: SeasonalOrder {
                p: 0,
                d: 1,
                q: 0,
                period: 4,
            },
            max_iter: 10,
        });
        let forecast = model.fit_series(&series).unwrap().forecast(8);

        for (h, value) in forecast.iter().enumerate() {
            let t = 80 + h;
            assert_abs_diff_eq!(*value, pattern[t % 4] + 0.5 * t as f64, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_default_order_forecasts_finite_values() {
        let series: Vec<f64> = (0..24 * 14)
            .map(|i| {
                let hour = (i % 24) as f64;
                1.0 + (hour / 24.0 * std::f64::consts::TAU).sin() + 0.01 * ((i * 7919) % 13) as f64
            })
            .collect();

        let mut config = SarimaConfig::default();
        config.max_iter = 60;
        let forecast = Sarima::new(config).fit_series(&series).unwrap().forecast(48);

        assert_eq!(forecast.len(), 48);
        assert!(forecast.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_insufficient_data() {
        let err = Sarima::default().fit_series(&[1.0; 30]).unwrap_err();
        assert!(matches!(err, ModelError::InsufficientData { model: ModelKind::Sarima, .. }));
    }

    #[test]
    fn test_rejects_feature_requests() {
        let fitted = Sarima::new(SarimaConfig {
            order: Order { p: 0, d: 1, q: 0 },
            seasonal: SeasonalOrder {
                p: 0,
                d: 0,
                q: 0,
                period: 2,
            },
            max_iter: 5,
        })
        .fit_series(&[1.0, 2.0, 3.0])
        .unwrap();
        let dataset = Dataset::from_rows(&[]);
        assert!(fitted.predict(ForecastRequest::Features(&dataset)).is_err());
        assert_eq!(fitted.predict(ForecastRequest::Horizon(2)).unwrap(), vec![3.0, 3.0]);
    }
}
