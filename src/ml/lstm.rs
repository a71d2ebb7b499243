//! Single-step LSTM regressor.
//!
//! Every sample is one time step holding the full standardised feature
//! vector: `LSTM(hidden) -> Dense(dense, ReLU) -> Dense(1)`, trained with
//! Adam on mean squared error. The cell always starts from a zero hidden and
//! cell state, so the recurrent kernel multiplies a zero vector and is not
//! materialised, and the forget gate has no effect on the output.

use ndarray::{s, Array, Array1, Array2, ArrayView1, Axis, Dimension, Zip};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use validator::Validate;

use super::dataset::FeatureScaler;
use super::{features_of, Dataset, FittedModel, ForecastRequest, Forecaster, ModelError, ModelInput, ModelKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LstmConfig {
    #[validate(range(min = 1))]
    pub hidden_units: usize,
    #[validate(range(min = 1))]
    pub dense_units: usize,
    #[validate(range(min = 1))]
    pub epochs: usize,
    #[validate(range(min = 1))]
    pub batch_size: usize,
    #[validate(range(exclusive_min = 0.0))]
    pub learning_rate: f64,
    pub seed: u64,
}

impl Default for LstmConfig {
    fn default() -> Self {
        Self {
            hidden_units: 64,
            dense_units: 32,
            epochs: 10,
            batch_size: 32,
            learning_rate: 0.001,
            seed: 42,
        }
    }
}

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-7;

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Glorot-uniform matrix of shape `(rows, cols)`.
fn glorot(rng: &mut StdRng, rows: usize, cols: usize) -> Array2<f64> {
    let limit = (6.0 / (rows + cols) as f64).sqrt();
    let dist = Uniform::new_inclusive(-limit, limit);
    Array2::from_shape_fn((rows, cols), |_| dist.sample(&mut *rng))
}

#[derive(Debug, Clone)]
struct Network {
    hidden: usize,
    /// Input kernel, gates stacked as input, forget, candidate, output.
    w: Array2<f64>,
    b: Array1<f64>,
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array1<f64>,
    b2: Array1<f64>,
}

struct Activations {
    input_gate: Array2<f64>,
    candidate: Array2<f64>,
    output_gate: Array2<f64>,
    cell_tanh: Array2<f64>,
    hidden: Array2<f64>,
    dense_pre: Array2<f64>,
    dense: Array2<f64>,
    output: Array1<f64>,
}

struct Gradients {
    w: Array2<f64>,
    b: Array1<f64>,
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array1<f64>,
    b2: Array1<f64>,
}

impl Network {
    fn init(rng: &mut StdRng, inputs: usize, hidden: usize, dense: usize) -> Self {
        let w = glorot(rng, 4 * hidden, inputs);
        let mut b: Array1<f64> = Array1::zeros(4 * hidden);
        b.slice_mut(s![hidden..2 * hidden]).fill(1.0);
        let w1 = glorot(rng, dense, hidden);
        let w2 = glorot(rng, 1, dense).row(0).to_owned();
        Self {
            hidden,
            w,
            b,
            w1,
            b1: Array1::zeros(dense),
            w2,
            b2: Array1::zeros(1),
        }
    }

    fn forward(&self, x: &Array2<f64>) -> Activations {
        let h = self.hidden;
        let z = x.dot(&self.w.t()) + &self.b;

        let input_gate = z.slice(s![.., 0..h]).mapv(sigmoid);
        let candidate = z.slice(s![.., 2 * h..3 * h]).mapv(f64::tanh);
        let output_gate = z.slice(s![.., 3 * h..4 * h]).mapv(sigmoid);

        let cell_tanh = (&input_gate * &candidate).mapv(f64::tanh);
        let hidden = &output_gate * &cell_tanh;

        let dense_pre = hidden.dot(&self.w1.t()) + &self.b1;
        let dense = dense_pre.mapv(|v| v.max(0.0));
        let output = dense.dot(&self.w2) + self.b2[0];

        Activations {
            input_gate,
            candidate,
            output_gate,
            cell_tanh,
            hidden,
            dense_pre,
            dense,
            output,
        }
    }

    fn backward(&self, x: &Array2<f64>, act: &Activations, targets: ArrayView1<f64>) -> Gradients {
        let h = self.hidden;
        let batch = x.nrows() as f64;

        let d_out = (&act.output - &targets) * (2.0 / batch);
        let g_w2 = act.dense.t().dot(&d_out);
        let g_b2 = Array1::from_elem(1, d_out.sum());

        let d_dense = &d_out.view().insert_axis(Axis(1)) * &self.w2.view().insert_axis(Axis(0));
        let relu_mask = act.dense_pre.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
        let d_dense_pre = d_dense * relu_mask;
        let g_w1 = d_dense_pre.t().dot(&act.hidden);
        let g_b1 = d_dense_pre.sum_axis(Axis(0));

        let d_hidden = d_dense_pre.dot(&self.w1);
        let d_output_gate = &d_hidden * &act.cell_tanh;
        let d_cell = &d_hidden * &act.output_gate * act.cell_tanh.mapv(|t| 1.0 - t * t);
        let d_input_gate = &d_cell * &act.candidate;
        let d_candidate = &d_cell * &act.input_gate;

        let mut dz: Array2<f64> = Array2::zeros((x.nrows(), 4 * h));
        dz.slice_mut(s![.., 0..h])
            .assign(&(d_input_gate * act.input_gate.mapv(|i| i * (1.0 - i))));
        dz.slice_mut(s![.., 2 * h..3 * h])
            .assign(&(d_candidate * act.candidate.mapv(|g| 1.0 - g * g)));
        dz.slice_mut(s![.., 3 * h..4 * h])
            .assign(&(d_output_gate * act.output_gate.mapv(|o| o * (1.0 - o))));

        Gradients {
            w: dz.t().dot(x),
            b: dz.sum_axis(Axis(0)),
            w1: g_w1,
            b1: g_b1,
            w2: g_w2,
            b2: g_b2,
        }
    }
}

/// Adam first and second moments for one parameter tensor.
struct Moments<D: Dimension> {
    m: Array<f64, D>,
    v: Array<f64, D>,
}

impl<D: Dimension> Moments<D> {
    fn like(param: &Array<f64, D>) -> Self {
        Self {
            m: Array::zeros(param.raw_dim()),
            v: Array::zeros(param.raw_dim()),
        }
    }

    fn step(&mut self, param: &mut Array<f64, D>, grad: &Array<f64, D>, lr_t: f64) {
        Zip::from(param)
            .and(&mut self.m)
            .and(&mut self.v)
            .and(grad)
            .for_each(|p, m, v, &g| {
                *m = BETA1 * *m + (1.0 - BETA1) * g;
                *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                *p -= lr_t * *m / (v.sqrt() + EPSILON);
            });
    }
}

struct Adam {
    learning_rate: f64,
    t: i32,
    w: Moments<ndarray::Ix2>,
    b: Moments<ndarray::Ix1>,
    w1: Moments<ndarray::Ix2>,
    b1: Moments<ndarray::Ix1>,
    w2: Moments<ndarray::Ix1>,
    b2: Moments<ndarray::Ix1>,
}

impl Adam {
    fn new(net: &Network, learning_rate: f64) -> Self {
        Self {
            learning_rate,
            t: 0,
            w: Moments::like(&net.w),
            b: Moments::like(&net.b),
            w1: Moments::like(&net.w1),
            b1: Moments::like(&net.b1),
            w2: Moments::like(&net.w2),
            b2: Moments::like(&net.b2),
        }
    }

    fn apply(&mut self, net: &mut Network, g: &Gradients) {
        self.t += 1;
        let lr_t = self.learning_rate * (1.0 - BETA2.powi(self.t)).sqrt() / (1.0 - BETA1.powi(self.t));
        self.w.step(&mut net.w, &g.w, lr_t);
        self.b.step(&mut net.b, &g.b, lr_t);
        self.w1.step(&mut net.w1, &g.w1, lr_t);
        self.b1.step(&mut net.b1, &g.b1, lr_t);
        self.w2.step(&mut net.w2, &g.w2, lr_t);
        self.b2.step(&mut net.b2, &g.b2, lr_t);
    }
}

#[derive(Debug, Clone, Default)]
pub struct LstmRegressor {
    config: LstmConfig,
}

impl LstmRegressor {
    pub fn new(config: LstmConfig) -> Self {
        Self { config }
    }

    pub fn fit_dataset(&self, train: &Dataset) -> Result<FittedLstm, ModelError> {
        if train.is_empty() || train.width() == 0 {
            return Err(ModelError::InsufficientData {
                model: ModelKind::Lstm,
                needed: 1,
                got: train.len(),
            });
        }

        let cfg = &self.config;
        let scaler = FeatureScaler::fit(train);
        let x = standardised(&scaler, train.features())?;
        let y = Array1::from(train.targets().to_vec());

        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let mut net = Network::init(&mut rng, train.width(), cfg.hidden_units, cfg.dense_units);
        let mut adam = Adam::new(&net, cfg.learning_rate);
        let mut order: Vec<usize> = (0..train.len()).collect();

        for epoch in 0..cfg.epochs {
            order.shuffle(&mut rng);
            let mut loss_sum = 0.0;
            for batch in order.chunks(cfg.batch_size) {
                let xb = x.select(Axis(0), batch);
                let yb = y.select(Axis(0), batch);
                let act = net.forward(&xb);
                loss_sum += (&act.output - &yb).mapv(|e| e * e).sum();
                let grads = net.backward(&xb, &act, yb.view());
                adam.apply(&mut net, &grads);
            }
            debug!(
                epoch = epoch + 1,
                loss = loss_sum / train.len() as f64,
                "LSTM epoch finished"
            );
        }
        info!(epochs = cfg.epochs, samples = train.len(), "LSTM trained");

        Ok(FittedLstm {
            net,
            scaler,
            width: train.width(),
        })
    }
}

fn standardised(scaler: &FeatureScaler, rows: &[Vec<f64>]) -> Result<Array2<f64>, ModelError> {
    let width = scaler.width();
    let flat: Vec<f64> = rows.iter().flat_map(|r| scaler.transform(r)).collect();
    Array2::from_shape_vec((rows.len(), width), flat)
        .map_err(|e| ModelError::InvalidDataset(e.to_string()))
}

impl Forecaster for LstmRegressor {
    fn kind(&self) -> ModelKind {
        ModelKind::Lstm
    }

    fn input(&self) -> ModelInput {
        ModelInput::Exogenous
    }

    fn fit(&self, train: &Dataset) -> Result<Box<dyn FittedModel>, ModelError> {
        Ok(Box::new(self.fit_dataset(train)?))
    }
}

#[derive(Debug, Clone)]
pub struct FittedLstm {
    net: Network,
    scaler: FeatureScaler,
    width: usize,
}

impl FittedLstm {
    pub fn predict_rows(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let x = standardised(&self.scaler, rows)?;
        Ok(self.net.forward(&x).output.to_vec())
    }
}

impl FittedModel for FittedLstm {
    fn predict(&self, request: ForecastRequest<'_>) -> Result<Vec<f64>, ModelError> {
        let dataset = features_of(ModelKind::Lstm, request, self.width)?;
        self.predict_rows(dataset.features())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::{Duration, NaiveDate};

    fn linear_dataset(n: usize) -> Dataset {
        let t0 = NaiveDate::from_ymd_opt(2009, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let features: Vec<Vec<f64>> = (0..n)
            .map(|i| vec![(i % 24) as f64, ((i * 7) % 10) as f64 / 10.0])
            .collect();
        let targets = features.iter().map(|f| 0.5 + 0.05 * f[0] + f[1]).collect();
        Dataset::new(
            (0..n).map(|i| t0 + Duration::hours(i as i64)).collect(),
            features,
            targets,
            vec!["hour".into(), "x".into()],
        )
        .unwrap()
    }

    #[test]
    fn test_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut net = Network::init(&mut rng, 3, 4, 5);
        // Biases away from the ReLU kink so the numeric derivative is smooth.
        net.b1.fill(0.3);
        let x = Array2::from_shape_vec((2, 3), vec![0.1, -0.4, 0.7, 0.9, 0.2, -0.3]).unwrap();
        let y = Array1::from(vec![0.5, -0.2]);

        let loss = |net: &Network| -> f64 {
            let out = net.forward(&x).output;
            (&out - &y).mapv(|e| e * e).sum() / 2.0
        };

        let grads = net.backward(&x, &net.forward(&x), y.view());
        let eps = 1e-6;
        for (r, c) in [(0, 0), (5, 2), (13, 1)] {
            let mut plus = net.clone();
            plus.w[[r, c]] += eps;
            let mut minus = net.clone();
            minus.w[[r, c]] -= eps;
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
            assert_abs_diff_eq!(grads.w[[r, c]], numeric, epsilon = 1e-6);
        }
        for j in [0, 3] {
            let mut plus = net.clone();
            plus.w2[j] += eps;
            let mut minus = net.clone();
            minus.w2[j] -= eps;
            let numeric = (loss(&plus) - loss(&minus)) / (2.0 * eps);
            assert_abs_diff_eq!(grads.w2[j], numeric, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_training_reduces_error() {
        let data = linear_dataset(480);
        let baseline = {
            let mean = data.targets().iter().sum::<f64>() / data.len() as f64;
            data.targets().iter().map(|y| (y - mean).powi(2)).sum::<f64>() / data.len() as f64
        };

        let fitted = LstmRegressor::new(LstmConfig {
            epochs: 60,
            learning_rate: 0.01,
            ..LstmConfig::default()
        })
        .fit_dataset(&data)
        .unwrap();
        let predictions = fitted.predict(ForecastRequest::Features(&data)).unwrap();

        let mse = predictions
            .iter()
            .zip(data.targets())
            .map(|(p, y)| (p - y).powi(2))
            .sum::<f64>()
            / data.len() as f64;
        assert_eq!(predictions.len(), data.len());
        assert!(mse < baseline * 0.2, "mse {mse} vs baseline {baseline}");
    }

    #[test]
    fn test_seeded_training_is_reproducible() {
        let data = linear_dataset(64);
        let config = LstmConfig {
            epochs: 2,
            ..LstmConfig::default()
        };
        let a = LstmRegressor::new(config.clone()).fit_dataset(&data).unwrap();
        let b = LstmRegressor::new(config).fit_dataset(&data).unwrap();
        assert_eq!(
            a.predict_rows(data.features()).unwrap(),
            b.predict_rows(data.features()).unwrap()
        );
    }
}
