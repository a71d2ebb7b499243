//! Gradient-boosted regression trees over smartcore CART trees.
//!
//! Squared-error boosting: start from the target mean, then fit each tree
//! to the current residuals on a random subset of rows and columns and add
//! it to the ensemble scaled by the learning rate.

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_regressor::{
    DecisionTreeRegressor, DecisionTreeRegressorParameters,
};
use tracing::debug;
use validator::Validate;

use super::{features_of, Dataset, FittedModel, ForecastRequest, Forecaster, ModelError, ModelInput, ModelKind};

type Tree = DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct GbtConfig {
    #[validate(range(min = 1))]
    pub n_trees: usize,
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub learning_rate: f64,
    #[validate(range(min = 1))]
    pub max_depth: u16,
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub subsample: f64,
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    pub colsample: f64,
    #[validate(range(min = 1))]
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for GbtConfig {
    fn default() -> Self {
        Self {
            n_trees: 300,
            learning_rate: 0.05,
            max_depth: 6,
            subsample: 0.9,
            colsample: 0.9,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GradientBoostedTrees {
    config: GbtConfig,
}

impl GradientBoostedTrees {
    pub fn new(config: GbtConfig) -> Self {
        Self { config }
    }

    fn tree_parameters(&self) -> DecisionTreeRegressorParameters {
        DecisionTreeRegressorParameters::default()
            .with_max_depth(self.config.max_depth)
            .with_min_samples_leaf(self.config.min_samples_leaf)
            .with_min_samples_split(2 * self.config.min_samples_leaf)
    }

    pub fn fit_dataset(&self, train: &Dataset) -> Result<BoostedEnsemble, ModelError> {
        let n = train.len();
        let width = train.width();
        if n < 2 || width == 0 {
            return Err(ModelError::InsufficientData {
                model: ModelKind::GradientBoosting,
                needed: 2,
                got: n,
            });
        }

        let cfg = &self.config;
        let rows_per_tree = fraction_of(n, cfg.subsample);
        let cols_per_tree = fraction_of(width, cfg.colsample);
        let mut rng = StdRng::seed_from_u64(cfg.seed);

        let targets = train.targets();
        let base = targets.iter().sum::<f64>() / n as f64;
        let mut fitted = vec![base; n];
        let mut stages = Vec::with_capacity(cfg.n_trees);

        for stage in 0..cfg.n_trees {
            let rows = sorted_sample(&mut rng, n, rows_per_tree);
            let columns = sorted_sample(&mut rng, width, cols_per_tree);

            let x = matrix(train.features(), &rows, &columns);
            let residuals: Vec<f64> = rows.iter().map(|&i| targets[i] - fitted[i]).collect();
            let tree = Tree::fit(&x, &residuals, self.tree_parameters()).map_err(|e| {
                ModelError::Training {
                    model: ModelKind::GradientBoosting,
                    message: format!("tree {stage}: {e:?}"),
                }
            })?;

            let all_rows: Vec<usize> = (0..n).collect();
            let step = predict_tree(&tree, &matrix(train.features(), &all_rows, &columns))?;
            for (f, s) in fitted.iter_mut().zip(&step) {
                *f += cfg.learning_rate * s;
            }
            stages.push(Stage { columns, tree });

            if (stage + 1) % 50 == 0 {
                let mse = fitted
                    .iter()
                    .zip(targets)
                    .map(|(f, y)| (f - y).powi(2))
                    .sum::<f64>()
                    / n as f64;
                debug!(trees = stage + 1, train_mse = mse, "boosting progress");
            }
        }

        Ok(BoostedEnsemble {
            base,
            learning_rate: cfg.learning_rate,
            width,
            stages,
        })
    }
}

impl Forecaster for GradientBoostedTrees {
    fn kind(&self) -> ModelKind {
        ModelKind::GradientBoosting
    }

    fn input(&self) -> ModelInput {
        ModelInput::Exogenous
    }

    fn fit(&self, train: &Dataset) -> Result<Box<dyn FittedModel>, ModelError> {
        Ok(Box::new(self.fit_dataset(train)?))
    }
}

struct Stage {
    columns: Vec<usize>,
    tree: Tree,
}

pub struct BoostedEnsemble {
    base: f64,
    learning_rate: f64,
    width: usize,
    stages: Vec<Stage>,
}

impl BoostedEnsemble {
    pub fn n_trees(&self) -> usize {
        self.stages.len()
    }

    pub fn predict_rows(&self, features: &[Vec<f64>]) -> Result<Vec<f64>, ModelError> {
        let mut out = vec![self.base; features.len()];
        if features.is_empty() {
            return Ok(out);
        }
        let all_rows: Vec<usize> = (0..features.len()).collect();
        for stage in &self.stages {
            let step = predict_tree(&stage.tree, &matrix(features, &all_rows, &stage.columns))?;
            for (o, s) in out.iter_mut().zip(&step) {
                *o += self.learning_rate * s;
            }
        }
        Ok(out)
    }
}

impl FittedModel for BoostedEnsemble {
    fn predict(&self, request: ForecastRequest<'_>) -> Result<Vec<f64>, ModelError> {
        let dataset = features_of(ModelKind::GradientBoosting, request, self.width)?;
        self.predict_rows(dataset.features())
    }
}

fn fraction_of(total: usize, fraction: f64) -> usize {
    ((total as f64 * fraction).ceil() as usize).clamp(1, total)
}

fn sorted_sample(rng: &mut StdRng, total: usize, amount: usize) -> Vec<usize> {
    let mut picked = sample(rng, total, amount).into_vec();
    picked.sort_unstable();
    picked
}

/// Row-major sub-matrix of the chosen rows and columns.
fn matrix(features: &[Vec<f64>], rows: &[usize], columns: &[usize]) -> DenseMatrix<f64> {
    let mut flat = Vec::with_capacity(rows.len() * columns.len());
    for &r in rows {
        flat.extend(columns.iter().map(|&c| features[r][c]));
    }
    DenseMatrix::new(rows.len(), columns.len(), flat, false)
}

fn predict_tree(tree: &Tree, x: &DenseMatrix<f64>) -> Result<Vec<f64>, ModelError> {
    tree.predict(x).map_err(|e| ModelError::Training {
        model: ModelKind::GradientBoosting,
        message: format!("tree prediction failed: {e:?}"),
    })
}
