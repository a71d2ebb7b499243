pub mod engine;
pub mod features;
pub mod metrics;
pub mod split;
pub mod weather;

pub use engine::{ForecastHarness, PredictionSeries};
pub use features::{FeatureBuilder, FeatureRow, FEATURE_NAMES};
pub use metrics::{
    ComparisonTable, EvaluationError, Evaluation, Evaluator, ForecastMetrics, MetricsTable,
    ModelScore,
};
pub use split::{Splitter, SplitError, TrainTestSplit, Window};
pub use weather::{align, MeteostatClient, WeatherAligner, WeatherError, WeatherSource};
