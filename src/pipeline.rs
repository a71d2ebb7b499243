//! End-to-end orchestration
//!
//! `prepare` turns the raw archive and the weather provider into exported
//! train/test feature files; `evaluate` fits every forecaster on a split and
//! writes predictions and metrics. Each step reports the stage it failed in.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::config::Config;
use crate::domain::{validate_hourly_index, HourlySeries, PowerFrame, SeriesError, WeatherFrame};
use crate::error::{Stage, StageContext, StageFailed};
use crate::forecast::{
    Evaluation, Evaluator, FeatureBuilder, FeatureRow, ForecastHarness, MeteostatClient, Splitter,
    TrainTestSplit, WeatherAligner,
};
use crate::ingest::{read_raw_power, ArchiveFetcher, IngestError, Resampler};
use crate::storage::{self, CsvSeriesCache, SeriesCache};

/// Check the hourly invariant and log `name: OK (rows)`.
pub fn validation_gate(name: &str, series: &HourlySeries) -> Result<(), SeriesError> {
    validate_hourly_index(series.index())?;
    info!(series = name, rows = series.len(), "{name}: OK ({} rows)", series.len());
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    config: Arc<Config>,
    use_cache: bool,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            use_cache: true,
        }
    }

    /// Skip cache lookups; fetched and resampled data is still written through.
    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Hourly power from the cache, or from the raw archive via the resampler.
    pub async fn load_power(&self) -> Result<PowerFrame> {
        let cfg = &self.config;
        let cache = CsvSeriesCache::new(cfg.paths.power_cache_path());

        let cached = if self.use_cache {
            cache.lookup().stage(Stage::Resample)?
        } else {
            None
        };
        let hourly = match cached {
            Some(series) => {
                info!(path = %cache.path().display(), "hourly power loaded from cache");
                series
            }
            None => {
                let raw_path = ArchiveFetcher::new(
                    cfg.archive.url.clone(),
                    cfg.archive.timeout(),
                    cfg.archive.max_retries,
                )
                .stage(Stage::Resample)?
                .ensure_raw_file(&cfg.paths.raw_path(), &cfg.paths.archive_path())
                .await
                .stage(Stage::Resample)?;

                let started = Instant::now();
                let series = tokio::task::spawn_blocking(move || -> Result<HourlySeries, IngestError> {
                    let raw = read_raw_power(&raw_path)?;
                    Ok(Resampler::new().resample(&raw.table)?)
                })
                .await
                .context("resampling task did not complete")?
                .stage(Stage::Resample)?;
                info!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "raw power resampled"
                );

                cache.populate(&series).stage(Stage::Resample)?;
                series
            }
        };

        validation_gate("power_hourly", &hourly).stage(Stage::Resample)?;
        info!(rows = hourly.len(), columns = hourly.columns().len(), "hourly power shape");

        let power = PowerFrame::from_series(&hourly, &cfg.features.load_column).stage(Stage::Resample)?;
        info!(undefined_hours = power.undefined_count(), "power frame ready");
        Ok(power)
    }

    /// Aligned weather over the configured train and test span.
    pub async fn load_weather(&self) -> Result<WeatherFrame> {
        let cfg = &self.config;
        let source = MeteostatClient::new(&cfg.weather).stage(Stage::Weather)?;
        let aligner = WeatherAligner::new(source, CsvSeriesCache::new(cfg.paths.weather_cache_path()))
            .use_cache(self.use_cache);

        let (start, end) = cfg.split.date_span();
        let weather = aligner.load(start, end).await.stage(Stage::Weather)?;

        validation_gate("weather_hourly", weather.series()).stage(Stage::Weather)?;
        info!(rows = weather.len(), fields = ?weather.fields(), "weather frame ready");
        Ok(weather)
    }

    fn splitter(&self) -> Result<Splitter> {
        let split = &self.config.split;
        Splitter::new(split.train_window(), split.test_window()).stage(Stage::Split)
    }

    /// Build features, split them and export the three feature files.
    pub async fn prepare(&self) -> Result<TrainTestSplit> {
        let power = self.load_power().await?;
        let weather = self.load_weather().await?;

        let features = FeatureBuilder::new().build(&power, &weather);
        if features.is_empty() {
            return Err(anyhow::anyhow!("no hour has every feature defined")
                .context(StageFailed(Stage::Features)));
        }

        let split = self.splitter()?.split(&features).stage(Stage::Split)?;
        info!(train = split.train.len(), test = split.test.len(), "train/test split");

        let paths = &self.config.paths;
        storage::write_features(&paths.features_full_path(), &features).stage(Stage::Export)?;
        storage::write_features(&paths.train_features_path(), &split.train).stage(Stage::Export)?;
        storage::write_features(&paths.test_features_path(), &split.test).stage(Stage::Export)?;
        Ok(split)
    }

    /// Reload the exported train and test feature files.
    pub fn load_exported_split(&self) -> Result<TrainTestSplit> {
        let paths = &self.config.paths;
        let train = storage::read_features(&paths.train_features_path()).stage(Stage::Split)?;
        let test = storage::read_features(&paths.test_features_path()).stage(Stage::Split)?;

        let rows: Vec<FeatureRow> = train.into_iter().chain(test).collect();
        self.splitter()?.split(&rows).stage(Stage::Split)
    }

    /// Fit every forecaster on `split`, then write predictions and metrics.
    pub fn evaluate_split(&self, split: &TrainTestSplit) -> Result<Evaluation> {
        let harness = ForecastHarness::from_config(&self.config.models);
        let predictions = harness.run(split).stage(Stage::Train)?;
        let evaluation = Evaluator::new()
            .evaluate(&split.test, &predictions)
            .stage(Stage::Evaluate)?;

        let paths = &self.config.paths;
        storage::write_predictions(&paths.predictions_path(), &evaluation.comparison)
            .stage(Stage::Export)?;
        storage::write_metrics(&paths.metrics_path(), &evaluation.metrics).stage(Stage::Export)?;
        Ok(evaluation)
    }

    /// Evaluate from the exported feature files on a blocking thread.
    pub async fn evaluate(&self) -> Result<Evaluation> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            let split = this.load_exported_split()?;
            this.evaluate_split(&split)
        })
        .await
        .context("evaluation task did not complete")?
    }

    pub async fn run(&self) -> Result<Evaluation> {
        let split = self.prepare().await?;
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.evaluate_split(&split))
            .await
            .context("evaluation task did not complete")?
    }
}
