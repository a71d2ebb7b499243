use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

use crate::domain::timestamp_format;
use crate::forecast::split::Window;
use crate::ml::{EtsConfig, GbtConfig, LstmConfig, SarimaConfig};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub paths: PathsConfig,
    #[validate(nested)]
    pub archive: ArchiveConfig,
    #[validate(nested)]
    pub weather: WeatherConfig,
    pub split: SplitConfig,
    #[validate(nested)]
    pub features: FeaturesConfig,
    #[validate(nested)]
    pub models: ModelsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub results_dir: PathBuf,
    #[validate(length(min = 1))]
    pub raw_file: String,
    #[validate(length(min = 1))]
    pub archive_file: String,
    #[validate(length(min = 1))]
    pub power_cache_file: String,
    #[validate(length(min = 1))]
    pub weather_cache_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            results_dir: PathBuf::from("results"),
            raw_file: "household_power_consumption.txt".into(),
            archive_file: "household_power_consumption.zip".into(),
            power_cache_file: "power_hourly_2006_2010.csv".into(),
            weather_cache_file: "meteostat_paris_2006_2010.csv".into(),
        }
    }
}

impl PathsConfig {
    pub fn raw_path(&self) -> PathBuf {
        self.data_dir.join(&self.raw_file)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.data_dir.join(&self.archive_file)
    }

    pub fn power_cache_path(&self) -> PathBuf {
        self.data_dir.join(&self.power_cache_file)
    }

    pub fn weather_cache_path(&self) -> PathBuf {
        self.data_dir.join(&self.weather_cache_file)
    }

    pub fn features_full_path(&self) -> PathBuf {
        self.results_dir.join("features_full.csv")
    }

    pub fn train_features_path(&self) -> PathBuf {
        self.results_dir.join("train_features.csv")
    }

    pub fn test_features_path(&self) -> PathBuf {
        self.results_dir.join("test_features.csv")
    }

    pub fn predictions_path(&self) -> PathBuf {
        self.results_dir.join("predictions_test.csv")
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.results_dir.join("model_results.csv")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ArchiveConfig {
    #[validate(url)]
    pub url: String,
    #[validate(range(min = 1))]
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            url: "https://archive.ics.uci.edu/ml/machine-learning-databases/00235/household_power_consumption.zip"
                .into(),
            timeout_seconds: 90,
            max_retries: 3,
        }
    }
}

impl ArchiveConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct WeatherConfig {
    #[validate(url)]
    pub base_url: String,
    /// Sent as `x-rapidapi-key` when set.
    pub api_key: Option<String>,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
    /// Longest span, in days, requested from the provider in one call.
    #[validate(range(min = 1, max = 30))]
    pub chunk_days: u32,
    #[validate(range(min = 1))]
    pub timeout_seconds: u64,
    pub max_retries: u32,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            base_url: "https://meteostat.p.rapidapi.com".into(),
            api_key: None,
            latitude: 48.8566,
            longitude: 2.3522,
            chunk_days: 30,
            timeout_seconds: 30,
            max_retries: 3,
        }
    }
}

impl WeatherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Inclusive train and test boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitConfig {
    #[serde(with = "timestamp_format")]
    pub train_start: NaiveDateTime,
    #[serde(with = "timestamp_format")]
    pub train_end: NaiveDateTime,
    #[serde(with = "timestamp_format")]
    pub test_start: NaiveDateTime,
    #[serde(with = "timestamp_format")]
    pub test_end: NaiveDateTime,
}

impl Default for SplitConfig {
    fn default() -> Self {
        let at = |y, m, d, h, min, s| {
            NaiveDate::from_ymd_opt(y, m, d)
                .and_then(|date| date.and_hms_opt(h, min, s))
                .unwrap_or_default()
        };
        Self {
            train_start: at(2006, 1, 1, 0, 0, 0),
            train_end: at(2009, 12, 31, 23, 59, 59),
            test_start: at(2010, 1, 1, 0, 0, 0),
            test_end: at(2010, 12, 31, 23, 59, 59),
        }
    }
}

impl SplitConfig {
    pub fn train_window(&self) -> Window {
        Window::new(self.train_start, self.train_end)
    }

    pub fn test_window(&self) -> Window {
        Window::new(self.test_start, self.test_end)
    }

    /// Calendar days covering both windows, for the weather query.
    pub fn date_span(&self) -> (NaiveDate, NaiveDate) {
        let start = self.train_start.min(self.test_start).date();
        let end = self.train_end.max(self.test_end).date();
        (start, end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct FeaturesConfig {
    /// Raw measurement column used as `load`.
    #[validate(length(min = 1))]
    pub load_column: String,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            load_column: "Global_active_power".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
pub struct ModelsConfig {
    #[validate(nested)]
    pub sarima: SarimaConfig,
    #[validate(nested)]
    pub ets: EtsConfig,
    #[validate(nested)]
    pub gbt: GbtConfig,
    #[validate(nested)]
    pub lstm: LstmConfig,
}

impl Config {
    /// Built-in defaults, overridden by the TOML file (if it exists) and then
    /// by `LOADCAST__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let cfg: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("LOADCAST__").split("__"))
            .extract()
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;
        cfg.validate().context("invalid configuration")?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.paths.raw_path(), PathBuf::from("data/household_power_consumption.txt"));
        assert_eq!(cfg.paths.metrics_path(), PathBuf::from("results/model_results.csv"));
        assert_eq!(
            cfg.split.date_span(),
            (
                NaiveDate::from_ymd_opt(2006, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2010, 12, 31).unwrap()
            )
        );
    }

    #[test]
    fn test_file_and_env_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "loadcast.toml",
                r#"
                [split]
                test_start = "2009-01-01 00:00:00"

                [models.gbt]
                n_trees = 50
                "#,
            )?;
            jail.set_env("LOADCAST__WEATHER__LATITUDE", "52.52");
            jail.set_env("LOADCAST__MODELS__LSTM__EPOCHS", "3");

            let cfg = Config::load(Some(Path::new("loadcast.toml"))).map_err(|e| e.to_string())?;
            assert_eq!(cfg.models.gbt.n_trees, 50);
            assert_eq!(cfg.models.gbt.max_depth, 6);
            assert_eq!(cfg.models.lstm.epochs, 3);
            assert_eq!(cfg.weather.latitude, 52.52);
            assert_eq!(cfg.split.test_start.to_string(), "2009-01-01 00:00:00");
            Ok(())
        });
    }

    #[test]
    fn test_rejects_invalid_values() {
        Jail::expect_with(|jail| {
            jail.set_env("LOADCAST__WEATHER__CHUNK_DAYS", "45");
            assert!(Config::load(Some(Path::new("missing.toml"))).is_err());
            Ok(())
        });
    }
}
