//! Power and weather frames built on top of [`HourlySeries`].

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{EnumIter, IntoEnumIterator};

use super::series::{validate_hourly_index, HourlySeries, SeriesError};

/// Hourly household load, the forecasting target.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerFrame {
    index: Vec<NaiveDateTime>,
    load: Vec<Option<f64>>,
}

impl PowerFrame {
    pub fn new(index: Vec<NaiveDateTime>, load: Vec<Option<f64>>) -> Result<Self, SeriesError> {
        if index.len() != load.len() {
            return Err(SeriesError::LengthMismatch {
                index: index.len(),
                rows: load.len(),
            });
        }
        validate_hourly_index(&index)?;
        Ok(Self { index, load })
    }

    /// Select the load column out of a resampled multi-field power series.
    pub fn from_series(series: &HourlySeries, load_column: &str) -> Result<Self, SeriesError> {
        Ok(Self {
            index: series.index().to_vec(),
            load: series.column(load_column)?,
        })
    }

    pub fn index(&self) -> &[NaiveDateTime] {
        &self.index
    }

    pub fn load(&self) -> &[Option<f64>] {
        &self.load
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of hours whose load is undefined.
    pub fn undefined_count(&self) -> usize {
        self.load.iter().filter(|v| v.is_none()).count()
    }
}

/// Canonical weather fields, in column order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::AsRefStr,
    EnumIter,
)]
pub enum WeatherField {
    #[strum(serialize = "temp_c")]
    #[serde(rename = "temp_c")]
    TempC,
    #[strum(serialize = "rel_humidity")]
    #[serde(rename = "rel_humidity")]
    RelHumidity,
    #[strum(serialize = "wind_speed")]
    #[serde(rename = "wind_speed")]
    WindSpeed,
}

impl WeatherField {
    /// Map a provider field name onto its canonical field, if known.
    pub fn from_provider_name(name: &str) -> Option<Self> {
        match name.trim() {
            "t" | "temp" | "temperature" | "temperature_2m" | "temp_c" => Some(Self::TempC),
            "r" | "rhum" | "relative_humidity" | "relative_humidity_2m" | "rel_humidity" => {
                Some(Self::RelHumidity)
            }
            "w" | "wspd" | "wind_speed_10m" | "wind_speed" => Some(Self::WindSpeed),
            _ => None,
        }
    }

    pub fn position(self) -> usize {
        match self {
            Self::TempC => 0,
            Self::RelHumidity => 1,
            Self::WindSpeed => 2,
        }
    }
}

/// Weather readings for one hour, one slot per canonical field.
pub type WeatherReading = [Option<f64>; 3];

/// Hourly weather restricted to canonical fields present upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherFrame {
    series: HourlySeries,
    fields: Vec<WeatherField>,
}

impl WeatherFrame {
    /// Wrap an hourly series whose columns must all be canonical field names.
    pub fn new(series: HourlySeries) -> Result<Self, SeriesError> {
        let fields = series
            .columns()
            .iter()
            .map(|name| {
                WeatherField::iter()
                    .find(|field| field.as_ref() == name)
                    .ok_or_else(|| SeriesError::UnknownColumn(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { series, fields })
    }

    pub fn series(&self) -> &HourlySeries {
        &self.series
    }

    pub fn fields(&self) -> &[WeatherField] {
        &self.fields
    }

    pub fn has_field(&self, field: WeatherField) -> bool {
        self.fields.contains(&field)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Per-hour readings keyed by timestamp; absent fields stay `None`.
    pub fn readings(&self) -> HashMap<NaiveDateTime, WeatherReading> {
        self.series
            .iter()
            .map(|(ts, values)| {
                let mut reading: WeatherReading = [None; 3];
                for (field, value) in self.fields.iter().zip(values) {
                    reading[field.position()] = *value;
                }
                (ts, reading)
            })
            .collect()
    }
}
