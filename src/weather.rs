//! Weather data: samples, the CSV climate table and a synthetic profile.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use serde::Deserialize;

use crate::error::{GridError, Result};
use crate::protocol::wire::{Quantity, WeatherBroadcast};

/// Weather conditions for one simulated hour.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WeatherSample {
    /// Global horizontal irradiance (W/m²).
    pub irradiance_w_m2: f64,
    /// Ambient air temperature (°C).
    pub ambient_temp_c: f64,
    /// Ground temperature (°C).
    pub ground_temp_c: f64,
    /// Wind speed at hub height (m/s).
    pub wind_speed_m_s: f64,
    /// Air pressure (Pa).
    pub air_pressure_pa: f64,
    /// Cloud coverage (okta, 0-8).
    pub cloud_okta: f64,
    /// Precipitation (mm/hr).
    pub rain_mm_hr: f64,
}

impl From<&WeatherSample> for WeatherBroadcast {
    fn from(s: &WeatherSample) -> Self {
        Self {
            sun_irradiance: Quantity::new("W/m^2", s.irradiance_w_m2),
            ambient_temperature: Quantity::new("°C", s.ambient_temp_c),
            ground_temperature: Quantity::new("°C", s.ground_temp_c),
            wind_speed: Quantity::new("m/s", s.wind_speed_m_s),
            air_pressure: Quantity::new("Pa", s.air_pressure_pa),
            cloud_coverage: Quantity::new("okta", s.cloud_okta),
            rain: Quantity::new("mm/hr", s.rain_mm_hr),
        }
    }
}

impl From<&WeatherBroadcast> for WeatherSample {
    fn from(b: &WeatherBroadcast) -> Self {
        Self {
            irradiance_w_m2: b.sun_irradiance.value,
            ambient_temp_c: b.ambient_temperature.value,
            ground_temp_c: b.ground_temperature.value,
            wind_speed_m_s: b.wind_speed.value,
            air_pressure_pa: b.air_pressure.value,
            cloud_okta: b.cloud_coverage.value,
            rain_mm_hr: b.rain.value,
        }
    }
}

/// One row of the climate CSV. Timestamps use year `0000` so a table
/// covers any simulated year, e.g. `0000-06-21 12:30:00`.
#[derive(Debug, Deserialize)]
struct ClimateRow {
    #[serde(rename = "Local []")]
    local: String,
    #[serde(rename = "Irradiance [W/m^2]")]
    irradiance: f64,
    #[serde(rename = "T_ambient [Degrees Celsius]")]
    ambient: f64,
    #[serde(rename = "T_ground [Degrees Celsius]")]
    ground: f64,
    #[serde(rename = "Wind [m/s]")]
    wind: f64,
    #[serde(rename = "Cloud [okta]")]
    cloud: f64,
    #[serde(rename = "Pressure [Pa]")]
    pressure: f64,
    #[serde(rename = "Rain [mm/hr]")]
    rain: f64,
}

/// `(month, day, hour)` key of an hourly climate table.
type HourKey = (u32, u32, u32);

fn hour_key(t: &impl Datelike, hour: u32) -> HourKey {
    (t.month(), t.day(), hour)
}

/// Where the weather authority gets its samples.
#[derive(Debug, Clone)]
pub enum WeatherSource {
    /// Hourly climate table loaded from CSV.
    Table(HashMap<HourKey, WeatherSample>),
    /// Deterministic diurnal profile.
    Synthetic,
}

impl WeatherSource {
    /// Loads a climate table from a CSV file.
    ///
    /// # Errors
    ///
    /// Returns `GridError::Io` if the file cannot be opened, or
    /// `GridError::Csv` for malformed rows.
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Loads a climate table from any CSV reader.
    ///
    /// # Errors
    ///
    /// Returns `GridError::Csv` for malformed rows and
    /// `GridError::Construction` for unparseable timestamps.
    pub fn from_csv_reader(reader: impl Read) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut table = HashMap::new();
        for row in rdr.deserialize() {
            let row: ClimateRow = row?;
            let local = NaiveDateTime::parse_from_str(&row.local, "%Y-%m-%d %H:%M:%S").map_err(|e| {
                GridError::Construction {
                    node: "weather".to_string(),
                    reason: format!("bad timestamp \"{}\": {e}", row.local),
                }
            })?;
            table.insert(
                hour_key(&local, local.hour()),
                WeatherSample {
                    irradiance_w_m2: row.irradiance,
                    ambient_temp_c: row.ambient,
                    ground_temp_c: row.ground,
                    wind_speed_m_s: row.wind,
                    air_pressure_pa: row.pressure,
                    cloud_okta: row.cloud,
                    rain_mm_hr: row.rain,
                },
            );
        }
        Ok(WeatherSource::Table(table))
    }

    /// Returns the sample for the simulated hour containing `sim_time`.
    ///
    /// A table without that hour yields `None`.
    pub fn sample_at(&self, sim_time: DateTime<Utc>) -> Option<WeatherSample> {
        match self {
            WeatherSource::Table(table) => table.get(&hour_key(&sim_time, sim_time.hour())).copied(),
            WeatherSource::Synthetic => Some(synthetic_sample(sim_time)),
        }
    }
}

/// Clear-sky daylight between 06:00 and 18:00, mild temperature swing and a
/// steady breeze that picks up in the afternoon.
fn synthetic_sample(sim_time: DateTime<Utc>) -> WeatherSample {
    let hour = sim_time.hour() as f64 + sim_time.minute() as f64 / 60.0;
    let daylight = ((hour - 6.0) / 12.0 * PI).sin().max(0.0);
    let day_of_year = sim_time.ordinal() as f64;
    let season = 0.6 + 0.4 * ((day_of_year - 80.0) / 365.0 * 2.0 * PI).sin().max(0.0);

    WeatherSample {
        irradiance_w_m2: 1000.0 * daylight * season,
        ambient_temp_c: 10.0 + 8.0 * season * ((hour - 9.0) / 24.0 * 2.0 * PI).sin(),
        ground_temp_c: 10.0 + 3.0 * season,
        wind_speed_m_s: 6.0 + 4.0 * ((hour - 9.0) / 24.0 * 2.0 * PI).sin(),
        air_pressure_pa: 101_325.0,
        cloud_okta: 0.0,
        rain_mm_hr: 0.0,
    }
}
