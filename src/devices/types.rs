//! Common types and traits for asset power models.

use chrono::{DateTime, Utc};

use crate::weather::WeatherSample;

/// Contextual information passed to power models on every measurement.
///
/// # Fields
/// * `sim_time` - Current simulated time
/// * `weather` - Latest weather broadcast, if the asset received one
#[derive(Debug, Clone, Copy)]
pub struct AssetContext<'a> {
    pub sim_time: DateTime<Utc>,
    pub weather: Option<&'a WeatherSample>,
}

impl<'a> AssetContext<'a> {
    /// Creates a context without weather data.
    pub fn new(sim_time: DateTime<Utc>) -> Self {
        Self {
            sim_time,
            weather: None,
        }
    }

    /// Creates a context with the given weather sample.
    pub fn with_weather(sim_time: DateTime<Utc>, weather: &'a WeatherSample) -> Self {
        Self {
            sim_time,
            weather: Some(weather),
        }
    }
}

/// Trait defining an asset that produces or consumes electricity.
///
/// The asset agent owns one boxed `PowerModel` and calls it on each
/// measurement, so implementations only describe physics and control
/// hooks, never messaging.
pub trait PowerModel: Send {
    /// Returns the power at the given simulated moment.
    ///
    /// Positive values indicate consumption (load),
    /// negative values indicate generation.
    ///
    /// # Arguments
    ///
    /// * `context` - Simulated time and the latest weather sample
    ///
    /// # Returns
    ///
    /// Power in kilowatts (kW)
    fn power_kw(&mut self, context: &AssetContext<'_>) -> f64;

    /// Returns the type name used in topology files.
    fn device_type(&self) -> &'static str;

    /// Returns the declared maximum power in kW (magnitude).
    fn max_power_kw(&self) -> f64;

    /// Returns a short human-readable status.
    fn status(&self) -> &'static str;

    /// Whether the asset needs `weather` broadcasts.
    fn needs_weather(&self) -> bool {
        false
    }

    /// Whether the asset accepts setpoints.
    fn is_controllable(&self) -> bool {
        false
    }

    /// Current setpoint of a controllable asset.
    fn setpoint_kw(&self) -> Option<f64> {
        None
    }

    /// Applies a new setpoint, clamped to `[0, max_power_kw]`.
    ///
    /// Ignored by uncontrollable assets.
    fn apply_setpoint(&mut self, _setpoint_kw: f64) {}

    /// Whether a controllable asset is currently drawing power.
    fn is_active(&self) -> bool {
        true
    }
}
