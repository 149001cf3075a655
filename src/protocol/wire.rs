//! JSON bodies exchanged between agents.
//!
//! Every measured quantity travels as a `{unit, value}` pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message type names carried in the `type` metadata entry.
pub mod kind {
    pub const SUBSCRIBE: &str = "subscribe";
    pub const REGISTER_CHILD: &str = "register_child";
    pub const POWER_UPDATE: &str = "power_update";
    pub const TIME: &str = "time";
    pub const WEATHER: &str = "weather";
    pub const CONGESTION: &str = "congestion";
    pub const NEW_SETPOINT: &str = "new_setpoint";
    pub const RATE_CHANGE: &str = "rate_change";
    pub const INFO: &str = "info";
    pub const REGISTER_CONTROLLABLE: &str = "register_controllable";
    pub const LOAD_REPORT: &str = "load_report";
}

/// Topic names published through mailing lists.
pub mod topic {
    pub const TIME: &str = "time";
    pub const WEATHER: &str = "weather";
    pub const CONGESTION: &str = "congestion";
    pub const INFO: &str = "info";
}

pub const UNIT_KW: &str = "kW";
pub const UNIT_ISO_DATETIME: &str = "ISO datetime";
pub const UNIT_FACTOR: &str = "factor (no unit)";

/// A value tagged with its unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity<T> {
    #[serde(default)]
    pub unit: String,
    pub value: T,
}

impl<T> Quantity<T> {
    pub fn new(unit: &str, value: T) -> Self {
        Self {
            unit: unit.to_string(),
            value,
        }
    }
}

/// `power_update`: child to parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerUpdate {
    pub value: f64,
    #[serde(default = "default_kw_unit")]
    pub unit: String,
}

impl PowerUpdate {
    pub fn kw(value: f64) -> Self {
        Self {
            value,
            unit: UNIT_KW.to_string(),
        }
    }
}

fn default_kw_unit() -> String {
    UNIT_KW.to_string()
}

/// `time`: clock authority broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBroadcast {
    pub real_broadcast_time: Quantity<DateTime<Utc>>,
    pub sim_broadcast_time: Quantity<DateTime<Utc>>,
    pub rate: Quantity<f64>,
}

impl TimeBroadcast {
    pub fn new(real: DateTime<Utc>, sim: DateTime<Utc>, rate: f64) -> Self {
        Self {
            real_broadcast_time: Quantity::new(UNIT_ISO_DATETIME, real),
            sim_broadcast_time: Quantity::new(UNIT_ISO_DATETIME, sim),
            rate: Quantity::new(UNIT_FACTOR, rate),
        }
    }
}

/// `congestion`: root network broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CongestionBroadcast {
    pub congestion: Quantity<f64>,
}

impl CongestionBroadcast {
    pub fn kw(value: f64) -> Self {
        Self {
            congestion: Quantity::new(UNIT_KW, value),
        }
    }
}

/// `new_setpoint`: controller to controllable leaf.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetpointCommand {
    pub new_setpoint: f64,
}

/// `rate_change`: orchestrator to clock authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateChange {
    pub rate: Quantity<f64>,
}

impl RateChange {
    pub fn new(rate: f64) -> Self {
        Self {
            rate: Quantity::new(UNIT_FACTOR, rate),
        }
    }
}

/// `load_report`: controllable leaf to fleet coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadReport {
    pub value: f64,
    #[serde(default = "default_kw_unit")]
    pub unit: String,
    pub is_active: bool,
    pub max_power_kw: f64,
}

/// `weather`: weather authority broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherBroadcast {
    pub sun_irradiance: Quantity<f64>,
    pub ambient_temperature: Quantity<f64>,
    pub ground_temperature: Quantity<f64>,
    pub wind_speed: Quantity<f64>,
    pub air_pressure: Quantity<f64>,
    pub cloud_coverage: Quantity<f64>,
    pub rain: Quantity<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn congestion_body_shape() {
        let body = serde_json::to_value(CongestionBroadcast::kw(-2.5)).unwrap();
        assert_eq!(body, json!({"congestion": {"unit": "kW", "value": -2.5}}));
    }

    #[test]
    fn time_body_uses_iso_timestamps() {
        let sim = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let body = serde_json::to_value(TimeBroadcast::new(sim, sim, 60.0)).unwrap();
        assert_eq!(body["sim_broadcast_time"]["value"], json!("2024-06-01T12:00:00Z"));
        assert_eq!(body["rate"]["value"], json!(60.0));
    }

    #[test]
    fn power_update_accepts_missing_unit() {
        let update: PowerUpdate = serde_json::from_value(json!({"value": 3.0})).unwrap();
        assert_eq!(update, PowerUpdate::kw(3.0));
    }

    #[test]
    fn time_body_accepts_offset_timestamps() {
        let body = json!({
            "real_broadcast_time": {"unit": "ISO datetime", "value": "2024-06-01T14:00:00+02:00"},
            "sim_broadcast_time": {"value": "2024-01-01T00:00:00Z"},
            "rate": {"value": 0.0}
        });
        let parsed: TimeBroadcast = serde_json::from_value(body).unwrap();
        assert_eq!(
            parsed.real_broadcast_time.value,
            Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
        );
        assert_eq!(parsed.rate.value, 0.0);
    }
}
