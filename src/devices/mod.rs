//! Asset power models and the factory that builds them from topology
//! entries.

/// EV charging station with a daily window.
pub mod charging_station;
/// Fixed-power load.
pub mod constant;
/// Weather-driven solar PV panel.
pub mod solar;
pub mod types;
/// Wind turbine power curve.
pub mod wind;

pub use charging_station::ChargingStation;
pub use constant::ConstantLoad;
pub use solar::SolarPanel;
pub use types::{AssetContext, PowerModel};
pub use wind::WindTurbine;

use crate::error::{GridError, Result};

/// Asset type names accepted by [`build_model`].
pub const ASSET_TYPES: &[&str] = &["constant", "solarpanel", "windturbine", "chargingstation"];

/// Builds the power model for an asset entry.
///
/// # Arguments
///
/// * `name` - Asset name, used in error messages
/// * `asset_type` - One of [`ASSET_TYPES`]
/// * `max_power_kw` - Declared maximum (required by every type)
/// * `factor` - Output multiplier
/// * `args` - Free-form type-specific arguments
/// * `seed` - Seed for models with random behaviour
///
/// # Errors
///
/// Returns `GridError::Construction` for an unknown type, a missing
/// `max_power_kw`, or a badly typed argument.
pub fn build_model(
    name: &str,
    asset_type: &str,
    max_power_kw: Option<f64>,
    factor: f64,
    args: &toml::Table,
    seed: u64,
) -> Result<Box<dyn PowerModel>> {
    let construction = |reason: String| GridError::Construction {
        node: name.to_string(),
        reason,
    };
    if !ASSET_TYPES.contains(&asset_type) {
        return Err(construction(format!(
            "unknown asset type \"{asset_type}\", available: {}",
            ASSET_TYPES.join(", ")
        )));
    }
    let max_kw = max_power_kw.ok_or_else(|| construction("missing max_power_kw".to_string()))?;
    if !max_kw.is_finite() {
        return Err(construction(format!("max_power_kw must be finite, got {max_kw}")));
    }

    let model: Box<dyn PowerModel> = match asset_type {
        "constant" => Box::new(ConstantLoad::new(max_kw * factor)),
        "solarpanel" => Box::new(SolarPanel::new(max_kw, factor)),
        "windturbine" => Box::new(WindTurbine::new(max_kw, factor)),
        _ => {
            let smart = bool_arg(args, "smart").map_err(construction)?.unwrap_or(false);
            let start = hour_arg(args, "start_hour").map_err(construction)?;
            let stop = hour_arg(args, "stop_hour").map_err(construction)?;
            match (start, stop) {
                (Some(start), Some(stop)) => Box::new(ChargingStation::with_window(max_kw, factor, smart, start, stop)),
                _ => Box::new(ChargingStation::new(max_kw, factor, smart, seed)),
            }
        }
    };
    Ok(model)
}

fn bool_arg(args: &toml::Table, key: &str) -> std::result::Result<Option<bool>, String> {
    match args.get(key) {
        None => Ok(None),
        Some(toml::Value::Boolean(b)) => Ok(Some(*b)),
        Some(other) => Err(format!("argument \"{key}\" must be a boolean, got {other}")),
    }
}

fn hour_arg(args: &toml::Table, key: &str) -> std::result::Result<Option<u32>, String> {
    match args.get(key) {
        None => Ok(None),
        Some(toml::Value::Integer(h)) if (0..24).contains(h) => Ok(Some(*h as u32)),
        Some(other) => Err(format!("argument \"{key}\" must be an hour in 0..24, got {other}")),
    }
}
