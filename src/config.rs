//! TOML-based scenario configuration and preset definitions.
//!
//! A scenario describes the simulated clock, the weather source, the grid
//! tree under the root network and the interaction assets (fleet
//! coordinators) living outside the tree.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::transport::Address;

/// Top-level scenario configuration parsed from TOML.
///
/// Load from TOML with [`ScenarioConfig::from_toml_file`] or use
/// [`ScenarioConfig::from_preset`] for a built-in scenario.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Domain part of every generated address.
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Master random seed; each asset derives its own from it.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Clock rate and simulated time span.
    pub simulation_time: SimulationTimeConfig,
    /// Weather source.
    #[serde(default)]
    pub weather: WeatherConfig,
    /// Root of the grid tree.
    pub network: NetworkConfig,
    /// Coordinators outside the grid tree.
    #[serde(default)]
    pub interaction_asset: Vec<InteractionAssetConfig>,
}

fn default_domain() -> String {
    "localhost".to_string()
}

fn default_seed() -> u64 {
    42
}

/// Clock rate and simulated time span.
///
/// Timestamps accept RFC 3339 (`2024-06-21T00:00:00Z`) or a naive ISO 8601
/// date-time (`2024-06-21T00:00:00`), interpreted as UTC.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationTimeConfig {
    /// Simulated seconds per real second (must be >= 0).
    pub rate: f64,
    pub simulation_start_date: String,
    pub simulation_end_date: String,
}

impl SimulationTimeConfig {
    /// Parses the start timestamp.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the timestamp is not ISO 8601.
    pub fn start(&self) -> Result<DateTime<Utc>, ConfigError> {
        parse_timestamp(&self.simulation_start_date)
            .ok_or_else(|| timestamp_error("simulation_time.simulation_start_date", &self.simulation_start_date))
    }

    /// Parses the end timestamp.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the timestamp is not ISO 8601.
    pub fn end(&self) -> Result<DateTime<Utc>, ConfigError> {
        parse_timestamp(&self.simulation_end_date)
            .ok_or_else(|| timestamp_error("simulation_time.simulation_end_date", &self.simulation_end_date))
    }
}

/// Weather source; without a CSV path a synthetic profile is used.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeatherConfig {
    pub csv_path: Option<PathBuf>,
}

/// One node of the grid tree, tagged by its `node` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum NodeConfig {
    Network(NetworkConfig),
    Asset(AssetConfig),
}

impl NodeConfig {
    pub fn name(&self) -> &str {
        match self {
            NodeConfig::Network(n) => &n.name,
            NodeConfig::Asset(a) => &a.name,
        }
    }
}

/// Interior node of the grid tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    pub name: String,
    /// Full address; defaults to `name@domain`.
    pub jid: Option<String>,
    #[serde(default)]
    pub children: Vec<NodeConfig>,
}

/// Leaf of the grid tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssetConfig {
    pub name: String,
    pub jid: Option<String>,
    /// Device type, one of [`crate::devices::ASSET_TYPES`].
    #[serde(rename = "type")]
    pub asset_type: String,
    pub max_power_kw: Option<f64>,
    #[serde(default = "default_factor")]
    pub factor: f64,
    /// Type-specific arguments (`smart`, `coordinator`, `period_minutes`,
    /// `start_hour`, `stop_hour`).
    #[serde(default)]
    pub args: toml::Table,
}

/// Coordinator living outside the grid tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InteractionAssetConfig {
    pub name: String,
    pub jid: Option<String>,
    /// Coordinator type; only `cpo` exists.
    #[serde(rename = "type")]
    pub asset_type: String,
    /// Correction factor of the proportional controller.
    #[serde(default = "default_factor")]
    pub factor: f64,
}

fn default_factor() -> f64 {
    1.0
}

/// Resolves a node's address: `jid` if given, `name@domain` otherwise.
pub fn node_address(name: &str, jid: Option<&str>, domain: &str) -> String {
    match jid {
        Some(jid) => jid.to_string(),
        None => format!("{name}@{domain}"),
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"simulation_time.rate"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn timestamp_error(field: &str, value: &str) -> ConfigError {
    ConfigError::new(field, format!("\"{value}\" is not an ISO 8601 timestamp"))
}

/// Parses RFC 3339 or a naive ISO 8601 date-time (as UTC).
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|t| t.and_utc())
}

const DEMO_TOML: &str = r#"
seed = 42

[simulation_time]
rate = 3600.0
simulation_start_date = "2024-06-21T00:00:00"
simulation_end_date = "2024-06-22T00:00:00"

[network]
name = "main_network"

[[network.children]]
node = "network"
name = "street_1"

[[network.children.children]]
node = "asset"
name = "solar_1"
type = "solarpanel"
max_power_kw = 8.0

[[network.children.children]]
node = "asset"
name = "charging_station_1"
type = "chargingstation"
max_power_kw = 11.0
args = { smart = true, coordinator = "cpo" }

[[network.children.children]]
node = "asset"
name = "charging_station_2"
type = "chargingstation"
max_power_kw = 11.0
args = { smart = true, coordinator = "cpo" }

[[network.children]]
node = "asset"
name = "wind_1"
type = "windturbine"
max_power_kw = 15.0

[[network.children]]
node = "asset"
name = "school"
type = "constant"
max_power_kw = 4.0

[[network.children]]
node = "asset"
name = "charging_station_3"
type = "chargingstation"
max_power_kw = 22.0
args = { smart = true, start_hour = 17, stop_hour = 23 }

[[interaction_asset]]
name = "cpo"
type = "cpo"
"#;

const CONSTANT_TOML: &str = r#"
[simulation_time]
rate = 3600.0
simulation_start_date = "2024-01-01T00:00:00"
simulation_end_date = "2024-01-01T01:00:00"

[network]
name = "main_network"

[[network.children]]
node = "network"
name = "feeder"

[[network.children.children]]
node = "asset"
name = "load_a"
type = "constant"
max_power_kw = 1.0

[[network.children.children]]
node = "asset"
name = "load_b"
type = "constant"
max_power_kw = 2.0

[[network.children.children]]
node = "asset"
name = "load_c"
type = "constant"
max_power_kw = 3.0
"#;

impl ScenarioConfig {
    /// Available preset names.
    pub const PRESETS: &[&str] = &["demo", "constant"];

    /// Mixed grid: solar, wind, a constant load and charging stations, two
    /// of them coordinated by a fleet coordinator.
    ///
    /// # Errors
    ///
    /// Never fails for the shipped preset text.
    pub fn demo() -> Result<Self, ConfigError> {
        Self::from_toml_str(DEMO_TOML)
    }

    /// Three constant loads of 1, 2 and 3 kW under one feeder.
    ///
    /// # Errors
    ///
    /// Never fails for the shipped preset text.
    pub fn constant() -> Result<Self, ConfigError> {
        Self::from_toml_str(CONSTANT_TOML)
    }

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "demo" => Self::demo(),
            "constant" => Self::constant(),
            _ => Err(ConfigError::new(
                "preset",
                format!("unknown preset \"{name}\", available: {}", Self::PRESETS.join(", ")),
            )),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("scenario", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Address of the root network.
    pub fn root_address(&self) -> String {
        node_address(&self.network.name, self.network.jid.as_deref(), &self.domain)
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid. Unknown device
    /// types and missing device parameters are not checked here: they only
    /// skip the node at construction.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.domain.is_empty() || self.domain.contains(['@', '/']) {
            errors.push(ConfigError::new("domain", format!("invalid domain \"{}\"", self.domain)));
        }

        let t = &self.simulation_time;
        if !t.rate.is_finite() || t.rate < 0.0 {
            errors.push(ConfigError::new("simulation_time.rate", format!("must be >= 0, got {}", t.rate)));
        }
        match (t.start(), t.end()) {
            (Ok(start), Ok(end)) if end <= start => errors.push(ConfigError::new(
                "simulation_time.simulation_end_date",
                "must be after simulation_start_date",
            )),
            (start, end) => errors.extend(start.err().into_iter().chain(end.err())),
        }

        let mut seen = HashSet::new();
        self.validate_network(&self.network, "network", &mut seen, &mut errors);

        for (i, ia) in self.interaction_asset.iter().enumerate() {
            let path = format!("interaction_asset[{i}]");
            self.validate_address(&path, &ia.name, ia.jid.as_deref(), &mut seen, &mut errors);
            if !ia.factor.is_finite() || ia.factor < 0.0 {
                errors.push(ConfigError::new(format!("{path}.factor"), "must be >= 0"));
            }
        }

        errors
    }

    fn validate_network(
        &self,
        network: &NetworkConfig,
        path: &str,
        seen: &mut HashSet<String>,
        errors: &mut Vec<ConfigError>,
    ) {
        self.validate_address(path, &network.name, network.jid.as_deref(), seen, errors);
        for (i, child) in network.children.iter().enumerate() {
            let child_path = format!("{path}.children[{i}]");
            match child {
                NodeConfig::Network(n) => self.validate_network(n, &child_path, seen, errors),
                NodeConfig::Asset(a) => {
                    self.validate_address(&child_path, &a.name, a.jid.as_deref(), seen, errors);
                    if !a.factor.is_finite() {
                        errors.push(ConfigError::new(format!("{child_path}.factor"), "must be finite"));
                    }
                }
            }
        }
    }

    fn validate_address(
        &self,
        path: &str,
        name: &str,
        jid: Option<&str>,
        seen: &mut HashSet<String>,
        errors: &mut Vec<ConfigError>,
    ) {
        if name.is_empty() {
            errors.push(ConfigError::new(format!("{path}.name"), "must not be empty"));
            return;
        }
        let address = node_address(name, jid, &self.domain);
        match Address::parse(&address) {
            Ok(parsed) => {
                if !seen.insert(parsed.bare().to_string()) {
                    errors.push(ConfigError::new(path, format!("duplicate address \"{address}\"")));
                }
            }
            Err(_) => errors.push(ConfigError::new(path, format!("invalid address \"{address}\""))),
        }
    }
}
