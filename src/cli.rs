//! Command-line arguments of the `vpp-agents` binary.

use std::path::PathBuf;

use clap::Parser;

use crate::logging::DEFAULT_DIRECTIVE;

/// Message-driven virtual power plant simulator.
#[derive(Parser, Debug)]
#[command(name = "vpp-agents")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Load the scenario from a TOML file
    #[arg(long, conflicts_with = "preset")]
    pub scenario: Option<PathBuf>,

    /// Use a built-in scenario (demo, constant)
    #[arg(long)]
    pub preset: Option<String>,

    /// Override the scenario seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override the clock rate (simulated seconds per real second)
    #[arg(long)]
    pub rate: Option<f64>,

    /// Write the root power log to this CSV file
    #[arg(long)]
    pub power_out: Option<PathBuf>,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "VPP_LOG_LEVEL", default_value = DEFAULT_DIRECTIVE)]
    pub log_level: String,

    /// Stop after this many wall-clock seconds
    #[arg(long)]
    pub max_wall_secs: Option<u64>,

    /// Serve the report over HTTP after the run (needs the `api` feature)
    #[arg(long)]
    pub serve: bool,

    /// API server port
    #[arg(long, default_value_t = 3000, requires = "serve")]
    pub port: u16,
}

impl Cli {
    /// Preset used when neither `--scenario` nor `--preset` is given.
    pub const DEFAULT_PRESET: &'static str = "demo";

    /// Name of the preset to load, if the scenario is not read from a file.
    pub fn preset_name(&self) -> Option<&str> {
        match (&self.scenario, &self.preset) {
            (Some(_), _) => None,
            (None, Some(name)) => Some(name),
            (None, None) => Some(Self::DEFAULT_PRESET),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_demo_preset() {
        let cli = Cli::try_parse_from(["vpp-agents"]).unwrap();
        assert_eq!(cli.preset_name(), Some("demo"));
        assert_eq!(cli.log_level, DEFAULT_DIRECTIVE);
        assert!(cli.max_wall_secs.is_none());
    }

    #[test]
    fn scenario_file_disables_preset() {
        let cli = Cli::try_parse_from(["vpp-agents", "--scenario", "grid.toml", "--seed", "7"]).unwrap();
        assert_eq!(cli.preset_name(), None);
        assert_eq!(cli.seed, Some(7));
    }

    #[test]
    fn scenario_and_preset_conflict() {
        let err = Cli::try_parse_from(["vpp-agents", "--scenario", "grid.toml", "--preset", "demo"]);
        assert!(err.is_err());
    }

    #[test]
    fn port_requires_serve() {
        assert!(Cli::try_parse_from(["vpp-agents", "--port", "8080"]).is_err());
        let cli = Cli::try_parse_from(["vpp-agents", "--serve", "--port", "8080"]).unwrap();
        assert!(cli.serve);
        assert_eq!(cli.port, 8080);
    }

    #[test]
    fn rejects_unknown_argument() {
        assert!(Cli::try_parse_from(["vpp-agents", "--bogus"]).is_err());
    }
}
