//! `vpp-agents` entry point: CLI wiring, scenario loading and the run.

use std::path::Path;
use std::process;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use vpp_agents::cli::Cli;
use vpp_agents::config::{ConfigError, ScenarioConfig};
use vpp_agents::io::export::export_csv;
use vpp_agents::logging::init_logging;
use vpp_agents::runner::{RunOptions, run_scenario};

fn load_scenario(cli: &Cli) -> Result<ScenarioConfig, ConfigError> {
    let mut scenario = match &cli.scenario {
        Some(path) => ScenarioConfig::from_toml_file(path)?,
        None => ScenarioConfig::from_preset(cli.preset_name().unwrap_or(Cli::DEFAULT_PRESET))?,
    };
    if let Some(seed) = cli.seed {
        scenario.seed = seed;
    }
    if let Some(rate) = cli.rate {
        scenario.simulation_time.rate = rate;
    }
    Ok(scenario)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let scenario = match load_scenario(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };
    let errors = scenario.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("{e}");
        }
        process::exit(1);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
            let _ = shutdown_tx.send(true);
        }
    });

    let options = RunOptions {
        max_wall: cli.max_wall_secs.map(Duration::from_secs),
    };
    let report = match run_scenario(&scenario, options, shutdown_rx).await {
        Ok(report) => report,
        Err(e) => {
            error!("{e}");
            process::exit(1);
        }
    };

    for agent in &report.agents {
        println!(
            "{:<40} {:<16} {:<10} {:>10.3} kW  {}",
            agent.address.as_str(),
            agent.kind,
            agent.state.to_string(),
            agent.net_power_kw,
            agent.status
        );
    }
    let s = &report.summary;
    println!(
        "\nroot {}: {} samples, avg {:.3} kW, max {:.3} kW, min {:.3} kW, last {:.3} kW ({:?})",
        report.root, s.samples, s.avg_kw, s.max_kw, s.min_kw, s.last_kw, report.end_reason
    );
    for w in &report.warnings {
        warn!("{w}");
    }

    if let Some(path) = &cli.power_out {
        if let Err(e) = export_csv(&report.samples, Path::new(path)) {
            error!("failed to write CSV: {e}");
            process::exit(1);
        }
        info!(path = %path.display(), "power log written");
    }

    #[cfg(not(feature = "api"))]
    if cli.serve {
        warn!("--serve needs a build with the `api` feature; skipping");
    }

    #[cfg(feature = "api")]
    if cli.serve {
        use std::net::SocketAddr;
        use std::sync::Arc;

        let state = Arc::new(vpp_agents::api::AppState { report });
        let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
        if let Err(e) = vpp_agents::api::serve(state, addr).await {
            error!("API server failed: {e}");
            process::exit(1);
        }
    }
}
