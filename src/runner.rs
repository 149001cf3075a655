//! Orchestrator: builds the agents of a scenario, runs the clock until the
//! end of the simulated span and tears everything down in order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agents::asset::{AssetOptions, DEFAULT_MEASURE_PERIOD};
use crate::agents::{
    AgentCore, AgentHandle, AgentInfo, AssetAgent, FleetCoordinator, NetworkAgent, NetworkReport,
    TimeAgent, Wake, WeatherAgent,
};
use crate::config::{AssetConfig, InteractionAssetConfig, NetworkConfig, NodeConfig, ScenarioConfig, node_address};
use crate::devices::build_model;
use crate::error::{GridError, Result};
use crate::protocol::Subscriptions;
use crate::protocol::wire::{RateChange, TimeBroadcast, kind, topic};
use crate::sim::aggregator::{PowerSample, PowerSummary};
use crate::sim::controller::ProportionalController;
use crate::sim::time_keeping::TimeKeeping;
use crate::transport::{Address, LocalTransport, Message, ServiceDirectory};
use crate::weather::WeatherSource;

/// Local part of the orchestrator's own mailbox.
pub const RUNNER_LOCALPART: &str = "simulation_runner";

/// Knobs of a run that are not part of the scenario.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Stop after this much wall-clock time even if the span is not done.
    pub max_wall: Option<Duration>,
}

/// Why the run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Simulated time reached the configured end.
    Completed,
    /// A shutdown signal arrived.
    Interrupted,
    /// The wall-clock limit elapsed.
    WallLimit,
}

/// Outcome of one simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub root: Address,
    pub sim_start: DateTime<Utc>,
    pub sim_end: DateTime<Utc>,
    /// Simulated time when the run loop ended.
    pub stopped_at: DateTime<Utc>,
    pub end_reason: EndReason,
    /// Root congestion log up to `stopped_at`.
    pub samples: Vec<PowerSample>,
    pub summary: PowerSummary,
    /// Final info of every agent, sorted by address.
    pub agents: Vec<AgentInfo>,
    /// Nodes skipped during construction and agents that failed.
    pub warnings: Vec<String>,
}

/// Agents built from the scenario but not spawned yet.
struct Topology {
    root: NetworkAgent,
    /// Non-root networks with their depth below the root.
    networks: Vec<(usize, NetworkAgent)>,
    assets: Vec<AssetAgent>,
    interaction: Vec<FleetCoordinator>,
    /// Every agent address, for the `info` subscriptions.
    addresses: Vec<Address>,
    warnings: Vec<String>,
}

struct TopologyBuilder<'a> {
    config: &'a ScenarioConfig,
    transport: &'a Arc<LocalTransport>,
    directory: &'a Arc<ServiceDirectory>,
    next_seed: u64,
    networks: Vec<(usize, NetworkAgent)>,
    assets: Vec<AssetAgent>,
    addresses: Vec<Address>,
    warnings: Vec<String>,
}

impl<'a> TopologyBuilder<'a> {
    fn new(config: &'a ScenarioConfig, transport: &'a Arc<LocalTransport>, directory: &'a Arc<ServiceDirectory>) -> Self {
        Self {
            config,
            transport,
            directory,
            next_seed: config.seed,
            networks: Vec::new(),
            assets: Vec::new(),
            addresses: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Builds the whole tree. Only a failure of the root is fatal.
    fn build(mut self) -> Result<Topology> {
        let config = self.config;
        let root_address = self.directory.root_network.clone();
        let core = AgentCore::register(root_address.clone(), self.transport, self.directory.clone())?;
        let root = NetworkAgent::new(core, None)?;
        self.addresses.push(root_address.clone());
        self.build_children(&config.network, &root_address, 1)?;

        let mut interaction = Vec::new();
        for ia in &config.interaction_asset {
            match self.build_interaction(ia) {
                Ok(agent) => interaction.push(agent),
                Err(e) => self.skip(&ia.name, e)?,
            }
        }

        Ok(Topology {
            root,
            networks: self.networks,
            assets: self.assets,
            interaction,
            addresses: self.addresses,
            warnings: self.warnings,
        })
    }

    fn build_children(&mut self, network: &NetworkConfig, parent: &Address, depth: usize) -> Result<()> {
        for child in &network.children {
            match child {
                NodeConfig::Network(cfg) => match self.build_network(cfg, parent, depth) {
                    Ok(address) => self.build_children(cfg, &address, depth + 1)?,
                    Err(e) => self.skip(&cfg.name, e)?,
                },
                NodeConfig::Asset(cfg) => {
                    if let Err(e) = self.build_asset(cfg, parent) {
                        self.skip(&cfg.name, e)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn build_network(&mut self, cfg: &NetworkConfig, parent: &Address, depth: usize) -> Result<Address> {
        let address = self.address_of(&cfg.name, cfg.jid.as_deref())?;
        let core = AgentCore::register(address.clone(), self.transport, self.directory.clone())?;
        let agent = NetworkAgent::new(core, Some(parent)).inspect_err(|_| self.transport.deregister(&address))?;
        debug!(%address, %parent, depth, "network built");
        self.networks.push((depth, agent));
        self.addresses.push(address.clone());
        Ok(address)
    }

    fn build_asset(&mut self, cfg: &AssetConfig, parent: &Address) -> Result<()> {
        let seed = self.next_seed;
        self.next_seed = self.next_seed.wrapping_add(1);
        let model = build_model(&cfg.name, &cfg.asset_type, cfg.max_power_kw, cfg.factor, &cfg.args, seed)?;
        let options = self.asset_options(cfg, model.is_controllable())?;
        let address = self.address_of(&cfg.name, cfg.jid.as_deref())?;
        let core = AgentCore::register(address.clone(), self.transport, self.directory.clone())?;
        let agent =
            AssetAgent::new(core, Some(parent), model, options).inspect_err(|_| self.transport.deregister(&address))?;
        debug!(%address, %parent, asset_type = %cfg.asset_type, "asset built");
        self.assets.push(agent);
        self.addresses.push(address);
        Ok(())
    }

    /// Reads the control wiring of an asset from its arguments.
    fn asset_options(&self, cfg: &AssetConfig, controllable: bool) -> Result<AssetOptions> {
        let construction = |reason: String| GridError::Construction {
            node: cfg.name.clone(),
            reason,
        };
        let measure_period = match cfg.args.get("period_minutes") {
            None => DEFAULT_MEASURE_PERIOD,
            Some(toml::Value::Integer(m)) if *m > 0 => u64::try_from(*m)
                .ok()
                .and_then(|m| m.checked_mul(60))
                .map(Duration::from_secs)
                .ok_or_else(|| construction(format!("argument \"period_minutes\" is too large: {m}")))?,
            Some(toml::Value::Float(m)) if *m > 0.0 => Duration::try_from_secs_f64(m * 60.0)
                .map_err(|e| construction(format!("argument \"period_minutes\" = {m}: {e}")))?,
            Some(other) => {
                return Err(construction(format!(
                    "argument \"period_minutes\" must be a positive number, got {other}"
                )));
            }
        };
        let coordinator = match cfg.args.get("coordinator") {
            None => None,
            Some(toml::Value::String(name)) => {
                let text = if name.contains('@') {
                    name.clone()
                } else {
                    node_address(name, None, &self.config.domain)
                };
                let address = Address::parse(&text)
                    .map_err(|e| construction(format!("argument \"coordinator\": {e}")))?;
                Some(address)
            }
            Some(other) => {
                return Err(construction(format!("argument \"coordinator\" must be a string, got {other}")));
            }
        };
        let controller = (controllable && coordinator.is_none()).then(ProportionalController::default);
        Ok(AssetOptions {
            measure_period,
            controller,
            coordinator,
        })
    }

    fn build_interaction(&mut self, cfg: &InteractionAssetConfig) -> Result<FleetCoordinator> {
        if cfg.asset_type != "cpo" {
            return Err(GridError::Construction {
                node: cfg.name.clone(),
                reason: format!("unknown interaction asset type \"{}\", available: cpo", cfg.asset_type),
            });
        }
        let address = self.address_of(&cfg.name, cfg.jid.as_deref())?;
        let core = AgentCore::register(address.clone(), self.transport, self.directory.clone())?;
        self.addresses.push(address);
        Ok(FleetCoordinator::new(core, ProportionalController::new(cfg.factor)))
    }

    fn address_of(&self, name: &str, jid: Option<&str>) -> Result<Address> {
        Address::parse(&node_address(name, jid, &self.config.domain)).map_err(|e| GridError::Construction {
            node: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Records a construction error as a warning. Any other error is fatal
    /// and returned.
    fn skip(&mut self, name: &str, error: GridError) -> Result<()> {
        if !error.is_construction() {
            return Err(error);
        }
        warn!(node = name, error = %error, "node skipped");
        self.warnings.push(format!("{name}: {error}"));
        Ok(())
    }
}

/// What the orchestrator's own mailbox keeps track of.
#[derive(Default)]
struct RunnerState {
    time: TimeKeeping,
    agents: BTreeMap<Address, AgentInfo>,
}

/// Runs a scenario to completion.
///
/// The clock is resumed at the configured rate once every agent is
/// spawned. The run ends when simulated time reaches the end timestamp,
/// when `shutdown` flips to `true` (or its sender is dropped), or when
/// `options.max_wall` elapses.
///
/// # Errors
///
/// Returns `GridError::InvalidConfig` for an invalid scenario, and
/// transport or weather loading errors that prevent the run from starting.
/// Errors of single nodes become warnings in the report.
pub async fn run_scenario(
    config: &ScenarioConfig,
    options: RunOptions,
    mut shutdown: watch::Receiver<bool>,
) -> Result<SimulationReport> {
    let errors = config.validate();
    if !errors.is_empty() {
        return Err(GridError::InvalidConfig(errors));
    }
    let sim_start = config.simulation_time.start()?;
    let sim_end = config.simulation_time.end()?;
    let weather = match &config.weather.csv_path {
        Some(path) => WeatherSource::from_csv_path(path)?,
        None => WeatherSource::Synthetic,
    };

    let transport = Arc::new(LocalTransport::new());
    let root = Address::parse(&config.root_address())?;
    let directory = Arc::new(ServiceDirectory::new(&config.domain, root.clone())?);

    let runner_address = Address::new(RUNNER_LOCALPART, &config.domain)?;
    let mut core = AgentCore::register(runner_address, &transport, directory.clone())?;

    let time_agent = TimeAgent::new(
        AgentCore::register(directory.time.clone(), &transport, directory.clone())?,
        sim_start,
        sim_end,
    );
    let weather_agent = WeatherAgent::new(
        AgentCore::register(directory.weather.clone(), &transport, directory.clone())?,
        weather,
        sim_start,
    );
    let topology = TopologyBuilder::new(config, &transport, &directory).build()?;
    let Topology {
        root: root_agent,
        networks,
        assets,
        interaction,
        addresses,
        mut warnings,
    } = topology;

    let mut state = RunnerState::default();
    let mut subscriptions = Subscriptions::new();
    subscriptions.subscribe_to(directory.time.clone(), topic::TIME, on_time);
    for address in [&directory.time, &directory.weather].into_iter().chain(&addresses) {
        subscriptions.subscribe_to(address.clone(), topic::INFO, on_info);
    }

    info!(
        agents = addresses.len() + 2,
        skipped = warnings.len(),
        %sim_start,
        %sim_end,
        rate = config.simulation_time.rate,
        "spawning agents"
    );
    let time_handle = time_agent.spawn();
    let weather_handle = weather_agent.spawn();
    let root_handle = root_agent.spawn();
    let mut network_handles: Vec<(usize, AgentHandle<NetworkReport>)> =
        networks.into_iter().map(|(depth, agent)| (depth, agent.spawn())).collect();
    let asset_handles: Vec<AgentHandle<AgentInfo>> = assets.into_iter().map(AssetAgent::spawn).collect();
    let interaction_handles: Vec<AgentHandle<AgentInfo>> =
        interaction.into_iter().map(FleetCoordinator::spawn).collect();

    let resume = Message::of_kind(kind::RATE_CHANGE)
        .with_to(directory.time.clone())
        .with_json_body(&RateChange::new(config.simulation_time.rate))?;
    core.send(resume);

    let deadline = options.max_wall.and_then(|d| Instant::now().checked_add(d));
    let end_reason = loop {
        match core.next_wake(&mut shutdown).await {
            Wake::Message(message) => {
                if !subscriptions.handle_published(&message, &mut state) {
                    debug!(kind = ?message.kind(), sender = ?message.sender, "runner ignored message");
                }
            }
            Wake::Idle => {}
            Wake::Shutdown => break EndReason::Interrupted,
        }
        let now = Instant::now();
        subscriptions.poll(now, core.address(), core.transport());
        if state.time.is_synced() && state.time.sim_now() >= sim_end {
            break EndReason::Completed;
        }
        if deadline.is_some_and(|d| now >= d) {
            break EndReason::WallLimit;
        }
    };
    let stopped_at = if state.time.is_synced() { state.time.sim_now() } else { sim_start };
    info!(?end_reason, %stopped_at, "stopping agents");

    let mut finals: Vec<AgentInfo> = Vec::new();
    finals.extend(stop_all(interaction_handles, &mut warnings).await);
    finals.extend(stop_all(asset_handles, &mut warnings).await);
    network_handles.sort_by(|a, b| b.0.cmp(&a.0));
    let network_reports = stop_all(network_handles.into_iter().map(|(_, h)| h).collect(), &mut warnings).await;
    finals.extend(network_reports.into_iter().map(|r| r.info));
    finals.extend(stop_all(vec![weather_handle, time_handle], &mut warnings).await);
    let root_report = stop_all(vec![root_handle], &mut warnings).await.into_iter().next();

    let samples: Vec<PowerSample> = root_report
        .as_ref()
        .map(|r| r.samples.iter().filter(|s| s.sim_time <= stopped_at).copied().collect())
        .unwrap_or_default();
    if let Some(report) = root_report {
        finals.push(report.info);
    }

    for info in finals {
        state.agents.insert(info.address.clone(), info);
    }
    let summary = PowerSummary::from_samples(&samples);
    info!(
        samples = summary.samples,
        avg_kw = summary.avg_kw,
        max_kw = summary.max_kw,
        min_kw = summary.min_kw,
        last_kw = summary.last_kw,
        "simulation finished"
    );

    Ok(SimulationReport {
        root,
        sim_start,
        sim_end,
        stopped_at,
        end_reason,
        samples,
        summary,
        agents: state.agents.into_values().collect(),
        warnings,
    })
}

/// Stops the agents one by one, in order, collecting their outputs.
async fn stop_all<T: Send + 'static>(handles: Vec<AgentHandle<T>>, warnings: &mut Vec<String>) -> Vec<T> {
    let mut outputs = Vec::with_capacity(handles.len());
    for handle in handles {
        let address = handle.address().clone();
        match handle.stop().await {
            Ok(output) => outputs.push(output),
            Err(e) => {
                warn!(%address, error = %e, "agent failed");
                warnings.push(format!("{address}: {e}"));
            }
        }
    }
    outputs
}

fn on_time(state: &mut RunnerState, body: &Value) -> Result<()> {
    let broadcast: TimeBroadcast = serde_json::from_value(body.clone())?;
    if state.time.process_time_message(&broadcast)? {
        info!(rate = broadcast.rate.value, sim_time = %broadcast.sim_broadcast_time.value, "clock rate changed");
    }
    Ok(())
}

fn on_info(state: &mut RunnerState, body: &Value) -> Result<()> {
    let info: AgentInfo = serde_json::from_value(body.clone())?;
    debug!(address = %info.address, state = %info.state, status = %info.status, "agent info");
    state.agents.insert(info.address.clone(), info);
    Ok(())
}
