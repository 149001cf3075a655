//! Fleet coordinator (charge point operator): corrects a fleet of
//! controllable loads from the root congestion signal.

use std::collections::BTreeMap;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{AgentCore, AgentHandle, AgentInfo, Describe, InfoTracker, Wake};
use crate::error::Result;
use crate::protocol::wire::{CongestionBroadcast, LoadReport, SetpointCommand, kind, topic};
use crate::protocol::{Publisher, Subscriptions};
use crate::sim::controller::{ControllableLoad, ProportionalController};
use crate::transport::{Address, Message};

/// Smallest setpoint change worth a `new_setpoint` message (kW).
const SETPOINT_EPSILON: f64 = 1e-9;

pub struct FleetState {
    info_base: AgentInfo,
    loads: BTreeMap<Address, ControllableLoad>,
    congestion_kw: Option<f64>,
    pending: bool,
    corrections: u64,
}

impl FleetState {
    pub fn loads(&self) -> &BTreeMap<Address, ControllableLoad> {
        &self.loads
    }
}

impl Describe for FleetState {
    fn info(&self) -> AgentInfo {
        AgentInfo {
            children: self.loads.keys().cloned().collect(),
            net_power_kw: self.loads.values().map(|l| l.current_kw).sum(),
            status: format!("{} loads, {} corrections", self.loads.len(), self.corrections),
            ..self.info_base.clone()
        }
    }
}

/// Coordinates the setpoints of every load that registered with it.
pub struct FleetCoordinator {
    core: AgentCore,
    state: FleetState,
    controller: ProportionalController,
    publisher: Publisher<FleetState>,
    subscriptions: Subscriptions<FleetState>,
    info: InfoTracker,
}

impl FleetCoordinator {
    pub fn new(core: AgentCore, controller: ProportionalController) -> Self {
        let mut publisher = Publisher::new(core.address().clone());
        InfoTracker::register(&mut publisher);
        let mut subscriptions = Subscriptions::new();
        subscriptions.subscribe_to(
            core.directory().root_network.clone(),
            topic::CONGESTION,
            on_congestion,
        );
        let state = FleetState {
            info_base: AgentInfo::service(core.address().clone(), "cpo", "idle"),
            loads: BTreeMap::new(),
            congestion_kw: None,
            pending: false,
            corrections: 0,
        };
        Self {
            core,
            state,
            controller,
            publisher,
            subscriptions,
            info: InfoTracker::default(),
        }
    }

    pub fn spawn(self) -> AgentHandle<AgentInfo> {
        let address = self.core.address().clone();
        AgentHandle::spawn("cpo", address, move |shutdown| self.run(shutdown))
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> AgentInfo {
        info!(factor = self.controller.factor, "fleet coordinator ready");
        loop {
            match self.core.next_wake(&mut shutdown).await {
                Wake::Message(message) => self.handle(message),
                Wake::Idle => {}
                Wake::Shutdown => break,
            }
            self.subscriptions
                .poll(Instant::now(), self.core.address(), self.core.transport());
            if self.state.pending {
                self.correct();
            }
            self.info.publish_if_changed(&self.publisher, &self.state, self.core.transport());
        }
        self.state.info()
    }

    fn handle(&mut self, message: Message) {
        if self.publisher.handle_message(&message, &self.state, self.core.transport()) {
            return;
        }
        if self.subscriptions.handle_published(&message, &mut self.state) {
            return;
        }
        let Some(sender) = message.sender.as_ref().map(Address::bare) else {
            warn!(kind = ?message.kind(), "message without sender dropped");
            return;
        };
        match message.kind() {
            Some(kind::REGISTER_CONTROLLABLE) => {
                debug!(load = %sender, "controllable registered");
                self.state.loads.entry(sender).or_insert(ControllableLoad {
                    current_kw: 0.0,
                    max_kw: 0.0,
                    is_active: false,
                });
            }
            Some(kind::LOAD_REPORT) => match message.parse_body::<LoadReport>() {
                Ok(report) => {
                    self.state.loads.insert(
                        sender,
                        ControllableLoad {
                            current_kw: report.value,
                            max_kw: report.max_power_kw,
                            is_active: report.is_active,
                        },
                    );
                }
                Err(e) => warn!(load = %sender, error = %e, "malformed load_report dropped"),
            },
            other => warn!(kind = ?other, "unexpected message dropped"),
        }
    }

    /// Runs one fleet-wide correction for the latest congestion value.
    fn correct(&mut self) {
        self.state.pending = false;
        let Some(congestion) = self.state.congestion_kw else {
            return;
        };
        let current: Vec<ControllableLoad> = self.state.loads.values().copied().collect();
        let corrected = self.controller.correct_fleet(&current, congestion);
        let mut sent = 0;
        for ((address, load), new_kw) in self.state.loads.iter_mut().zip(corrected) {
            if (new_kw - load.current_kw).abs() <= SETPOINT_EPSILON {
                continue;
            }
            let command = SetpointCommand { new_setpoint: new_kw };
            match Message::of_kind(kind::NEW_SETPOINT)
                .with_to(address.clone())
                .with_json_body(&command)
            {
                Ok(message) => {
                    self.core.send(message);
                    load.current_kw = new_kw;
                    sent += 1;
                }
                Err(e) => warn!(load = %address, error = %e, "setpoint encoding failed"),
            }
        }
        self.state.corrections += 1;
        debug!(congestion_kw = congestion, sent, "fleet corrected");
    }
}

fn on_congestion(state: &mut FleetState, body: &Value) -> Result<()> {
    let broadcast: CongestionBroadcast = serde_json::from_value(body.clone())?;
    state.congestion_kw = Some(broadcast.congestion.value);
    state.pending = true;
    Ok(())
}
