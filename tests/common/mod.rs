//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tokio::time::Instant;

use vpp_agents::agents::{AgentCore, AgentHandle, AgentInfo, TimeAgent};
use vpp_agents::error::Result;
use vpp_agents::protocol::Subscriptions;
use vpp_agents::protocol::wire::{CongestionBroadcast, RateChange, TimeBroadcast, kind, topic};
use vpp_agents::transport::{Address, LocalTransport, Mailbox, Message, ServiceDirectory, Transport};

pub const DOMAIN: &str = "grid.test";

/// Simulation start used by the fixtures (midnight, 2024-01-01).
pub fn sim_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn address(localpart: &str) -> Address {
    Address::new(localpart, DOMAIN).unwrap()
}

/// A local transport plus the service directory of one test grid.
pub struct Grid {
    pub transport: Arc<LocalTransport>,
    pub directory: Arc<ServiceDirectory>,
}

impl Grid {
    /// Creates a grid whose root network is `root@grid.test`.
    pub fn new(root: &str) -> Self {
        let directory = ServiceDirectory::new(DOMAIN, address(root)).unwrap();
        Self {
            transport: Arc::new(LocalTransport::new()),
            directory: Arc::new(directory),
        }
    }

    pub fn core(&self, localpart: &str) -> AgentCore {
        AgentCore::register(address(localpart), &self.transport, self.directory.clone()).unwrap()
    }

    pub fn root(&self) -> Address {
        self.directory.root_network.clone()
    }

    /// Spawns the clock authority, paused at [`sim_start`].
    pub fn spawn_clock(&self) -> AgentHandle<AgentInfo> {
        let core = AgentCore::register(self.directory.time.clone(), &self.transport, self.directory.clone()).unwrap();
        TimeAgent::new(core, sim_start(), sim_start() + chrono::Duration::days(1)).spawn()
    }

    /// Asks the clock authority to run at `rate`.
    pub fn set_rate(&self, rate: f64) {
        let mut message = Message::of_kind(kind::RATE_CHANGE)
            .with_to(self.directory.time.clone())
            .with_json_body(&RateChange::new(rate))
            .unwrap();
        message.sender = Some(address("test_driver"));
        self.transport.send(message);
    }

    /// Registers a probe mailbox subscribing to nothing yet.
    pub fn probe(&self) -> Probe {
        let address = address("probe");
        let mailbox = self.transport.register(&address).unwrap();
        Probe {
            address,
            mailbox,
            transport: self.transport.clone(),
            subscriptions: Subscriptions::new(),
            seen: ProbeLog::default(),
        }
    }
}

/// Everything a [`Probe`] received on its subscriptions.
#[derive(Debug, Default)]
pub struct ProbeLog {
    pub congestion: Vec<f64>,
    pub time: Vec<TimeBroadcast>,
}

fn record_congestion(log: &mut ProbeLog, body: &Value) -> Result<()> {
    let broadcast: CongestionBroadcast = serde_json::from_value(body.clone())?;
    log.congestion.push(broadcast.congestion.value);
    Ok(())
}

fn record_time(log: &mut ProbeLog, body: &Value) -> Result<()> {
    let broadcast: TimeBroadcast = serde_json::from_value(body.clone())?;
    log.time.push(broadcast);
    Ok(())
}

/// Test-side subscriber driven by hand.
pub struct Probe {
    address: Address,
    mailbox: Mailbox,
    transport: Arc<LocalTransport>,
    subscriptions: Subscriptions<ProbeLog>,
    pub seen: ProbeLog,
}

impl Probe {
    pub fn watch_congestion(&mut self, root: Address) {
        self.subscriptions.subscribe_to(root, topic::CONGESTION, record_congestion);
    }

    pub fn watch_time(&mut self, clock: Address) {
        self.subscriptions.subscribe_to(clock, topic::TIME, record_time);
    }

    /// Pumps the mailbox until `done` holds or `timeout` elapses.
    ///
    /// Returns whether `done` held.
    pub async fn pump_until(&mut self, timeout: Duration, done: impl Fn(&ProbeLog) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            self.subscriptions
                .poll(Instant::now(), &self.address, self.transport.as_ref());
            if let Some(message) = self.mailbox.receive(Duration::from_millis(20)).await {
                self.subscriptions.handle_published(&message, &mut self.seen);
            }
            if done(&self.seen) {
                return true;
            }
        }
        false
    }

    pub fn last_congestion(&self) -> Option<f64> {
        self.seen.congestion.last().copied()
    }
}

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}
