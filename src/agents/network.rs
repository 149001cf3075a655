//! Interior nodes of the grid tree.
//!
//! A network node sums the last report of each child and forwards the sum
//! to its parent. The root has no parent; its sum is the grid congestion,
//! published on `congestion` whenever it changes.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{AgentCore, AgentHandle, AgentInfo, Describe, INFO_SCHEMA_VERSION, InfoTracker, Wake};
use crate::error::Result;
use crate::protocol::wire::{CongestionBroadcast, PowerUpdate, TimeBroadcast, kind, topic};
use crate::protocol::{Publisher, Subscriptions};
use crate::sim::aggregator::{Aggregator, PowerSample};
use crate::sim::lifecycle::Component;
use crate::sim::time_keeping::TimeKeeping;
use crate::transport::{Address, Message, TYPE_KEY};

/// Final state of a network node, returned when it stops.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkReport {
    pub info: AgentInfo,
    pub is_root: bool,
    /// Sum of the children's last reports (kW).
    pub net_power_kw: f64,
    /// Last published congestion; always 0 for non-root nodes.
    pub congestion_kw: f64,
    /// Congestion log of the root, one sample per published change.
    pub samples: Vec<PowerSample>,
    pub children: Vec<Address>,
}

pub struct NetworkState {
    component: Component,
    aggregator: Aggregator,
    is_root: bool,
    congestion_kw: f64,
    samples: Vec<PowerSample>,
    time: TimeKeeping,
}

impl NetworkState {
    pub fn net_power_kw(&self) -> f64 {
        self.aggregator.net_power_kw()
    }

    pub fn congestion_kw(&self) -> f64 {
        self.congestion_kw
    }
}

impl Describe for NetworkState {
    fn info(&self) -> AgentInfo {
        let net = self.aggregator.net_power_kw();
        let status = if self.is_root {
            format!("congestion {:.3} kW", self.congestion_kw)
        } else {
            format!("{} children", self.aggregator.child_count())
        };
        AgentInfo {
            schema_version: INFO_SCHEMA_VERSION,
            address: self.component.address().clone(),
            kind: "network".to_string(),
            state: self.component.state(),
            parent: self.component.parent().cloned(),
            children: self.aggregator.children(),
            net_power_kw: self.component.reported_power(net),
            max_power_kw: None,
            status,
        }
    }
}

/// Interior node (or root) of the grid tree.
pub struct NetworkAgent {
    core: AgentCore,
    state: NetworkState,
    publisher: Publisher<NetworkState>,
    subscriptions: Subscriptions<NetworkState>,
    info: InfoTracker,
    registration: Option<Message>,
}

impl NetworkAgent {
    /// Creates a network node. Without `parent` the node is the root.
    ///
    /// # Errors
    ///
    /// Returns the lifecycle error if the parent cannot be assigned.
    pub fn new(core: AgentCore, parent: Option<&Address>) -> Result<Self> {
        let mut component = Component::new(core.address().clone());
        let registration = parent
            .map(|p| component.assign_parent(p.as_str()))
            .transpose()?;
        let is_root = registration.is_none();

        let mut publisher = Publisher::new(core.address().clone());
        InfoTracker::register(&mut publisher);
        let mut subscriptions = Subscriptions::new();
        if is_root {
            publisher.register_topic(topic::CONGESTION, |state: &NetworkState, message: Message| {
                message
                    .with_metadata(TYPE_KEY, kind::CONGESTION)
                    .with_json_body(&CongestionBroadcast::kw(state.congestion_kw))
            });
            subscriptions.subscribe_to(core.directory().time.clone(), topic::TIME, on_time);
        }

        let state = NetworkState {
            component,
            aggregator: Aggregator::new(),
            is_root,
            congestion_kw: 0.0,
            samples: Vec::new(),
            time: TimeKeeping::new(),
        };
        Ok(Self {
            core,
            state,
            publisher,
            subscriptions,
            info: InfoTracker::default(),
            registration,
        })
    }

    pub fn is_root(&self) -> bool {
        self.state.is_root
    }

    pub fn spawn(self) -> AgentHandle<NetworkReport> {
        let address = self.core.address().clone();
        AgentHandle::spawn("network", address, move |shutdown| self.run(shutdown))
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> NetworkReport {
        if let Some(registration) = self.registration.take() {
            self.core.send(registration);
        }
        if let Err(e) = self.state.component.start() {
            warn!(error = %e, "network failed to start");
        }
        self.report_upward();

        loop {
            match self.core.next_wake(&mut shutdown).await {
                Wake::Message(message) => self.handle(message),
                Wake::Idle => {}
                Wake::Shutdown => break,
            }
            self.tick(Instant::now());
        }

        for message in self.core.drain() {
            self.handle(message);
        }
        self.state.component.stop();
        self.report_upward();
        self.info.publish_if_changed(&self.publisher, &self.state, self.core.transport());

        NetworkReport {
            info: self.state.info(),
            is_root: self.state.is_root,
            net_power_kw: self.state.aggregator.net_power_kw(),
            congestion_kw: self.state.congestion_kw,
            samples: self.state.samples,
            children: self.state.aggregator.children(),
        }
    }

    fn tick(&mut self, now: Instant) {
        self.subscriptions.poll(now, self.core.address(), self.core.transport());
        self.info.publish_if_changed(&self.publisher, &self.state, self.core.transport());
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
            Some(kind::REGISTER_CHILD) => {
                debug!(child = %sender, "child registered");
                let before = self.state.aggregator.net_power_kw();
                self.state.aggregator.register_child(sender);
                let changed = self.state.aggregator.net_power_kw() != before;
                self.aggregate_updated(changed);
            }
            Some(kind::POWER_UPDATE) => match message.parse_body::<PowerUpdate>() {
                Ok(update) => self.handle_power_update(sender, update.value),
                Err(e) => warn!(child = %sender, error = %e, "malformed power_update dropped"),
            },
            other => warn!(kind = ?other, "unexpected message dropped"),
        }
    }

    fn handle_power_update(&mut self, child: Address, kw: f64) {
        let changed = self.state.aggregator.record_report(child, kw);
        self.aggregate_updated(changed);
    }

    /// Forwards the sum upward, or as root republishes a changed congestion.
    fn aggregate_updated(&mut self, changed: bool) {
        if !self.state.is_root {
            self.report_upward();
            return;
        }
        if !changed {
            return;
        }
        let congestion = self.state.aggregator.net_power_kw();
        self.state.congestion_kw = congestion;
        self.state.samples.push(PowerSample {
            sim_time: self.state.time.sim_now(),
            net_power_kw: congestion,
        });
        debug!(congestion_kw = congestion, "congestion changed");
        if let Err(e) = self.publisher.publish(topic::CONGESTION, None, &self.state, self.core.transport()) {
            warn!(error = %e, "congestion broadcast failed");
        }
    }

    fn report_upward(&self) {
        if let Some(report) = self.state.component.power_report(self.state.aggregator.net_power_kw()) {
            self.core.transport().send(report);
        }
    }
}

fn on_time(state: &mut NetworkState, body: &Value) -> Result<()> {
    let broadcast: TimeBroadcast = serde_json::from_value(body.clone())?;
    state.time.process_time_message(&broadcast)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::protocol::wire::PowerUpdate;
    use crate::transport::{LocalTransport, Mailbox, ServiceDirectory};

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn setup() -> (Arc<LocalTransport>, Arc<ServiceDirectory>) {
        let transport = Arc::new(LocalTransport::new());
        let directory = Arc::new(ServiceDirectory::new("t", addr("main@t")).unwrap());
        (transport, directory)
    }

    fn core(name: &str, transport: &Arc<LocalTransport>, directory: &Arc<ServiceDirectory>) -> AgentCore {
        AgentCore::register(addr(name), transport, directory.clone()).unwrap()
    }

    fn from(sender: &str, message: Message) -> Message {
        let mut message = message;
        message.sender = Some(addr(sender));
        message
    }

    fn update(sender: &str, kw: f64) -> Message {
        from(
            sender,
            Message::of_kind(kind::POWER_UPDATE)
                .with_json_body(&PowerUpdate::kw(kw))
                .unwrap(),
        )
    }

    fn register(sender: &str) -> Message {
        from(sender, Message::of_kind(kind::REGISTER_CHILD))
    }

    fn reported(mailbox: &mut Mailbox) -> Vec<f64> {
        std::iter::from_fn(|| mailbox.try_receive())
            .filter(|m| m.kind() == Some(kind::POWER_UPDATE))
            .map(|m| m.parse_body::<PowerUpdate>().unwrap().value)
            .collect()
    }

    fn running_root(transport: &Arc<LocalTransport>, directory: &Arc<ServiceDirectory>) -> NetworkAgent {
        let mut root = NetworkAgent::new(core("main@t", transport, directory), None).unwrap();
        root.state.component.start().unwrap();
        root
    }

    #[test]
    fn root_sums_children_and_logs_changes() {
        let (transport, directory) = setup();
        let mut root = running_root(&transport, &directory);

        root.handle(update("a@t", 1.0));
        root.handle(update("b@t", 2.0));
        root.handle(update("c@t", 3.0));
        assert_eq!(root.state.congestion_kw(), 6.0);

        root.handle(update("b@t", -1.0));
        assert_eq!(root.state.congestion_kw(), 3.0);
        let log: Vec<f64> = root.state.samples.iter().map(|s| s.net_power_kw).collect();
        assert_eq!(log, vec![1.0, 3.0, 6.0, 3.0]);

        // same value again: no new sample
        root.handle(update("b@t", -1.0));
        assert_eq!(root.state.samples.len(), 4);
    }

    #[test]
    fn reregistered_child_resets_root_congestion() {
        let (transport, directory) = setup();
        let mut root = running_root(&transport, &directory);

        root.handle(update("ghost@t", 5.0));
        assert_eq!(root.state.congestion_kw(), 5.0);
        root.handle(register("ghost@t"));

        assert_eq!(root.state.net_power_kw(), 0.0);
        assert_eq!(root.state.congestion_kw(), 0.0);
        assert_eq!(root.state.samples.last().map(|s| s.net_power_kw), Some(0.0));
        assert_eq!(root.state.aggregator.children(), vec![addr("ghost@t")]);
    }

    #[test]
    fn reregistered_child_is_forwarded_upward() {
        let (transport, directory) = setup();
        let mut parent = transport.register(&addr("main@t")).unwrap();
        let mut feeder = NetworkAgent::new(core("feeder@t", &transport, &directory), Some(&addr("main@t"))).unwrap();
        feeder.state.component.start().unwrap();

        feeder.handle(update("ghost@t", 5.0));
        feeder.handle(register("ghost@t"));

        assert_eq!(reported(&mut parent), vec![5.0, 0.0]);
        assert_eq!(feeder.state.net_power_kw(), 0.0);
    }

    #[test]
    fn malformed_power_update_is_dropped() {
        let (transport, directory) = setup();
        let mut root = running_root(&transport, &directory);
        root.handle(update("a@t", 2.0));

        let mut bad = update("a@t", 0.0);
        bad.body = "not json".to_string();
        root.handle(bad);
        root.handle(from("a@t", Message::of_kind("bogus")));
        let mut anonymous = update("a@t", 9.0);
        anonymous.sender = None;
        root.handle(anonymous);

        assert_eq!(root.state.congestion_kw(), 2.0);
        assert_eq!(root.state.samples.len(), 1);
    }

    #[test]
    fn stopped_node_reports_zero_upward() {
        let (transport, directory) = setup();
        let mut parent = transport.register(&addr("main@t")).unwrap();
        let mut feeder = NetworkAgent::new(core("feeder@t", &transport, &directory), Some(&addr("main@t"))).unwrap();
        feeder.state.component.start().unwrap();
        feeder.handle(update("a@t", 4.0));

        feeder.state.component.stop();
        feeder.report_upward();

        assert_eq!(reported(&mut parent), vec![4.0, 0.0]);
        assert_eq!(feeder.state.info().net_power_kw, 0.0);
    }
}
