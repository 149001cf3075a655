//! Leaf agents wrapping a [`PowerModel`].

use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{AgentCore, AgentHandle, AgentInfo, Describe, INFO_SCHEMA_VERSION, InfoTracker, Wake};
use crate::devices::{AssetContext, PowerModel};
use crate::error::Result;
use crate::protocol::wire::{
    CongestionBroadcast, LoadReport, SetpointCommand, TimeBroadcast, UNIT_KW, WeatherBroadcast, kind,
    topic,
};
use crate::protocol::{Publisher, Subscriptions};
use crate::sim::controller::ProportionalController;
use crate::sim::lifecycle::Component;
use crate::sim::time_keeping::TimeKeeping;
use crate::transport::{Address, Message};
use crate::weather::WeatherSample;

/// Nominal measurement period in simulated time.
pub const DEFAULT_MEASURE_PERIOD: Duration = Duration::from_secs(15 * 60);
const MEASURE_TASK: &str = "measure";

/// How an asset is wired into the control loop.
#[derive(Debug, Clone)]
pub struct AssetOptions {
    /// Nominal measurement period in simulated time.
    pub measure_period: Duration,
    /// Set for a controllable leaf correcting itself from the root
    /// congestion signal.
    pub controller: Option<ProportionalController>,
    /// Fleet coordinator receiving `load_report`s and sending setpoints.
    pub coordinator: Option<Address>,
}

impl Default for AssetOptions {
    fn default() -> Self {
        Self {
            measure_period: DEFAULT_MEASURE_PERIOD,
            controller: None,
            coordinator: None,
        }
    }
}

pub struct AssetState {
    component: Component,
    model: Box<dyn PowerModel>,
    time: TimeKeeping,
    weather: Option<WeatherSample>,
    controller: Option<ProportionalController>,
    last_kw: f64,
    /// An input changed since the last measurement.
    dirty: bool,
}

impl AssetState {
    fn measure(&mut self) -> f64 {
        let now = self.time.sim_now();
        let context = match &self.weather {
            Some(weather) => AssetContext::with_weather(now, weather),
            None => AssetContext::new(now),
        };
        self.last_kw = self.model.power_kw(&context);
        self.dirty = false;
        self.last_kw
    }
}

impl Describe for AssetState {
    fn info(&self) -> AgentInfo {
        AgentInfo {
            schema_version: INFO_SCHEMA_VERSION,
            address: self.component.address().clone(),
            kind: self.model.device_type().to_string(),
            state: self.component.state(),
            parent: self.component.parent().cloned(),
            children: Vec::new(),
            net_power_kw: self.component.reported_power(self.last_kw),
            max_power_kw: Some(self.model.max_power_kw()),
            status: self.model.status().to_string(),
        }
    }
}

/// Leaf of the grid tree: measures its device and reports upward.
///
/// Measurements run on the `measure` task and whenever an input changes
/// (time sync, weather, setpoint). The report is forced to 0 kW outside
/// the `Running` state.
pub struct AssetAgent {
    core: AgentCore,
    state: AssetState,
    publisher: Publisher<AssetState>,
    subscriptions: Subscriptions<AssetState>,
    info: InfoTracker,
    registration: Option<Message>,
    coordinator: Option<Address>,
}

impl AssetAgent {
    /// Creates a leaf. Without `parent` the asset reports to nobody.
    ///
    /// # Errors
    ///
    /// Returns the lifecycle error if the parent cannot be assigned.
    pub fn new(
        core: AgentCore,
        parent: Option<&Address>,
        model: Box<dyn PowerModel>,
        options: AssetOptions,
    ) -> Result<Self> {
        let mut component = Component::new(core.address().clone());
        let registration = parent
            .map(|p| component.assign_parent(p.as_str()))
            .transpose()?;

        let mut publisher = Publisher::new(core.address().clone());
        InfoTracker::register(&mut publisher);

        let directory = core.directory();
        let mut subscriptions = Subscriptions::new();
        subscriptions.subscribe_to(directory.time.clone(), topic::TIME, on_time);
        if model.needs_weather() {
            subscriptions.subscribe_to(directory.weather.clone(), topic::WEATHER, on_weather);
        }
        let controller = options.controller.filter(|_| model.is_controllable());
        if controller.is_some() {
            subscriptions.subscribe_to(directory.root_network.clone(), topic::CONGESTION, on_congestion);
        }

        let mut time = TimeKeeping::new();
        time.add_task(MEASURE_TASK, options.measure_period);

        let state = AssetState {
            component,
            model,
            time,
            weather: None,
            controller,
            last_kw: 0.0,
            dirty: false,
        };
        Ok(Self {
            core,
            state,
            publisher,
            subscriptions,
            info: InfoTracker::default(),
            registration,
            coordinator: options.coordinator,
        })
    }

    pub fn spawn(self) -> AgentHandle<AgentInfo> {
        let address = self.core.address().clone();
        AgentHandle::spawn("asset", address, move |shutdown| self.run(shutdown))
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> AgentInfo {
        if let Some(registration) = self.registration.take() {
            self.core.send(registration);
        }
        if let Some(coordinator) = &self.coordinator {
            self.core
                .send(Message::of_kind(kind::REGISTER_CONTROLLABLE).with_to(coordinator.clone()));
        }
        if let Err(e) = self.state.component.start() {
            warn!(error = %e, "asset failed to start");
        }
        self.report();

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
        self.report();
        self.info.publish_if_changed(&self.publisher, &self.state, self.core.transport());
        self.state.info()
    }

    fn tick(&mut self, now: Instant) {
        self.subscriptions.poll(now, self.core.address(), self.core.transport());
        let due = self.state.time.due_tasks(now).contains(&MEASURE_TASK);
        if (due || self.state.dirty) && self.state.time.is_synced() && self.state.component.is_running() {
            let kw = self.state.measure();
            debug!(kw, status = self.state.model.status(), "measured");
            self.report();
        }
        self.info.publish_if_changed(&self.publisher, &self.state, self.core.transport());
    }

    fn handle(&mut self, message: Message) {
        if self.publisher.handle_message(&message, &self.state, self.core.transport()) {
            return;
        }
        if self.subscriptions.handle_published(&message, &mut self.state) {
            return;
        }
        match message.kind() {
            Some(kind::NEW_SETPOINT) => match message.parse_body::<SetpointCommand>() {
                Ok(command) => {
                    self.state.model.apply_setpoint(command.new_setpoint);
                    self.state.dirty = true;
                    debug!(setpoint_kw = ?self.state.model.setpoint_kw(), "setpoint applied");
                }
                Err(e) => warn!(error = %e, "malformed new_setpoint dropped"),
            },
            other => warn!(kind = ?other, "unexpected message dropped"),
        }
    }

    /// Sends the current value to the parent and, if any, the coordinator.
    fn report(&self) {
        let live = self.state.last_kw;
        if let Some(update) = self.state.component.power_report(live) {
            self.core.transport().send(update);
        }
        let Some(coordinator) = &self.coordinator else {
            return;
        };
        if !self.state.component.is_running() {
            return;
        }
        let report = LoadReport {
            value: live,
            unit: UNIT_KW.to_string(),
            is_active: self.state.model.is_active(),
            max_power_kw: self.state.model.max_power_kw(),
        };
        match Message::of_kind(kind::LOAD_REPORT)
            .with_to(coordinator.clone())
            .with_json_body(&report)
        {
            Ok(message) => self.core.send(message),
            Err(e) => warn!(error = %e, "load_report encoding failed"),
        }
    }
}

fn on_time(state: &mut AssetState, body: &Value) -> Result<()> {
    let broadcast: TimeBroadcast = serde_json::from_value(body.clone())?;
    state.time.process_time_message(&broadcast)?;
    state.dirty = true;
    Ok(())
}

fn on_weather(state: &mut AssetState, body: &Value) -> Result<()> {
    let broadcast: WeatherBroadcast = serde_json::from_value(body.clone())?;
    state.weather = Some(WeatherSample::from(&broadcast));
    state.dirty = true;
    Ok(())
}

fn on_congestion(state: &mut AssetState, body: &Value) -> Result<()> {
    let broadcast: CongestionBroadcast = serde_json::from_value(body.clone())?;
    let Some(controller) = state.controller else {
        return Ok(());
    };
    if !state.model.is_active() {
        return Ok(());
    }
    let current = state.model.setpoint_kw().unwrap_or(0.0);
    let adjusted = controller.adjust_setpoint(current, state.model.max_power_kw(), broadcast.congestion.value);
    if adjusted != current {
        state.model.apply_setpoint(adjusted);
        state.dirty = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::devices::{ChargingStation, ConstantLoad};
    use crate::protocol::wire::PowerUpdate;
    use crate::transport::{LocalTransport, Mailbox, ServiceDirectory};

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn leaf(model: Box<dyn PowerModel>, options: AssetOptions) -> (AssetAgent, Mailbox) {
        let transport = Arc::new(LocalTransport::new());
        let directory = Arc::new(ServiceDirectory::new("t", addr("main@t")).unwrap());
        let parent = transport.register(&addr("main@t")).unwrap();
        let core = AgentCore::register(addr("leaf@t"), &transport, directory).unwrap();
        let mut agent = AssetAgent::new(core, Some(&addr("main@t")), model, options).unwrap();
        agent.state.component.start().unwrap();
        (agent, parent)
    }

    fn station() -> Box<dyn PowerModel> {
        Box::new(ChargingStation::with_window(10.0, 1.0, true, 0, 23))
    }

    fn setpoint(kw: f64) -> Message {
        let mut message = Message::of_kind(kind::NEW_SETPOINT)
            .with_json_body(&SetpointCommand { new_setpoint: kw })
            .unwrap();
        message.sender = Some(addr("cpo@t"));
        message
    }

    fn sync(state: &mut AssetState) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let body = serde_json::to_value(TimeBroadcast::new(Utc::now(), start, 1.0)).unwrap();
        on_time(state, &body).unwrap();
    }

    fn reported(mailbox: &mut Mailbox) -> Vec<f64> {
        std::iter::from_fn(|| mailbox.try_receive())
            .filter(|m| m.kind() == Some(kind::POWER_UPDATE))
            .map(|m| m.parse_body::<PowerUpdate>().unwrap().value)
            .collect()
    }

    #[tokio::test]
    async fn setpoints_are_clamped_to_the_device_range() {
        let (mut agent, _parent) = leaf(station(), AssetOptions::default());

        agent.handle(setpoint(4.0));
        assert_eq!(agent.state.model.setpoint_kw(), Some(4.0));
        assert!(agent.state.dirty);
        agent.handle(setpoint(50.0));
        assert_eq!(agent.state.model.setpoint_kw(), Some(10.0));
        agent.handle(setpoint(-3.0));
        assert_eq!(agent.state.model.setpoint_kw(), Some(0.0));
    }

    #[tokio::test]
    async fn malformed_setpoint_is_dropped() {
        let (mut agent, _parent) = leaf(station(), AssetOptions::default());
        let mut bad = setpoint(1.0);
        bad.body = "{\"setpoint\": 1}".to_string();
        agent.handle(bad);
        assert_eq!(agent.state.model.setpoint_kw(), Some(10.0));
        assert!(!agent.state.dirty);
    }

    #[tokio::test]
    async fn measures_only_after_time_sync() {
        let (mut agent, mut parent) = leaf(Box::new(ConstantLoad::new(3.0)), AssetOptions::default());
        agent.state.dirty = true;
        agent.tick(Instant::now());
        assert!(reported(&mut parent).is_empty());

        sync(&mut agent.state);
        agent.tick(Instant::now());
        assert_eq!(reported(&mut parent), vec![3.0]);
        assert!(!agent.state.dirty);
    }

    #[tokio::test]
    async fn stopped_leaf_reports_zero() {
        let (mut agent, mut parent) = leaf(Box::new(ConstantLoad::new(3.0)), AssetOptions::default());
        sync(&mut agent.state);
        agent.tick(Instant::now());
        agent.state.component.stop();
        agent.report();

        assert_eq!(reported(&mut parent), vec![3.0, 0.0]);
        assert_eq!(agent.state.info().net_power_kw, 0.0);
    }

    #[tokio::test]
    async fn self_correcting_leaf_follows_congestion() {
        let options = AssetOptions {
            controller: Some(ProportionalController::default()),
            ..AssetOptions::default()
        };
        let (mut agent, _parent) = leaf(station(), options);
        let congestion = |kw: f64| serde_json::to_value(CongestionBroadcast::kw(kw)).unwrap();

        // inactive until the first measurement inside the window
        on_congestion(&mut agent.state, &congestion(4.0)).unwrap();
        assert_eq!(agent.state.model.setpoint_kw(), Some(10.0));

        sync(&mut agent.state);
        agent.tick(Instant::now());
        on_congestion(&mut agent.state, &congestion(4.0)).unwrap();
        assert_eq!(agent.state.model.setpoint_kw(), Some(6.0));
        on_congestion(&mut agent.state, &congestion(-20.0)).unwrap();
        assert_eq!(agent.state.model.setpoint_kw(), Some(10.0));
    }
}
