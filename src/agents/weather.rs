//! Weather authority: samples the weather source every simulated hour and
//! broadcasts it on `weather`.

use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{AgentCore, AgentHandle, AgentInfo, Describe, InfoTracker, Wake};
use crate::protocol::wire::{TimeBroadcast, WeatherBroadcast, kind, topic};
use crate::protocol::{Publisher, Subscriptions};
use crate::sim::time_keeping::TimeKeeping;
use crate::transport::{Message, TYPE_KEY};
use crate::weather::{WeatherSample, WeatherSource};

/// Nominal refresh period in simulated time.
pub const WEATHER_PERIOD: Duration = Duration::from_secs(3600);
const REFRESH_TASK: &str = "refresh";

pub struct WeatherState {
    info_base: AgentInfo,
    time: TimeKeeping,
    source: WeatherSource,
    current: WeatherSample,
    sampled_hour: Option<DateTime<Utc>>,
}

impl WeatherState {
    /// Looks up the sample for the current simulated hour.
    ///
    /// # Returns
    ///
    /// `true` when a new hour was sampled.
    fn refresh(&mut self) -> bool {
        let now = self.time.sim_now();
        let hour = now
            .with_minute(0)
            .and_then(|t| t.with_second(0))
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        if self.sampled_hour == Some(hour) {
            return false;
        }
        self.sampled_hour = Some(hour);
        match self.source.sample_at(now) {
            Some(sample) => self.current = sample,
            None => debug!(%hour, "no weather for hour, keeping previous sample"),
        }
        true
    }
}

impl Describe for WeatherState {
    fn info(&self) -> AgentInfo {
        let status = if self.time.is_synced() { "publishing" } else { "waiting for time" };
        AgentInfo {
            status: status.to_string(),
            ..self.info_base.clone()
        }
    }
}

/// Publishes weather samples to every asset that subscribes.
pub struct WeatherAgent {
    core: AgentCore,
    state: WeatherState,
    publisher: Publisher<WeatherState>,
    subscriptions: Subscriptions<WeatherState>,
    info: InfoTracker,
}

impl WeatherAgent {
    /// Creates the weather agent; `sim_start` seeds the first sample.
    pub fn new(core: AgentCore, source: WeatherSource, sim_start: DateTime<Utc>) -> Self {
        let mut publisher = Publisher::new(core.address().clone());
        publisher.register_topic(topic::WEATHER, |state: &WeatherState, message: Message| {
            message
                .with_metadata(TYPE_KEY, kind::WEATHER)
                .with_json_body(&WeatherBroadcast::from(&state.current))
        });
        InfoTracker::register(&mut publisher);

        let mut subscriptions = Subscriptions::new();
        subscriptions.subscribe_to(core.directory().time.clone(), topic::TIME, on_time);

        let mut time = TimeKeeping::new();
        time.add_task(REFRESH_TASK, WEATHER_PERIOD);

        let state = WeatherState {
            info_base: AgentInfo::service(core.address().clone(), "weather", "waiting for time"),
            time,
            current: source.sample_at(sim_start).unwrap_or_default(),
            source,
            sampled_hour: None,
        };
        Self {
            core,
            state,
            publisher,
            subscriptions,
            info: InfoTracker::default(),
        }
    }

    pub fn spawn(self) -> AgentHandle<AgentInfo> {
        let address = self.core.address().clone();
        AgentHandle::spawn("weather", address, move |shutdown| self.run(shutdown))
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> AgentInfo {
        info!("weather agent ready");
        loop {
            match self.core.next_wake(&mut shutdown).await {
                Wake::Message(message) => self.handle(message),
                Wake::Idle => {}
                Wake::Shutdown => break,
            }
            self.tick(Instant::now());
        }
        self.state.info()
    }

    fn handle(&mut self, message: Message) {
        if self.publisher.handle_message(&message, &self.state, self.core.transport()) {
            return;
        }
        if self.subscriptions.handle_published(&message, &mut self.state) {
            if message.kind() == Some(kind::TIME) {
                self.publish_if_new_hour();
            }
            return;
        }
        warn!(kind = ?message.kind(), "unexpected message dropped");
    }

    fn tick(&mut self, now: Instant) {
        self.subscriptions.poll(now, self.core.address(), self.core.transport());
        if self.state.time.due_tasks(now).contains(&REFRESH_TASK) {
            self.publish_if_new_hour();
        }
        self.info.publish_if_changed(&self.publisher, &self.state, self.core.transport());
    }

    fn publish_if_new_hour(&mut self) {
        if !self.state.refresh() {
            return;
        }
        let current = &self.state.current;
        debug!(
            irradiance = current.irradiance_w_m2,
            wind = current.wind_speed_m_s,
            temperature = current.ambient_temp_c,
            "weather sampled"
        );
        if let Err(e) = self.publisher.publish(topic::WEATHER, None, &self.state, self.core.transport()) {
            warn!(error = %e, "weather broadcast failed");
        }
    }
}

fn on_time(state: &mut WeatherState, body: &Value) -> crate::error::Result<()> {
    let broadcast: TimeBroadcast = serde_json::from_value(body.clone())?;
    state.time.process_time_message(&broadcast)?;
    Ok(())
}
