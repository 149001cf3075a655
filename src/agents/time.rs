//! Clock authority: owns the virtual clock and broadcasts it on `time`.

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{info, warn};

use super::{AgentCore, AgentHandle, AgentInfo, Describe, InfoTracker, Wake};
use crate::protocol::Publisher;
use crate::protocol::wire::{RateChange, TimeBroadcast, kind, topic};
use crate::sim::clock::VirtualClock;
use crate::transport::{Message, TYPE_KEY};

/// State read by the time agent's topic producers.
pub struct TimeState {
    info_base: AgentInfo,
    clock: VirtualClock,
    end: DateTime<Utc>,
}

impl TimeState {
    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    fn status(&self) -> &'static str {
        if self.clock.sim_now() >= self.end {
            "ended"
        } else if self.clock.is_paused() {
            "paused"
        } else {
            "running"
        }
    }

    fn broadcast(&self) -> TimeBroadcast {
        TimeBroadcast::new(self.clock.real_anchor(), self.clock.sim_anchor(), self.clock.rate())
    }
}

impl Describe for TimeState {
    fn info(&self) -> AgentInfo {
        AgentInfo {
            status: self.status().to_string(),
            ..self.info_base.clone()
        }
    }
}

/// The single clock authority of a simulation.
///
/// Starts paused at the simulation start; a `rate_change` message resumes
/// (or re-paces, or pauses) it and every change is broadcast to the `time`
/// subscribers.
pub struct TimeAgent {
    core: AgentCore,
    state: TimeState,
    publisher: Publisher<TimeState>,
    info: InfoTracker,
}

impl TimeAgent {
    pub fn new(core: AgentCore, sim_start: DateTime<Utc>, sim_end: DateTime<Utc>) -> Self {
        let mut publisher = Publisher::new(core.address().clone());
        publisher.register_topic(topic::TIME, |state: &TimeState, message: Message| {
            message
                .with_metadata(TYPE_KEY, kind::TIME)
                .with_json_body(&state.broadcast())
        });
        InfoTracker::register(&mut publisher);

        let state = TimeState {
            info_base: AgentInfo::service(core.address().clone(), "time", "paused"),
            clock: VirtualClock::paused(sim_start),
            end: sim_end,
        };
        Self {
            core,
            state,
            publisher,
            info: InfoTracker::default(),
        }
    }

    pub fn spawn(self) -> AgentHandle<AgentInfo> {
        let address = self.core.address().clone();
        AgentHandle::spawn("time", address, move |shutdown| self.run(shutdown))
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> AgentInfo {
        info!(sim_start = %self.state.clock.sim_anchor(), sim_end = %self.state.end, "clock ready (paused)");
        loop {
            match self.core.next_wake(&mut shutdown).await {
                Wake::Message(message) => self.handle(message),
                Wake::Idle => {}
                Wake::Shutdown => break,
            }
            self.info.publish_if_changed(&self.publisher, &self.state, self.core.transport());
        }
        for message in self.core.drain() {
            self.handle(message);
        }
        self.state.info()
    }

    fn handle(&mut self, message: Message) {
        if self.publisher.handle_message(&message, &self.state, self.core.transport()) {
            return;
        }
        match message.kind() {
            Some(kind::RATE_CHANGE) => self.handle_rate_change(&message),
            other => warn!(kind = ?other, "unexpected message dropped"),
        }
    }

    fn handle_rate_change(&mut self, message: &Message) {
        let change: RateChange = match message.parse_body() {
            Ok(change) => change,
            Err(e) => {
                warn!(error = %e, "malformed rate_change dropped");
                return;
            }
        };
        match self.state.clock.set_rate(change.rate.value) {
            Ok(old) => {
                info!(old_rate = old, new_rate = change.rate.value, sim_time = %self.state.clock.sim_anchor(), "rate changed");
                if let Err(e) = self.publisher.publish(topic::TIME, None, &self.state, self.core.transport()) {
                    warn!(error = %e, "time broadcast failed");
                }
            }
            Err(e) => warn!(error = %e, "rate change rejected"),
        }
    }
}
