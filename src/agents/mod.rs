//! Agents: one tokio task per grid component or service.
//!
//! Every agent owns an [`AgentCore`] (its address, mailbox and outbound
//! transport) and composes the capabilities it needs (publishing, time
//! keeping, lifecycle) as plain fields. Agents share nothing; they only
//! exchange messages.

pub mod asset;
pub mod fleet;
pub mod network;
pub mod time;
pub mod weather;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

pub use asset::AssetAgent;
pub use fleet::FleetCoordinator;
pub use network::{NetworkAgent, NetworkReport};
pub use time::TimeAgent;
pub use weather::WeatherAgent;

use crate::error::Result;
use crate::logging::agent_span;
use crate::protocol::Publisher;
use crate::protocol::wire::{kind, topic};
use crate::sim::lifecycle::ComponentState;
use crate::transport::{
    Address, LocalTransport, Mailbox, Message, ServiceDirectory, TYPE_KEY, Transport,
};

/// Longest an agent waits on its mailbox before running periodic work.
pub const TICK: Duration = Duration::from_millis(20);

/// Version of the [`AgentInfo`] schema.
pub const INFO_SCHEMA_VERSION: u32 = 1;

/// Snapshot an agent publishes on its `info` topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub schema_version: u32,
    pub address: Address,
    /// `network`, `time`, `weather`, `cpo` or an asset type.
    pub kind: String,
    pub state: ComponentState,
    pub parent: Option<Address>,
    pub children: Vec<Address>,
    /// Reported power; 0 unless the agent is running.
    pub net_power_kw: f64,
    pub max_power_kw: Option<f64>,
    pub status: String,
}

impl AgentInfo {
    /// Creates an info record for a service agent (no power, no tree).
    pub fn service(address: Address, kind: &str, status: &str) -> Self {
        Self {
            schema_version: INFO_SCHEMA_VERSION,
            address,
            kind: kind.to_string(),
            state: ComponentState::Running,
            parent: None,
            children: Vec::new(),
            net_power_kw: 0.0,
            max_power_kw: None,
            status: status.to_string(),
        }
    }
}

/// Anything that can describe itself as an [`AgentInfo`].
pub trait Describe {
    fn info(&self) -> AgentInfo;
}

/// Why an agent's event loop woke up.
#[derive(Debug)]
pub enum Wake {
    Message(Message),
    /// The tick elapsed without a message.
    Idle,
    Shutdown,
}

/// Address, mailbox and outbound transport of one agent.
pub struct AgentCore {
    address: Address,
    mailbox: Mailbox,
    transport: Arc<dyn Transport>,
    directory: Arc<ServiceDirectory>,
}

impl AgentCore {
    /// Registers `address` on the local transport.
    ///
    /// # Errors
    ///
    /// Returns `GridError::DuplicateAddress` if the address is taken.
    pub fn register(
        address: Address,
        transport: &Arc<LocalTransport>,
        directory: Arc<ServiceDirectory>,
    ) -> Result<Self> {
        let mailbox = transport.register(&address)?;
        Ok(Self {
            address,
            mailbox,
            transport: transport.clone(),
            directory,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn directory(&self) -> &ServiceDirectory {
        &self.directory
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Stamps the sender and hands `message` to the transport.
    pub fn send(&self, mut message: Message) {
        message.sender = Some(self.address.clone());
        self.transport.send(message);
    }

    /// Waits for the next message, the end of the tick, or shutdown.
    pub async fn next_wake(&mut self, shutdown: &mut watch::Receiver<bool>) -> Wake {
        if *shutdown.borrow() {
            return Wake::Shutdown;
        }
        let sender_gone = tokio::select! {
            biased;
            changed = shutdown.changed() => changed.is_err(),
            message = self.mailbox.receive(TICK) => {
                return message.map_or(Wake::Idle, Wake::Message);
            }
        };
        if sender_gone || *shutdown.borrow() {
            Wake::Shutdown
        } else {
            Wake::Idle
        }
    }

    /// Returns messages already queued, without waiting.
    pub fn drain(&mut self) -> Vec<Message> {
        std::iter::from_fn(|| self.mailbox.try_receive()).collect()
    }
}

/// Publishes the `info` topic whenever the described state changes.
#[derive(Debug, Default)]
pub struct InfoTracker {
    last: Option<AgentInfo>,
}

impl InfoTracker {
    /// Registers the `info` topic on `publisher`.
    pub fn register<S: Describe + 'static>(publisher: &mut Publisher<S>) {
        publisher.register_topic(topic::INFO, |state: &S, message: Message| {
            message
                .with_metadata(TYPE_KEY, kind::INFO)
                .with_json_body(&state.info())
        });
    }

    /// Publishes `info` to all subscribers if it differs from the last one.
    pub fn publish_if_changed<S: Describe>(
        &mut self,
        publisher: &Publisher<S>,
        state: &S,
        transport: &dyn Transport,
    ) {
        let info = state.info();
        if self.last.as_ref() == Some(&info) {
            return;
        }
        self.last = Some(info);
        if let Err(e) = publisher.publish(topic::INFO, None, state, transport) {
            tracing::warn!(error = %e, "info publish failed");
        }
    }
}

/// Handle to a running agent task.
pub struct AgentHandle<T> {
    address: Address,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<T>,
}

impl<T: Send + 'static> AgentHandle<T> {
    /// Spawns `run` inside the agent's tracing span.
    pub fn spawn<F, Fut>(kind: &'static str, address: Address, run: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (shutdown, rx) = watch::channel(false);
        let span = agent_span(kind, address.as_str());
        let task = tokio::spawn(run(rx).instrument(span));
        Self {
            address,
            shutdown,
            task,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Asks the agent to stop and waits for its final output.
    ///
    /// # Errors
    ///
    /// Returns `GridError::Join` if the agent task panicked.
    pub async fn stop(self) -> Result<T> {
        let _ = self.shutdown.send(true);
        Ok(self.task.await?)
    }
}
