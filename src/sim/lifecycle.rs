//! Component lifecycle: registration to a parent, start/stop and the power
//! reports those transitions trigger.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{GridError, Result};
use crate::protocol::wire::{PowerUpdate, kind};
use crate::transport::{Address, Message};

/// Lifecycle state of a grid component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    Unregistered,
    Registered,
    Running,
    Stopped,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentState::Unregistered => write!(f, "unregistered"),
            ComponentState::Registered => write!(f, "registered"),
            ComponentState::Running => write!(f, "running"),
            ComponentState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Lifecycle capability shared by leaves and interior nodes.
#[derive(Debug, Clone)]
pub struct Component {
    address: Address,
    parent: Option<Address>,
    state: ComponentState,
}

impl Component {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            parent: None,
            state: ComponentState::Unregistered,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn parent(&self) -> Option<&Address> {
        self.parent.as_ref()
    }

    pub fn state(&self) -> ComponentState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ComponentState::Running
    }

    /// Assigns the parent and builds the one `register_child` message.
    ///
    /// # Errors
    ///
    /// * `GridError::InvalidAddress` - `parent` does not parse
    /// * `GridError::AlreadyParented` - a parent was already assigned
    /// * `GridError::InvalidTransition` - the component is not unregistered
    pub fn assign_parent(&mut self, parent: &str) -> Result<Message> {
        if let Some(existing) = &self.parent {
            return Err(GridError::AlreadyParented {
                address: self.address.to_string(),
                parent: existing.to_string(),
            });
        }
        let parent = Address::parse(parent)?;
        self.transition(ComponentState::Registered)?;
        debug!(address = %self.address, %parent, "registered to parent");
        let message = self.stamp(Message::of_kind(kind::REGISTER_CHILD).with_to(parent.clone()));
        self.parent = Some(parent);
        Ok(message)
    }

    /// Enters `Running`.
    ///
    /// # Errors
    ///
    /// Returns `GridError::InvalidTransition` unless the component is
    /// unregistered or registered.
    pub fn start(&mut self) -> Result<()> {
        self.transition(ComponentState::Running)?;
        info!(address = %self.address, "running");
        Ok(())
    }

    /// Enters `Stopped`. Stopping twice is a no-op.
    pub fn stop(&mut self) {
        if self.state != ComponentState::Stopped {
            self.state = ComponentState::Stopped;
            info!(address = %self.address, "stopped");
        }
    }

    /// Value to report upward: the live value when running, 0 otherwise.
    pub fn reported_power(&self, live_kw: f64) -> f64 {
        if self.is_running() { live_kw } else { 0.0 }
    }

    /// Builds a `power_update` for the parent, or `None` without a parent.
    pub fn power_report(&self, live_kw: f64) -> Option<Message> {
        let parent = self.parent.clone()?;
        let message = Message::of_kind(kind::POWER_UPDATE)
            .with_to(parent)
            .with_json_body(&PowerUpdate::kw(self.reported_power(live_kw)))
            .ok()?;
        Some(self.stamp(message))
    }

    fn stamp(&self, mut message: Message) -> Message {
        message.sender = Some(self.address.clone());
        message
    }

    fn transition(&mut self, to: ComponentState) -> Result<()> {
        use ComponentState::*;
        let allowed = matches!(
            (self.state, to),
            (Unregistered, Registered) | (Unregistered, Running) | (Registered, Running)
        );
        if !allowed {
            return Err(GridError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}
