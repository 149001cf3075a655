//! Point-to-point message transport between agents.
//!
//! Agents never share memory; everything they know about each other
//! arrives as a [`Message`] through a [`Transport`]. Delivery is
//! best-effort: a message to an unknown address is logged and dropped.

mod address;
mod local;
mod message;

pub use address::Address;
pub use local::{LocalTransport, Mailbox};
pub use message::{Message, QUEUE_KEY, TYPE_KEY};

use crate::error::Result;

/// Sending half of a transport.
pub trait Transport: Send + Sync {
    /// Attempts delivery of `message` to `message.to` once.
    fn send(&self, message: Message);
}

/// Well-known service addresses for one simulation domain.
///
/// Passed to every agent at construction instead of deriving addresses
/// from global state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDirectory {
    pub time: Address,
    pub weather: Address,
    pub root_network: Address,
}

impl ServiceDirectory {
    /// Local part of the clock authority's address.
    pub const TIME_LOCALPART: &'static str = "time_agent";
    /// Local part of the weather authority's address.
    pub const WEATHER_LOCALPART: &'static str = "weather_agent";

    /// Builds the directory for `domain` with the given root network address.
    ///
    /// # Errors
    ///
    /// Returns `GridError::InvalidAddress` if `domain` is not a valid domain.
    pub fn new(domain: &str, root_network: Address) -> Result<Self> {
        Ok(Self {
            time: Address::new(Self::TIME_LOCALPART, domain)?,
            weather: Address::new(Self::WEATHER_LOCALPART, domain)?,
            root_network,
        })
    }
}
