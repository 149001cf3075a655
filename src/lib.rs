//! Message-driven Virtual Power Plant simulator.
//!
//! Every grid node, device and service runs as its own agent task and
//! talks to the others only through addressed messages.

pub mod agents;
pub mod cli;
/// Scenario files, presets and validation.
pub mod config;
pub mod devices;
pub mod error;
pub mod io;
pub mod logging;
/// Mailing-list publish/subscribe on top of the transport.
pub mod protocol;
pub mod runner;
/// Clock, lifecycle, aggregation and control primitives.
pub mod sim;
pub mod transport;
pub mod weather;

#[cfg(feature = "api")]
pub mod api;
