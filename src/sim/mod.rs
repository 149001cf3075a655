/// Power aggregation of a network node and the root power log.
pub mod aggregator;
/// Virtual simulation clock.
pub mod clock;
/// Proportional congestion controller.
pub mod controller;
pub mod lifecycle;
/// Per-agent view of the virtual clock plus periodic tasks.
pub mod time_keeping;
