//! API response and query types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agents::AgentInfo;
use crate::runner::EndReason;
use crate::sim::aggregator::{PowerSample, PowerSummary};
use crate::transport::Address;

/// `GET /state` body.
#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub root: Address,
    pub sim_start: DateTime<Utc>,
    pub sim_end: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub end_reason: EndReason,
    pub summary: PowerSummary,
    pub agents: Vec<AgentInfo>,
    pub warnings: Vec<String>,
}

/// One entry of the root power log.
#[derive(Debug, Serialize)]
pub struct PowerRecord {
    /// Position in the log.
    pub index: usize,
    pub timestamp: DateTime<Utc>,
    pub net_power_kw: f64,
}

impl PowerRecord {
    pub fn new(index: usize, sample: &PowerSample) -> Self {
        Self {
            index,
            timestamp: sample.sim_time,
            net_power_kw: sample.net_power_kw,
        }
    }
}

/// Query parameters of `GET /power` (inclusive index range).
#[derive(Debug, Deserialize)]
pub struct PowerQuery {
    pub from: Option<usize>,
    pub to: Option<usize>,
}

/// Error body returned with 4xx responses.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
