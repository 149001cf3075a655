//! REST API over the report of a finished run.
//!
//! Provides two GET endpoints:
//! - `/state`: span, end reason, power summary, agent table and warnings
//! - `/power`: root power log with optional index range filtering

mod handlers;
mod types;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tracing::info;

use crate::error::Result;
use crate::runner::SimulationReport;

pub use types::{ErrorResponse, PowerQuery, PowerRecord, StateResponse};

/// Immutable application state shared across all request handlers.
///
/// Built once after the run completes; read-only, so no locks.
pub struct AppState {
    pub report: SimulationReport,
}

/// Builds the axum router with all API routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/state", get(handlers::get_state))
        .route("/power", get(handlers::get_power))
        .with_state(state)
}

/// Binds to `addr` and serves the API until the process ends.
///
/// # Errors
///
/// Returns `GridError::Io` if the listener cannot bind or the server fails.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
