//! Request handlers for the API endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use super::AppState;
use super::types::{ErrorResponse, PowerQuery, PowerRecord, StateResponse};

/// `GET /state` → 200 + `StateResponse` JSON
pub async fn get_state(State(state): State<Arc<AppState>>) -> Json<StateResponse> {
    let report = &state.report;
    Json(StateResponse {
        root: report.root.clone(),
        sim_start: report.sim_start,
        sim_end: report.sim_end,
        stopped_at: report.stopped_at,
        end_reason: report.end_reason,
        summary: report.summary,
        agents: report.agents.clone(),
        warnings: report.warnings.clone(),
    })
}

/// Returns the root power log, optionally filtered by index range.
///
/// `GET /power` → 200 + `Vec<PowerRecord>` JSON
/// `GET /power?from=N&to=M` → filtered range (inclusive)
/// `GET /power?from=10&to=5` → 400 + `ErrorResponse`
pub async fn get_power(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PowerQuery>,
) -> impl IntoResponse {
    let from = query.from.unwrap_or(0);
    let to = query.to.unwrap_or(usize::MAX);

    if from > to {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("`from` ({from}) must be <= `to` ({to})"),
            }),
        ));
    }

    let records: Vec<PowerRecord> = state
        .report
        .samples
        .iter()
        .enumerate()
        .filter(|(i, _)| (from..=to).contains(i))
        .map(|(i, s)| PowerRecord::new(i, s))
        .collect();

    Ok(Json(records))
}
