//! HTTP handlers: trigger inbound, manual resync, status and lookup.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use entitle_core::UnitId;
use entitle_sync::trigger::INVALID_ACTION;
use entitle_sync::{
    schedule_delayed_resync, RunMode, RunPhase, RunReport, RunStatistics, TriggerDecision,
    TriggerEvent, TriggerSource,
};

use crate::error::ApiError;
use crate::state::AppState;

/// `POST /events`: inbound export events.
pub async fn receive_event(
    State(state): State<AppState>,
    Json(event): Json<TriggerEvent>,
) -> impl IntoResponse {
    match state.trigger.decide(&event) {
        TriggerDecision::Schedule(delay) => {
            schedule_delayed_resync(
                Arc::clone(&state.orchestrator),
                state.trigger.clone(),
                delay,
            );
            (StatusCode::OK, Json(json!({ "status": "ok" })))
        }
        TriggerDecision::Ignore => {
            info!(
                export_format = ?event.export_format,
                "Export event ignored, format does not match"
            );
            (StatusCode::OK, Json(json!({ "status": "ok" })))
        }
        TriggerDecision::Invalid => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "error", "message": INVALID_ACTION })),
        ),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ResyncParams {
    #[serde(default)]
    pub mode: Option<RunMode>,
}

/// `POST /resync`: run a resync now and return its report.
///
/// The run is detached from the request; a client disconnect does not
/// cancel it.
pub async fn resync(
    State(state): State<AppState>,
    Query(params): Query<ResyncParams>,
) -> Result<Json<RunReport>, ApiError> {
    let mode = params.mode.unwrap_or(RunMode::Full);
    let orchestrator = Arc::clone(&state.orchestrator);
    let report = tokio::spawn(async move {
        orchestrator
            .resync_with(TriggerSource::Manual, mode)
            .await
    })
    .await??;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub phase: RunPhase,
    pub running: bool,
    pub store_backend: &'static str,
    pub units_stored: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<RunStatistics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<RunReport>,
}

/// `GET /status`: phase, store size and the last run.
pub async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let orchestrator = &state.orchestrator;
    let units_stored = orchestrator.store().len().await?;

    Ok(Json(StatusResponse {
        phase: orchestrator.phase(),
        running: orchestrator.is_running(),
        store_backend: orchestrator.store().backend_name(),
        units_stored,
        current: orchestrator.current_statistics(),
        last_run: orchestrator.last_report(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementLookup {
    pub external_code: String,
}

/// `GET /entitlements/:unit_id/:app_code`: external code of an entitled unit.
pub async fn lookup_entitlement(
    State(state): State<AppState>,
    Path((unit_id, app_code)): Path<(String, String)>,
) -> Result<Json<EntitlementLookup>, ApiError> {
    let found = state
        .orchestrator
        .store()
        .lookup(&UnitId::new(unit_id.as_str()), &app_code)
        .await?;

    match found {
        Some(external_code) => Ok(Json(EntitlementLookup { external_code })),
        None => Err(ApiError::NotFound { unit_id, app_code }),
    }
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.uptime_seconds(),
        "phase": state.orchestrator.phase(),
    }))
}
