//! Dispatch API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::ServerState;
use crate::dispatch::scanner::{ScanReport, scan_once};
use crate::utils::{AppError, AppResponse, AppResult, ok};
use shared::dispatch::DispatchAttempt;
use shared::intervention::Intervention;

/// Technician identification for offer responses
#[derive(Debug, Deserialize, Validate)]
pub struct TechnicianActionRequest {
    #[validate(length(min = 1, message = "technician_id is required"))]
    pub technician_id: String,
}

/// Accept an offer
///
/// Succeeds only while the attempt is still pending; an offer already swept
/// as timed out comes back as a conflict, never a reassignment.
pub async fn accept(
    State(state): State<ServerState>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<TechnicianActionRequest>,
) -> AppResult<Json<AppResponse<Intervention>>> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let intervention = state
        .orchestrator()
        .accept(&attempt_id, &payload.technician_id)
        .await?;

    Ok(ok(intervention))
}

/// Decline response
#[derive(Debug, Serialize)]
pub struct DeclineResponse {
    /// Offer made to the next candidate; absent when the chain is exhausted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt: Option<DispatchAttempt>,
}

/// Decline an offer, moving it to the next candidate immediately
pub async fn decline(
    State(state): State<ServerState>,
    Path(attempt_id): Path<String>,
    Json(payload): Json<TechnicianActionRequest>,
) -> AppResult<Json<AppResponse<DeclineResponse>>> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let next_attempt = state
        .orchestrator()
        .decline(&attempt_id, &payload.technician_id)
        .await?;

    Ok(ok(DeclineResponse { next_attempt }))
}

/// Run one timeout sweep now
pub async fn scan(State(state): State<ServerState>) -> AppResult<Json<AppResponse<ScanReport>>> {
    let report = scan_once(state.orchestrator()).await?;
    Ok(ok(report))
}
