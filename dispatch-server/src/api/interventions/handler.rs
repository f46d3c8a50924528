//! Intervention API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::ServerState;
use crate::utils::{AppError, AppResponse, AppResult, ok};
use shared::dispatch::DispatchAttempt;
use shared::intervention::{Intervention, InterventionStatus, Priority, ServiceCategory};
use shared::payment::PaymentAuthorization;
use shared::util;

/// Create intervention request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateInterventionRequest {
    #[validate(length(min = 1, message = "client_id is required"))]
    pub client_id: String,
    pub category: ServiceCategory,
    #[serde(default)]
    pub priority: Priority,
    #[validate(length(min = 1, message = "address is required"))]
    pub address: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub estimated_price: Option<Decimal>,
    /// Requested schedule (Unix millis)
    pub scheduled_at: Option<i64>,
}

/// Create intervention response
#[derive(Debug, Serialize)]
pub struct CreateInterventionResponse {
    pub intervention: Intervention,
    /// First offer, absent when no technician was available
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<DispatchAttempt>,
}

/// Submit an intervention and offer it to the first available technician
pub async fn create(
    State(state): State<ServerState>,
    Json(payload): Json<CreateInterventionRequest>,
) -> AppResult<Json<AppResponse<CreateInterventionResponse>>> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    if let Some(price) = payload.estimated_price {
        if price <= Decimal::ZERO {
            return Err(AppError::Validation(
                "estimated_price must be positive".to_string(),
            ));
        }
    }

    let mut intervention = Intervention::new(
        util::new_id(),
        payload.client_id,
        payload.category,
        payload.priority,
        payload.address,
    );
    intervention.latitude = payload.latitude;
    intervention.longitude = payload.longitude;
    intervention.estimated_price = payload.estimated_price;
    intervention.scheduled_at = payload.scheduled_at;

    let (intervention, attempt) = state.orchestrator().begin_dispatch(intervention).await?;

    Ok(ok(CreateInterventionResponse {
        intervention,
        attempt,
    }))
}

/// Intervention detail with offer history and open payment hold
#[derive(Debug, Serialize)]
pub struct InterventionDetail {
    pub intervention: Intervention,
    /// Every offer made for this intervention, oldest first
    pub attempts: Vec<DispatchAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_authorization: Option<PaymentAuthorization>,
}

/// Get intervention by id, with its dispatch and payment context
pub async fn get_by_id(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<AppResponse<InterventionDetail>>> {
    let intervention = state
        .storage
        .get_intervention(&id)?
        .ok_or_else(|| AppError::NotFound(format!("Intervention {} not found", id)))?;
    let attempts = state.storage.attempts_for_intervention(&id)?;
    let open_authorization = state.storage.open_authorization_for_intervention(&id)?;

    Ok(ok(InterventionDetail {
        intervention,
        attempts,
        open_authorization,
    }))
}

/// Cancel response
#[derive(Debug, Serialize)]
pub struct CancelInterventionResponse {
    pub intervention: Intervention,
    /// Hold released as part of the cancellation, if one was open
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released_authorization: Option<PaymentAuthorization>,
}

/// Abandon an intervention
///
/// Cancels the open offer (if any) and releases the payment hold. Safe to
/// retry: a second call on an already cancelled intervention is a no-op.
pub async fn cancel(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<AppResponse<CancelInterventionResponse>>> {
    let intervention = state.orchestrator().cancel_intervention(&id).await?;
    let released_authorization = state.payments().cancel(&id).await?;

    Ok(ok(CancelInterventionResponse {
        intervention,
        released_authorization,
    }))
}

/// Status progression request
#[derive(Debug, Deserialize, Validate)]
pub struct ProgressRequest {
    #[validate(length(min = 1, message = "technician_id is required"))]
    pub technician_id: String,
    pub status: InterventionStatus,
}

/// Progress the intervention through its work states
///
/// Only the assigned technician may progress, and only along
/// ASSIGNED → EN_ROUTE → IN_PROGRESS → COMPLETED.
pub async fn progress(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(payload): Json<ProgressRequest>,
) -> AppResult<Json<AppResponse<Intervention>>> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let intervention = state
        .orchestrator()
        .progress(&id, &payload.technician_id, payload.status)
        .await?;

    Ok(ok(intervention))
}
