//! Payment API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::ServerState;
use crate::utils::{AppError, AppResponse, AppResult, ok};
use shared::payment::PaymentAuthorization;

/// Authorization request
#[derive(Debug, Deserialize, Validate)]
pub struct AuthorizeRequest {
    #[validate(length(min = 1, message = "intervention_id is required"))]
    pub intervention_id: String,
    /// Quoted amount in major units (e.g. 120.00)
    pub amount: Decimal,
    /// ISO 4217 code
    #[validate(length(equal = 3, message = "currency must be an ISO 4217 code"))]
    pub currency: String,
    #[validate(email(message = "customer_email must be a valid email"))]
    pub customer_email: String,
}

/// Place a manual-capture hold for the intervention's quoted amount
pub async fn authorize(
    State(state): State<ServerState>,
    Json(payload): Json<AuthorizeRequest>,
) -> AppResult<Json<AppResponse<PaymentAuthorization>>> {
    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let authorization = state
        .payments()
        .authorize(
            &payload.intervention_id,
            payload.amount,
            &payload.currency,
            &payload.customer_email,
        )
        .await?;

    Ok(ok(authorization))
}

/// Cancel response
#[derive(Debug, Serialize)]
pub struct CancelAuthorizationResponse {
    /// Finalized authorization; absent when there was nothing to release
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<PaymentAuthorization>,
}

/// Release the intervention's open hold
///
/// Idempotent: cancelling with no open hold succeeds with an empty body.
pub async fn cancel(
    State(state): State<ServerState>,
    Path(intervention_id): Path<String>,
) -> AppResult<Json<AppResponse<CancelAuthorizationResponse>>> {
    let authorization = state.payments().cancel(&intervention_id).await?;
    Ok(ok(CancelAuthorizationResponse { authorization }))
}
