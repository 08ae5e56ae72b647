use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entities::OrderStatus;
use crate::errors::ServiceError;
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyPaymentRequest {
    /// Token Flow appended to the return URL
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    pub success: bool,
    pub order_id: i64,
    pub status: OrderStatus,
    /// Raw Flow status code (1 pending, 2 paid, 3 rejected, 4 cancelled)
    pub flow_status: i64,
    pub payment_method: String,
}

// POST /verify-flow-payment
#[utoipa::path(
    post,
    path = "/verify-flow-payment",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Payment status confirmed with Flow", body = VerifyPaymentResponse),
        (status = 400, description = "Missing token", body = crate::errors::ErrorResponse),
        (status = 403, description = "Payment could not be verified", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 503, description = "Flow unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn verify_flow_payment(
    State(state): State<AppState>,
    payload: Result<Json<VerifyPaymentRequest>, JsonRejection>,
) -> Result<Json<VerifyPaymentResponse>, ServiceError> {
    let Json(request) =
        payload.map_err(|rejection| ServiceError::BadRequest(rejection.body_text()))?;
    let token = request
        .token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ServiceError::BadRequest("token is required".to_string()))?;

    let outcome = state.verifier.verify_token(&token).await?;

    Ok(Json(VerifyPaymentResponse {
        success: true,
        order_id: outcome.order_id,
        status: outcome.status,
        flow_status: outcome.flow_status,
        payment_method: outcome.payment_method,
    }))
}
