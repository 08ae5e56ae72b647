use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentBody {
    pub order_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentResponse {
    pub success: bool,
    /// Flow checkout page, token included
    pub payment_url: String,
    pub flow_order_id: i64,
    pub token: String,
}

// POST /create-flow-payment
#[utoipa::path(
    post,
    path = "/create-flow-payment",
    request_body = CreatePaymentBody,
    responses(
        (status = 200, description = "Flow payment opened", body = CreatePaymentResponse),
        (status = 400, description = "Order cannot be paid", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Flow rejected the request", body = crate::errors::ErrorResponse),
        (status = 503, description = "Flow unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn create_flow_payment(
    State(state): State<AppState>,
    payload: Result<Json<CreatePaymentBody>, JsonRejection>,
) -> Result<Json<CreatePaymentResponse>, ServiceError> {
    let Json(body) = payload.map_err(|rejection| ServiceError::BadRequest(rejection.body_text()))?;
    let order_id = body
        .order_id
        .ok_or_else(|| ServiceError::BadRequest("orderId is required".to_string()))?;

    let session = state.initiator.initiate(order_id).await?;

    Ok(Json(CreatePaymentResponse {
        success: true,
        payment_url: session.payment_url,
        flow_order_id: session.flow_order_id,
        token: session.token,
    }))
}
