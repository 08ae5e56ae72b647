use axum::{extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use metrics::counter;
use tracing::{error, info, warn};

use crate::errors::ServiceError;
use crate::flow::FlowParams;
use crate::AppState;

/// Decodes an `application/x-www-form-urlencoded` body. A repeated key keeps
/// its last value.
pub fn parse_form(body: &[u8]) -> FlowParams {
    url::form_urlencoded::parse(body).into_owned().collect()
}

// POST /flow-webhook
#[utoipa::path(
    post,
    path = "/flow-webhook",
    request_body(
        content = String,
        content_type = "application/x-www-form-urlencoded",
        description = "Signed Flow notification: token, flowOrder, status, commerceOrder, amount, paymentMethod, s"
    ),
    responses(
        (status = 200, description = "Always acknowledged, whatever the outcome", body = String, content_type = "text/plain")
    ),
    tag = "Payments"
)]
pub async fn flow_webhook(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let params = parse_form(&body);
    counter!("forja_webhook.received", 1);

    match state.verifier.process_webhook(&params).await {
        Ok(outcome) => info!(
            order_id = outcome.order_id,
            status = %outcome.status,
            transition = %outcome.transition,
            stock_success = outcome.stock.success,
            audited = outcome.audited,
            "Flow webhook processed"
        ),
        Err(ServiceError::Security(violation)) => warn!(
            commerce_order = params.get("commerceOrder").map(String::as_str),
            violation = %violation,
            "Flow webhook rejected"
        ),
        Err(e) => error!(
            commerce_order = params.get("commerceOrder").map(String::as_str),
            error = %e,
            "Flow webhook processing failed"
        ),
    }

    // Flow retries on anything but 200
    (StatusCode::OK, "OK")
}
