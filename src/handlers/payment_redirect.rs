use axum::{extract::State, response::Redirect};
use bytes::Bytes;
use tracing::debug;

use super::flow_webhook::parse_form;
use crate::AppState;

/// Location for the single-page app's callback route.
pub fn callback_location(callback_path: &str, token: Option<&str>) -> String {
    match token.map(str::trim).filter(|t| !t.is_empty()) {
        Some(token) => {
            let encoded: String = url::form_urlencoded::byte_serialize(token.as_bytes()).collect();
            format!("{}?token={}", callback_path, encoded)
        }
        None => callback_path.to_string(),
    }
}

// POST /payment-redirect
#[utoipa::path(
    post,
    path = "/payment-redirect",
    request_body(
        content = String,
        content_type = "application/x-www-form-urlencoded",
        description = "Flow return POST, optionally carrying `token`"
    ),
    responses(
        (status = 303, description = "Redirect to the payment callback page")
    ),
    tag = "Payments"
)]
pub async fn payment_redirect(State(state): State<AppState>, body: Bytes) -> Redirect {
    let params = parse_form(&body);
    let location = callback_location(
        &state.config.payment_callback_path,
        params.get("token").map(String::as_str),
    );
    debug!(has_token = params.contains_key("token"), "Redirecting Flow return");
    Redirect::to(&location)
}
