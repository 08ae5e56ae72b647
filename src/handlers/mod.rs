use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

pub mod create_payment;
pub mod flow_webhook;
pub mod health;
pub mod payment_redirect;
pub mod verify_payment;

/// Public payment endpoints, mounted at the root as Flow and the storefront expect.
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/flow-webhook", post(flow_webhook::flow_webhook))
        .route(
            "/verify-flow-payment",
            post(verify_payment::verify_flow_payment),
        )
        .route(
            "/create-flow-payment",
            post(create_payment::create_flow_payment),
        )
        .route("/payment-redirect", post(payment_redirect::payment_redirect))
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health::health))
}
