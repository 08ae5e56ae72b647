use axum::{routing::get, Json, Router};
use utoipa::OpenApi;

use crate::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Forja Payments API",
        version = "1.0.0",
        description = r#"
# Forja del Destino payments

Flow.cl payment initiation, confirmation webhook and order settlement.

## Flow callbacks

- `POST /flow-webhook` receives Flow's signed confirmation. It always answers `200 OK`;
  Flow retries anything else.
- `POST /payment-redirect` turns Flow's return POST into a `303` to the storefront's
  callback page.

## Errors

JSON endpoints answer failures as `{"success": false, "error": "..."}`. Security
rejections never say which check failed.
"#
    ),
    paths(
        crate::handlers::flow_webhook::flow_webhook,
        crate::handlers::verify_payment::verify_flow_payment,
        crate::handlers::create_payment::create_flow_payment,
        crate::handlers::payment_redirect::payment_redirect,
        crate::handlers::health::health,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::entities::OrderStatus,
        crate::handlers::verify_payment::VerifyPaymentRequest,
        crate::handlers::verify_payment::VerifyPaymentResponse,
        crate::handlers::create_payment::CreatePaymentBody,
        crate::handlers::create_payment::CreatePaymentResponse,
        crate::handlers::health::HealthResponse,
    )),
    tags(
        (name = "Payments", description = "Flow.cl payment lifecycle"),
        (name = "Health", description = "Service health")
    )
)]
pub struct ApiDoc;

/// Serves the generated document at `/api-docs/openapi.json`.
pub fn openapi_routes() -> Router<AppState> {
    Router::new().route(
        "/api-docs/openapi.json",
        get(|| async { Json(ApiDoc::openapi()) }),
    )
}
