mod common;

use axum::http::{header, StatusCode};
use common::{body_json, TestApp};
use serde_json::json;
use std::time::{Duration, Instant};
use wiremock::{
    matchers::{body_string_contains, method, path, query_param},
    Mock, ResponseTemplate,
};

async fn mock_status(app: &TestApp, token: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/payment/getStatus"))
        .and(query_param("token", token))
        .and(query_param("apiKey", common::API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&app.flow)
        .await;
}

#[tokio::test]
async fn verify_settles_paid_order_from_status_lookup() {
    let app = TestApp::new().await;
    let (_, lamp) = app.seed_standard_order(5).await;
    mock_status(
        &app,
        "abc123",
        json!({
            "flowOrder": 8765,
            "commerceOrder": "42",
            "status": 2,
            "amount": "19990",
            "paymentData": { "media": "1" }
        }),
    )
    .await;

    let response = app
        .post_json("/verify-flow-payment", json!({ "token": "abc123" }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["orderId"], 42);
    assert_eq!(body["status"], "paid");
    assert_eq!(body["flowStatus"], 2);
    assert_eq!(body["paymentMethod"], "Webpay");

    assert_eq!(app.order(42).await.status, "paid");
    assert_eq!(app.stock(lamp.id).await, 3);
    let audit = app.audit_rows(42).await;
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].channel, "status_lookup");
}

#[tokio::test]
async fn verify_after_webhook_reports_existing_status() {
    let app = TestApp::new().await;
    let (_, lamp) = app.seed_standard_order(5).await;
    mock_status(
        &app,
        "abc123",
        json!({ "commerceOrder": 42, "status": 2, "amount": 19990, "paymentMethod": 1 }),
    )
    .await;

    app.post_signed_webhook(&[
        ("token", "abc123"),
        ("commerceOrder", "42"),
        ("status", "2"),
        ("amount", "19990"),
    ])
    .await;

    let response = app
        .post_json("/verify-flow-payment", json!({ "token": "abc123" }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "paid");
    assert_eq!(app.stock(lamp.id).await, 3);
}

#[tokio::test]
async fn verify_requires_a_token() {
    let app = TestApp::new().await;

    for body in [json!({}), json!({ "token": "  " })] {
        let response = app.post_json("/verify-flow-payment", body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "token is required");
    }
}

#[tokio::test]
async fn verify_rejects_token_not_bound_to_order() {
    let app = TestApp::new().await;
    app.seed_standard_order(5).await;
    mock_status(
        &app,
        "other-token",
        json!({ "commerceOrder": 42, "status": 2, "amount": 19990 }),
    )
    .await;

    let response = app
        .post_json("/verify-flow-payment", json!({ "token": "other-token" }))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Payment could not be verified");
    assert_eq!(app.order(42).await.status, "pending");
}

#[tokio::test]
async fn verify_reports_gateway_outage_as_unavailable() {
    let app = TestApp::new().await;
    app.seed_standard_order(5).await;
    Mock::given(method("GET"))
        .and(path("/payment/getStatus"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&app.flow)
        .await;

    let response = app
        .post_json("/verify-flow-payment", json!({ "token": "abc123" }))
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(app.order(42).await.status, "pending");
}

#[tokio::test]
async fn slow_gateway_on_verify_answers_json_before_request_timeout() {
    let app = TestApp::with_config(|cfg| {
        cfg.flow_timeout_secs = 4;
        cfg.flow_max_retries = 3;
        cfg.flow_deadline_secs = 2;
        cfg.settlement_timeout_secs = 1;
    })
    .await;
    app.seed_standard_order(5).await;
    Mock::given(method("GET"))
        .and(path("/payment/getStatus"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(6))
                .set_body_json(json!({ "commerceOrder": 42, "status": 2, "amount": 19990 })),
        )
        .mount(&app.flow)
        .await;

    let started = Instant::now();
    let response = app
        .post_json("/verify-flow-payment", json!({ "token": "abc123" }))
        .await;

    assert!(started.elapsed() < app.state.config.request_timeout());
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(
        body["error"],
        "Payment gateway temporarily unavailable, please retry"
    );
    assert_eq!(app.order(42).await.status, "pending");
}

#[tokio::test]
async fn create_opens_payment_and_stores_token() {
    let app = TestApp::new().await;
    let lamp = app.seed_product("sol", 4).await;
    app.seed_order(42, 19990, None, &[(&lamp, 2)]).await;

    Mock::given(method("POST"))
        .and(path("/payment/create"))
        .and(body_string_contains("commerceOrder=42"))
        .and(body_string_contains("amount=19990"))
        .and(body_string_contains("apiKey=test-api-key"))
        .and(body_string_contains("s="))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "url": "https://sandbox.flow.cl/app/web/pay.php",
            "token": "tok-new",
            "flowOrder": 9911
        })))
        .expect(1)
        .mount(&app.flow)
        .await;

    let response = app
        .post_json("/create-flow-payment", json!({ "orderId": 42 }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(
        body["paymentUrl"],
        "https://sandbox.flow.cl/app/web/pay.php?token=tok-new"
    );
    assert_eq!(body["flowOrderId"], 9911);
    assert_eq!(body["token"], "tok-new");

    let order = app.order(42).await;
    assert_eq!(order.flow_token.as_deref(), Some("tok-new"));
    assert_eq!(order.flow_order_id, Some(9911));
    assert_eq!(order.status, "pending");
}

#[tokio::test]
async fn create_rejects_orders_that_cannot_be_paid() {
    let app = TestApp::new().await;
    app.seed_standard_order(5).await;
    Mock::given(method("POST"))
        .and(path("/payment/create"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&app.flow)
        .await;

    // Already carries a token
    let response = app
        .post_json("/create-flow-payment", json!({ "orderId": 42 }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let missing = app
        .post_json("/create-flow-payment", json!({ "orderId": 777 }))
        .await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(missing).await["error"], "Order not found");

    let no_id = app.post_json("/create-flow-payment", json!({})).await;
    assert_eq!(no_id.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(no_id).await["error"], "orderId is required");
}

#[tokio::test]
async fn create_maps_gateway_server_error_to_unavailable() {
    let app = TestApp::new().await;
    let lamp = app.seed_product("sol", 4).await;
    app.seed_order(42, 19990, None, &[(&lamp, 1)]).await;
    Mock::given(method("POST"))
        .and(path("/payment/create"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(1)
        .mount(&app.flow)
        .await;

    let response = app
        .post_json("/create-flow-payment", json!({ "orderId": 42 }))
        .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(app.order(42).await.flow_token.is_none());
}

#[tokio::test]
async fn redirect_forwards_token_to_callback_page() {
    let app = TestApp::new().await;

    let response = app
        .post_form("/payment-redirect", "token=abc%2B123".to_string())
        .await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        response.headers()[header::LOCATION],
        "/payment/callback?token=abc%2B123"
    );

    let bare = app.post_form("/payment-redirect", String::new()).await;
    assert_eq!(bare.status(), StatusCode::SEE_OTHER);
    assert_eq!(bare.headers()[header::LOCATION], "/payment/callback");
}

#[tokio::test]
async fn health_reports_database_connectivity() {
    let app = TestApp::new().await;

    let response = app.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "connected");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new().await;

    let response = app.get("/api-docs/openapi.json").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body["paths"]["/flow-webhook"].is_object());
    assert!(body["paths"]["/create-flow-payment"].is_object());
}

#[tokio::test]
async fn responses_carry_request_id() {
    let app = TestApp::new().await;

    let response = app.get("/health").await;
    assert!(response.headers().contains_key("x-request-id"));
}
