#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use forja_payments::{
    config::AppConfig,
    db,
    entities::{order, order_item, payment_audit_log, product},
    flow::{Backoff, FlowClient, FlowParams, FlowSigner, PaymentGateway},
    AppState,
};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value;
use tower::ServiceExt;
use wiremock::MockServer;

pub const API_KEY: &str = "test-api-key";
pub const SECRET: &str = "test-flow-secret";

/// Helper harness for an application backed by in-memory SQLite and a mocked Flow API.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    pub flow: MockServer,
    signer: FlowSigner,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Construct a new test application, letting the caller adjust the config.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let flow = MockServer::start().await;

        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
            API_KEY.to_string(),
            SECRET.to_string(),
        );
        // A single connection keeps every query on the same in-memory database
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.flow_api_url = flow.uri();
        cfg.flow_max_retries = 2;
        cfg.flow_webhook_url = Some("https://api.example.cl/flow-webhook".to_string());
        cfg.flow_return_url = Some("https://api.example.cl/payment-redirect".to_string());
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let signer = FlowSigner::new(SECRET).expect("test secret");
        let gateway: Arc<dyn PaymentGateway> = Arc::new(
            FlowClient::from_app_config(&cfg)
                .expect("flow client")
                .with_backoff(Backoff {
                    max_attempts: cfg.flow_max_retries,
                    initial_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(5),
                    factor: 2.0,
                }),
        );

        let state = AppState::build(db.clone(), cfg, gateway).expect("app state");
        let router = forja_payments::app(state.clone());

        Self {
            router,
            state,
            db,
            flow,
            signer,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    pub async fn post_form(&self, uri: &str, body: String) -> Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .expect("failed to build request");
        self.send(request).await
    }

    pub async fn post_json(&self, uri: &str, json: Value) -> Response {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::to_vec(&json).expect("failed to serialize json request body"),
            ))
            .expect("failed to build request");
        self.send(request).await
    }

    pub async fn get(&self, uri: &str) -> Response {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .expect("failed to build request");
        self.send(request).await
    }

    /// Posts a webhook signed with the service's secret.
    pub async fn post_signed_webhook(&self, pairs: &[(&str, &str)]) -> Response {
        let body = encode_form(&self.signer.signed(params(pairs)));
        self.post_form("/flow-webhook", body).await
    }

    /// Posts a webhook signed with some other secret.
    pub async fn post_webhook_signed_with(&self, secret: &str, pairs: &[(&str, &str)]) -> Response {
        let signer = FlowSigner::new(secret).expect("secret");
        let body = encode_form(&signer.signed(params(pairs)));
        self.post_form("/flow-webhook", body).await
    }

    pub async fn seed_product(&self, slug: &str, stock: i32) -> product::Model {
        product::ActiveModel {
            name: Set(format!("Lámpara {}", slug)),
            slug: Set(slug.to_string()),
            price: Set(9995),
            stock_quantity: Set(stock),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed product")
    }

    /// Seeds a pending order with the given lines.
    pub async fn seed_order(
        &self,
        id: i64,
        total: i64,
        token: Option<&str>,
        lines: &[(&product::Model, i32)],
    ) -> order::Model {
        let order = order::ActiveModel {
            id: Set(id),
            user_id: Set(None),
            subtotal_amount: Set(total),
            shipping_amount: Set(0),
            total_amount: Set(total),
            flow_order_id: Set(token.map(|_| 8765)),
            flow_token: Set(token.map(str::to_string)),
            shipping_name: Set("Ana Pérez".to_string()),
            shipping_email: Set("ana@example.cl".to_string()),
            shipping_phone: Set("+56911111111".to_string()),
            shipping_address: Set("Av. Siempre Viva 742".to_string()),
            shipping_city: Set("Santiago".to_string()),
            shipping_region: Set("Región Metropolitana".to_string()),
            shipping_comuna: Set("Providencia".to_string()),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed order");

        for (product, quantity) in lines {
            order_item::ActiveModel {
                order_id: Set(order.id),
                product_id: Set(product.id),
                product_name: Set(product.name.clone()),
                product_slug: Set(product.slug.clone()),
                product_image_url: Set(None),
                quantity: Set(*quantity),
                unit_price: Set(product.price),
                subtotal: Set(product.price * i64::from(*quantity)),
                ..Default::default()
            }
            .insert(self.db.as_ref())
            .await
            .expect("seed order item");
        }

        order
    }

    /// The standard checkout: order 42, total 19990, token `abc123`, one line of two lamps.
    pub async fn seed_standard_order(&self, stock: i32) -> (order::Model, product::Model) {
        let lamp = self.seed_product("luna", stock).await;
        let order = self.seed_order(42, 19990, Some("abc123"), &[(&lamp, 2)]).await;
        (order, lamp)
    }

    pub async fn order(&self, id: i64) -> order::Model {
        order::Entity::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .expect("load order")
            .expect("order exists")
    }

    pub async fn stock(&self, product_id: i64) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(self.db.as_ref())
            .await
            .expect("load product")
            .expect("product exists")
            .stock_quantity
    }

    pub async fn audit_rows(&self, order_id: i64) -> Vec<payment_audit_log::Model> {
        payment_audit_log::Entity::find()
            .filter(payment_audit_log::Column::OrderId.eq(order_id))
            .order_by_asc(payment_audit_log::Column::Id)
            .all(self.db.as_ref())
            .await
            .expect("load audit rows")
    }
}

pub fn params(pairs: &[(&str, &str)]) -> FlowParams {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn encode_form(params: &FlowParams) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish()
}

pub async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

pub async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}
