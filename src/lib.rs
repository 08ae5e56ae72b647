//! Forja Payments
//!
//! Flow.cl payment initiation, webhook verification and order settlement
//! for the Forja del Destino storefront.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod flow;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod repositories;
pub mod services;
pub mod tracing;

use axum::Router;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::timeout::TimeoutLayer;

use crate::errors::ServiceError;
use crate::flow::{FlowSigner, PaymentGateway};
use crate::repositories::PrivilegedAccess;
use crate::services::{
    payment_initiator::{InitiatorSettings, PaymentInitiator},
    settlement::{SettlementEngine, SettlementPolicy},
    verification::PaymentVerifier,
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub initiator: Arc<PaymentInitiator>,
    pub verifier: Arc<PaymentVerifier>,
}

impl AppState {
    /// Wires the payment services over one service-role store.
    ///
    /// Fails when the Flow secret is unusable, so a misconfigured deployment
    /// never starts accepting webhooks.
    pub fn build(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Result<Self, ServiceError> {
        let signer = FlowSigner::new(&config.flow_secret_key)?;
        let access = PrivilegedAccess::sea_orm(db.clone());
        let settlement = SettlementEngine::new(access.clone(), SettlementPolicy::from(&config));
        let initiator =
            PaymentInitiator::new(access, gateway.clone(), InitiatorSettings::from(&config));
        let verifier = PaymentVerifier::new(signer, gateway, settlement);

        Ok(Self {
            db,
            config,
            initiator: Arc::new(initiator),
            verifier: Arc::new(verifier),
        })
    }
}

/// Full router with request IDs, HTTP tracing and the outer request timeout;
/// CORS is added by the binary.
pub fn app(state: AppState) -> Router {
    let request_timeout = state.config.request_timeout();
    Router::<AppState>::new()
        .merge(handlers::payment_routes())
        .merge(handlers::health_routes())
        .merge(openapi::openapi_routes())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}
