use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;

use crate::entities::{OrderItemModel, OrderModel, OrderStatus};
use crate::errors::ServiceError;
use crate::flow::ConfirmationChannel;

pub mod audit_repository;
pub mod inventory_repository;
pub mod order_repository;

pub use audit_repository::AuditRepository;
pub use inventory_repository::InventoryRepository;
pub use order_repository::OrderRepository;

/// Repository trait for common database operations
pub trait Repository {
    fn get_db(&self) -> &DatabaseConnection;
}

#[derive(Debug, Clone)]
pub struct BaseRepository {
    db: Arc<DatabaseConnection>,
}

impl BaseRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

impl Repository for BaseRepository {
    fn get_db(&self) -> &DatabaseConnection {
        &self.db
    }
}

/// Values written when an order leaves `pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    pub to: OrderStatus,
    pub payment_method: String,
    pub at: DateTime<Utc>,
}

/// Gateway identifiers attached to an order by the initiator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySession {
    pub flow_order_id: i64,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductStock {
    pub product_id: i64,
    pub name: String,
    pub stock_quantity: i32,
}

/// Result of one conditional stock decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockReduction {
    Reduced,
    Insufficient,
    ProductMissing,
}

/// A processed confirmation, as stored in `payment_audit_log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub order_id: i64,
    pub flow_order_id: Option<i64>,
    pub status: OrderStatus,
    pub amount: i64,
    pub payment_method: String,
    pub channel: ConfirmationChannel,
    pub transition: String,
    pub stock_processed: i32,
    pub stock_success: bool,
    pub stock_errors: Vec<String>,
    pub processed_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get_by_id(&self, id: i64) -> Result<Option<OrderModel>, ServiceError>;

    async fn list_items(&self, order_id: i64) -> Result<Vec<OrderItemModel>, ServiceError>;

    /// Stores the gateway session on a pending order without one.
    /// Returns false when the order no longer qualifies.
    async fn attach_gateway_session(
        &self,
        order_id: i64,
        session: &GatewaySession,
    ) -> Result<bool, ServiceError>;

    /// Compare-and-swap out of `pending`. Returns whether this call applied it.
    async fn transition_status(
        &self,
        order_id: i64,
        transition: &StatusTransition,
    ) -> Result<bool, ServiceError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InventoryStore: Send + Sync {
    async fn get_stock(&self, product_id: i64) -> Result<Option<ProductStock>, ServiceError>;

    /// Atomically takes `quantity` units, never going below zero.
    async fn reduce_stock(
        &self,
        product_id: i64,
        quantity: i32,
    ) -> Result<StockReduction, ServiceError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), ServiceError>;
}

/// Service-role access to the order, inventory and audit tables.
///
/// Built once at startup and handed to the services that need to bypass
/// customer-scoped access.
#[derive(Clone)]
pub struct PrivilegedAccess {
    pub orders: Arc<dyn OrderStore>,
    pub inventory: Arc<dyn InventoryStore>,
    pub audit: Arc<dyn AuditStore>,
}

impl PrivilegedAccess {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        inventory: Arc<dyn InventoryStore>,
        audit: Arc<dyn AuditStore>,
    ) -> Self {
        Self {
            orders,
            inventory,
            audit,
        }
    }

    pub fn sea_orm(db: Arc<DatabaseConnection>) -> Self {
        Self::new(
            Arc::new(OrderRepository::new(db.clone())),
            Arc::new(InventoryRepository::new(db.clone())),
            Arc::new(AuditRepository::new(db)),
        )
    }
}

impl std::fmt::Debug for PrivilegedAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivilegedAccess").finish_non_exhaustive()
    }
}
