use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;

use crate::entities::payment_audit_log::{
    ActiveModel as AuditActiveModel, Column, Entity as PaymentAuditLog, Model as AuditModel,
};
use crate::errors::ServiceError;
use crate::repositories::Repository;

use super::{AuditEntry, AuditStore, BaseRepository};

const UNKNOWN_FLOW_ORDER: &str = "unknown";

/// Repository for the payment audit trail
#[derive(Debug, Clone)]
pub struct AuditRepository {
    base: BaseRepository,
}

impl AuditRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    /// Audit rows for an order, oldest first
    pub async fn find_by_order(&self, order_id: i64) -> Result<Vec<AuditModel>, ServiceError> {
        PaymentAuditLog::find()
            .filter(Column::OrderId.eq(order_id))
            .order_by_asc(Column::Id)
            .all(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)
    }
}

impl From<AuditEntry> for AuditActiveModel {
    fn from(entry: AuditEntry) -> Self {
        AuditActiveModel {
            order_id: Set(entry.order_id),
            flow_order_id: Set(entry
                .flow_order_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| UNKNOWN_FLOW_ORDER.to_string())),
            status: Set(entry.status.to_string()),
            amount: Set(entry.amount),
            payment_method: Set(entry.payment_method),
            channel: Set(entry.channel.to_string()),
            transition: Set(entry.transition),
            stock_processed: Set(entry.stock_processed),
            stock_success: Set(entry.stock_success),
            stock_errors: Set(serde_json::to_string(&entry.stock_errors)
                .unwrap_or_else(|_| "[]".to_string())),
            processed_at: Set(entry.processed_at),
            ..Default::default()
        }
    }
}

#[async_trait]
impl AuditStore for AuditRepository {
    async fn record(&self, entry: AuditEntry) -> Result<(), ServiceError> {
        AuditActiveModel::from(entry)
            .insert(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(())
    }
}

impl Repository for AuditRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}
