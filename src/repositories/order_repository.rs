use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};
use std::sync::Arc;
use tracing::error;

use crate::entities::order::{Column, Entity as Order, Model as OrderModel};
use crate::entities::order_item::{self, Entity as OrderItem, Model as OrderItemModel};
use crate::entities::OrderStatus;
use crate::errors::ServiceError;
use crate::repositories::Repository;

use super::{BaseRepository, GatewaySession, OrderStore, StatusTransition};

/// Repository for order operations
#[derive(Debug, Clone)]
pub struct OrderRepository {
    base: BaseRepository,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

#[async_trait]
impl OrderStore for OrderRepository {
    async fn get_by_id(&self, id: i64) -> Result<Option<OrderModel>, ServiceError> {
        Order::find_by_id(id)
            .one(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    async fn list_items(&self, order_id: i64) -> Result<Vec<OrderItemModel>, ServiceError> {
        OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::Id)
            .all(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)
    }

    async fn attach_gateway_session(
        &self,
        order_id: i64,
        session: &GatewaySession,
    ) -> Result<bool, ServiceError> {
        let res = Order::update_many()
            .col_expr(Column::FlowToken, Expr::value(session.token.clone()))
            .col_expr(Column::FlowOrderId, Expr::value(session.flow_order_id))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(order_id))
            .filter(Column::FlowToken.is_null())
            .filter(Column::Status.eq(OrderStatus::Pending.as_ref()))
            .exec(self.base.get_db())
            .await
            .map_err(|e| {
                error!(order_id, "Failed to attach payment session: {}", e);
                ServiceError::DatabaseError(e)
            })?;
        Ok(res.rows_affected > 0)
    }

    async fn transition_status(
        &self,
        order_id: i64,
        transition: &StatusTransition,
    ) -> Result<bool, ServiceError> {
        let mut update = Order::update_many()
            .col_expr(Column::Status, Expr::value(transition.to.as_ref()))
            .col_expr(
                Column::PaymentMethod,
                Expr::value(transition.payment_method.clone()),
            )
            .col_expr(Column::UpdatedAt, Expr::value(transition.at));
        if transition.to == OrderStatus::Paid {
            update = update.col_expr(Column::PaymentDate, Expr::value(transition.at));
        }

        let res = update
            .filter(Column::Id.eq(order_id))
            .filter(Column::Status.eq(OrderStatus::Pending.as_ref()))
            .exec(self.base.get_db())
            .await
            .map_err(|e| {
                error!(order_id, to = %transition.to, "Failed to update order status: {}", e);
                ServiceError::DatabaseError(e)
            })?;
        Ok(res.rows_affected > 0)
    }
}

impl Repository for OrderRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}
