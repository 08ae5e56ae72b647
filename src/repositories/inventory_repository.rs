use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use std::sync::Arc;
use tracing::{error, instrument};

use crate::entities::product::{Column, Entity as Product};
use crate::errors::ServiceError;
use crate::repositories::Repository;

use super::{BaseRepository, InventoryStore, ProductStock, StockReduction};

/// Repository for product stock levels
#[derive(Debug, Clone)]
pub struct InventoryRepository {
    base: BaseRepository,
}

impl InventoryRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }
}

#[async_trait]
impl InventoryStore for InventoryRepository {
    async fn get_stock(&self, product_id: i64) -> Result<Option<ProductStock>, ServiceError> {
        let product = Product::find_by_id(product_id)
            .one(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)?;
        Ok(product.map(|p| ProductStock {
            product_id: p.id,
            name: p.name,
            stock_quantity: p.stock_quantity,
        }))
    }

    #[instrument(skip(self))]
    async fn reduce_stock(
        &self,
        product_id: i64,
        quantity: i32,
    ) -> Result<StockReduction, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Invalid quantity {} for product {}",
                quantity, product_id
            )));
        }

        let res = Product::update_many()
            .col_expr(
                Column::StockQuantity,
                Expr::col(Column::StockQuantity).sub(quantity),
            )
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(product_id))
            .filter(Column::StockQuantity.gte(quantity))
            .exec(self.base.get_db())
            .await
            .map_err(|e| {
                error!(product_id, quantity, "Stock decrement failed: {}", e);
                ServiceError::DatabaseError(e)
            })?;

        if res.rows_affected > 0 {
            return Ok(StockReduction::Reduced);
        }

        // Nothing matched: tell a missing product apart from a short one
        let exists = Product::find_by_id(product_id)
            .one(self.base.get_db())
            .await
            .map_err(ServiceError::DatabaseError)?
            .is_some();
        Ok(if exists {
            StockReduction::Insufficient
        } else {
            StockReduction::ProductMissing
        })
    }
}

impl Repository for InventoryRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}
