use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One row per processed gateway confirmation, applied or not.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payment_audit_log")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub order_id: i64,
    pub flow_order_id: String,
    pub status: String,
    pub amount: i64,
    pub payment_method: String,
    pub channel: String,
    pub transition: String,
    pub stock_processed: i32,
    pub stock_success: bool,
    /// JSON array of per-item failure messages
    #[sea_orm(column_type = "Text")]
    pub stock_errors: String,
    pub processed_at: DateTime<Utc>,
}

impl Model {
    pub fn stock_error_list(&self) -> Vec<String> {
        serde_json::from_str(&self.stock_errors).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
