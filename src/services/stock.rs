//! Inventory side effect of a settled payment.
//!
//! Stock is checked for the whole order first. If any product is short,
//! nothing is reduced and the shortfall is reported for manual follow-up;
//! otherwise each line is decremented atomically and failures are collected
//! without rolling back the lines that succeeded.

use metrics::counter;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, instrument, warn};

use crate::entities::OrderItemModel;
use crate::repositories::{PrivilegedAccess, StockReduction};

/// What the stock step did for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockReport {
    /// Lines a decrement was attempted for
    pub attempted: u32,
    /// Lines successfully decremented
    pub processed: u32,
    pub success: bool,
    pub errors: Vec<String>,
}

impl StockReport {
    /// No stock step was due.
    pub fn skipped() -> Self {
        Self {
            attempted: 0,
            processed: 0,
            success: true,
            errors: Vec::new(),
        }
    }

    fn failed(errors: Vec<String>) -> Self {
        Self {
            attempted: 0,
            processed: 0,
            success: false,
            errors,
        }
    }
}

struct Requirement {
    name: String,
    quantity: i64,
}

fn requirements(items: &[OrderItemModel]) -> BTreeMap<i64, Requirement> {
    let mut required: BTreeMap<i64, Requirement> = BTreeMap::new();
    for item in items {
        required
            .entry(item.product_id)
            .or_insert_with(|| Requirement {
                name: item.product_name.clone(),
                quantity: 0,
            })
            .quantity += i64::from(item.quantity);
    }
    required
}

/// Reduces stock for every line of `order_id`. Never fails; problems end up
/// in the returned report.
#[instrument(skip(access))]
pub async fn reduce_for_order(access: &PrivilegedAccess, order_id: i64) -> StockReport {
    let items = match access.orders.list_items(order_id).await {
        Ok(items) => items,
        Err(e) => {
            warn!(order_id, error = %e, "Could not load order items for stock reduction");
            return StockReport::failed(vec![format!(
                "Could not load items for order {}: {}",
                order_id, e
            )]);
        }
    };
    if items.is_empty() {
        return StockReport::skipped();
    }

    let mut shortfalls = Vec::new();
    for (product_id, need) in requirements(&items) {
        match access.inventory.get_stock(product_id).await {
            Ok(Some(stock)) if i64::from(stock.stock_quantity) >= need.quantity => {}
            Ok(Some(stock)) => shortfalls.push(format!(
                "{}: required {}, available {}",
                stock.name, need.quantity, stock.stock_quantity
            )),
            Ok(None) => shortfalls.push(format!("{}: product {} not found", need.name, product_id)),
            Err(e) => shortfalls.push(format!("{}: stock lookup failed: {}", need.name, e)),
        }
    }

    if !shortfalls.is_empty() {
        warn!(
            order_id,
            shortfalls = ?shortfalls,
            "Insufficient stock for paid order; manual follow-up required"
        );
        counter!("forja_settlement.stock_shortfalls", 1);
        let mut errors = vec![format!("Insufficient stock for order {}", order_id)];
        errors.extend(shortfalls);
        return StockReport::failed(errors);
    }

    let mut report = StockReport::skipped();
    for item in &items {
        report.attempted += 1;
        match access
            .inventory
            .reduce_stock(item.product_id, item.quantity)
            .await
        {
            Ok(StockReduction::Reduced) => report.processed += 1,
            Ok(StockReduction::Insufficient) => report.errors.push(format!(
                "Insufficient stock for {} (product {})",
                item.product_name, item.product_id
            )),
            Ok(StockReduction::ProductMissing) => report.errors.push(format!(
                "Product {} ({}) not found",
                item.product_id, item.product_name
            )),
            Err(e) => report.errors.push(format!(
                "Failed to reduce stock for {}: {}",
                item.product_name, e
            )),
        }
    }
    report.success = report.errors.is_empty();

    counter!("forja_settlement.stock_lines_reduced", u64::from(report.processed));
    if report.success {
        info!(order_id, lines = report.processed, "Stock reduced for order");
    } else {
        warn!(order_id, errors = ?report.errors, "Stock reduction partially failed");
    }
    report
}
