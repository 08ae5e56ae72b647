//! Settlement of gateway confirmations into order state.
//!
//! A [`GatewayConfirmation`] has already passed the signature and shape
//! checks. The engine then binds it to the stored order (token, amount),
//! maps the gateway status and moves the order out of `pending` with a
//! compare-and-swap, so concurrent or repeated deliveries settle at most once.
//! Stock is only reduced by the delivery that actually applied `paid`, and
//! every processed confirmation leaves an audit row.

use chrono::Utc;
use metrics::counter;
use serde::Serialize;
use std::time::Duration;
use strum::{AsRefStr, Display};
use tracing::{error, info, instrument, warn, Instrument, Span};
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::entities::{OrderModel, OrderStatus};
use crate::errors::{SecurityViolation, ServiceError};
use crate::flow::GatewayConfirmation;
use crate::repositories::{AuditEntry, PrivilegedAccess, StatusTransition};
use crate::services::{audit, stock, stock::StockReport};

#[derive(Debug, Clone)]
pub struct SettlementPolicy {
    /// Largest accepted difference between the reported amount and the order total
    pub amount_tolerance: i64,
    /// Upper bound on one settlement, see [`SettlementEngine::settle_with_timeout`]
    pub timeout: Duration,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            amount_tolerance: 1,
            timeout: Duration::from_secs(30),
        }
    }
}

impl From<&AppConfig> for SettlementPolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            amount_tolerance: config.amount_tolerance,
            timeout: config.settlement_timeout(),
        }
    }
}

/// What happened to the order's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, AsRefStr, Display, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Transition {
    /// This confirmation moved the order out of `pending`
    Applied,
    /// The order had already left `pending`; nothing was written
    AlreadySettled,
    /// The gateway has no final answer yet
    StillPending,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementOutcome {
    pub order_id: i64,
    /// Order status after processing
    pub status: OrderStatus,
    /// Raw gateway status code
    pub flow_status: i64,
    pub payment_method: String,
    pub transition: Transition,
    pub stock: StockReport,
    /// False when the audit row could not be written and only the log carries it
    pub audited: bool,
}

#[derive(Debug, Clone)]
pub struct SettlementEngine {
    access: PrivilegedAccess,
    policy: SettlementPolicy,
}

impl SettlementEngine {
    pub fn new(access: PrivilegedAccess, policy: SettlementPolicy) -> Self {
        Self { access, policy }
    }

    pub fn policy(&self) -> &SettlementPolicy {
        &self.policy
    }

    /// Runs [`Self::settle`] on its own task and waits at most the policy
    /// timeout. On timeout the task keeps running to completion; only the
    /// caller stops waiting.
    pub async fn settle_with_timeout(
        &self,
        confirmation: GatewayConfirmation,
    ) -> Result<SettlementOutcome, ServiceError> {
        let engine = self.clone();
        let order_id = confirmation.commerce_order;
        let request_id = crate::tracing::current_request_id().unwrap_or_default();
        let task = tokio::spawn(
            crate::tracing::scope_request_id(request_id, async move {
                engine.settle(confirmation).await
            })
            .instrument(Span::current()),
        );

        match tokio::time::timeout(self.policy.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                error!(order_id, error = %join_err, "Settlement task failed");
                Err(ServiceError::InternalError(format!(
                    "settlement of order {} aborted: {}",
                    order_id, join_err
                )))
            }
            Err(_) => {
                warn!(
                    order_id,
                    timeout = ?self.policy.timeout,
                    "Settlement still running after timeout"
                );
                counter!("forja_settlement.timeouts", 1);
                Err(ServiceError::Timeout(format!(
                    "settlement of order {} exceeded {:?}",
                    order_id, self.policy.timeout
                )))
            }
        }
    }

    #[instrument(
        skip(self, confirmation),
        fields(
            order_id = confirmation.commerce_order,
            channel = %confirmation.channel,
            flow_status = confirmation.status.code()
        )
    )]
    pub async fn settle(
        &self,
        confirmation: GatewayConfirmation,
    ) -> Result<SettlementOutcome, ServiceError> {
        let order_id = confirmation.commerce_order;
        let order = self
            .access
            .orders
            .get_by_id(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        if let Err(violation) = self.check_binding(&order, &confirmation) {
            warn!(order_id, violation = %violation, "Rejected payment confirmation");
            counter!("forja_settlement.rejections", 1, "reason" => violation.kind());
            return Err(violation.into());
        }

        let current = order.order_status().ok_or_else(|| {
            ServiceError::InternalError(format!(
                "order {} has unrecognised status {:?}",
                order_id, order.status
            ))
        })?;
        let target = confirmation.status.order_status();
        let payment_method = confirmation.payment_method_label().to_string();

        let (transition, status) = if current.is_terminal() {
            (Transition::AlreadySettled, current)
        } else if target == OrderStatus::Pending {
            (Transition::StillPending, OrderStatus::Pending)
        } else {
            let write = StatusTransition {
                to: target,
                payment_method: payment_method.clone(),
                at: Utc::now(),
            };
            if self.access.orders.transition_status(order_id, &write).await? {
                (Transition::Applied, target)
            } else {
                // Another delivery won the race
                let status = self
                    .access
                    .orders
                    .get_by_id(order_id)
                    .await?
                    .and_then(|o| o.order_status())
                    .unwrap_or(current);
                (Transition::AlreadySettled, status)
            }
        };

        let stock = if transition == Transition::Applied && status == OrderStatus::Paid {
            stock::reduce_for_order(&self.access, order_id).await
        } else {
            StockReport::skipped()
        };

        let audited = audit::record_or_warn(
            &self.access,
            AuditEntry {
                order_id,
                flow_order_id: confirmation.flow_order,
                status,
                amount: confirmation.amount_units(),
                payment_method: payment_method.clone(),
                channel: confirmation.channel,
                transition: transition.to_string(),
                stock_processed: i32::try_from(stock.processed).unwrap_or(i32::MAX),
                stock_success: stock.success,
                stock_errors: stock.errors.clone(),
                processed_at: Utc::now(),
            },
        )
        .await;

        counter!("forja_settlement.outcomes", 1, "transition" => transition.to_string());
        info!(order_id, %status, %transition, "Payment confirmation processed");

        Ok(SettlementOutcome {
            order_id,
            status,
            flow_status: confirmation.status.code(),
            payment_method,
            transition,
            stock,
            audited,
        })
    }

    fn check_binding(
        &self,
        order: &OrderModel,
        confirmation: &GatewayConfirmation,
    ) -> Result<(), SecurityViolation> {
        if order.flow_token.as_deref() != Some(confirmation.token.as_str()) {
            return Err(SecurityViolation::TokenMismatch { order_id: order.id });
        }
        if !confirmation.amount_matches(order.total_amount, self.policy.amount_tolerance) {
            return Err(SecurityViolation::AmountMismatch {
                received: confirmation
                    .amount
                    .map(|a| a.to_string())
                    .unwrap_or_default(),
                expected: order.total_amount,
            });
        }
        Ok(())
    }
}
