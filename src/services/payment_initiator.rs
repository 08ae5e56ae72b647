use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;

use crate::config::AppConfig;
use crate::entities::OrderStatus;
use crate::errors::ServiceError;
use crate::flow::{CreatePaymentRequest, PaymentGateway};
use crate::repositories::{GatewaySession, PrivilegedAccess};

/// Store-level values sent with every payment request.
#[derive(Debug, Clone)]
pub struct InitiatorSettings {
    pub store_name: String,
    pub currency: String,
    pub confirmation_url: Option<String>,
    pub return_url: Option<String>,
}

impl From<&AppConfig> for InitiatorSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            store_name: config.store_name.clone(),
            currency: config.flow_currency.clone(),
            confirmation_url: config.flow_webhook_url.clone(),
            return_url: config.flow_return_url.clone(),
        }
    }
}

/// Where to send the buyer, and the identifiers now stored on the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub payment_url: String,
    pub flow_order_id: i64,
    pub token: String,
}

/// Opens a Flow payment for a pending order.
pub struct PaymentInitiator {
    access: PrivilegedAccess,
    gateway: Arc<dyn PaymentGateway>,
    settings: InitiatorSettings,
}

impl PaymentInitiator {
    pub fn new(
        access: PrivilegedAccess,
        gateway: Arc<dyn PaymentGateway>,
        settings: InitiatorSettings,
    ) -> Self {
        Self {
            access,
            gateway,
            settings,
        }
    }

    #[instrument(skip(self))]
    pub async fn initiate(&self, order_id: i64) -> Result<PaymentSession, ServiceError> {
        let order = self
            .access
            .orders
            .get_by_id(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        if order.order_status() != Some(OrderStatus::Pending) {
            return Err(ServiceError::InvalidStatus(format!(
                "Order is {} and cannot be paid",
                order.status
            )));
        }
        if order.flow_token.is_some() {
            return Err(ServiceError::InvalidStatus(
                "Payment already initiated for this order".to_string(),
            ));
        }
        if order.total_amount <= 0 {
            return Err(ServiceError::ValidationError(
                "Order total must be greater than zero".to_string(),
            ));
        }

        let (Some(url_confirmation), Some(url_return)) = (
            self.settings.confirmation_url.clone(),
            self.settings.return_url.clone(),
        ) else {
            return Err(ServiceError::Configuration(
                "Flow confirmation and return URLs must be configured".to_string(),
            ));
        };

        let request = CreatePaymentRequest {
            commerce_order: order.id,
            subject: format!("Orden #{} - {}", order.id, self.settings.store_name),
            currency: self.settings.currency.clone(),
            amount: order.total_amount,
            email: order.shipping_email.clone(),
            url_confirmation,
            url_return,
        };

        let created = self.gateway.create_payment(&request).await?;

        let session = GatewaySession {
            flow_order_id: created.flow_order,
            token: created.token.clone(),
        };
        let saved = self
            .access
            .orders
            .attach_gateway_session(order.id, &session)
            .await;
        match saved {
            Ok(true) => {}
            Ok(false) => {
                return Err(self.not_saved(
                    order.id,
                    &session,
                    "order changed while the payment was being created".to_string(),
                ))
            }
            Err(e) => return Err(self.not_saved(order.id, &session, e.to_string())),
        }

        counter!("forja_payments.initiated", 1);
        info!(
            order_id,
            flow_order = created.flow_order,
            "Payment session created"
        );

        Ok(PaymentSession {
            payment_url: created.redirect_url(),
            flow_order_id: created.flow_order,
            token: created.token,
        })
    }

    fn not_saved(&self, order_id: i64, session: &GatewaySession, reason: String) -> ServiceError {
        error!(
            order_id,
            flow_order = session.flow_order_id,
            token = %session.token,
            reason = %reason,
            "Flow payment created but not stored on the order"
        );
        counter!("forja_payments.not_saved", 1);
        ServiceError::PaymentNotSaved { order_id, reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::OrderModel;
    use crate::flow::client::MockPaymentGateway;
    use crate::flow::{CreatedPayment, FlowApiError};
    use crate::repositories::{MockAuditStore, MockInventoryStore, MockOrderStore};
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn order(status: &str, token: Option<&str>, total: i64) -> OrderModel {
        let now = Utc::now();
        OrderModel {
            id: 42,
            user_id: None,
            status: status.into(),
            subtotal_amount: total,
            shipping_amount: 0,
            total_amount: total,
            flow_order_id: None,
            flow_token: token.map(str::to_string),
            payment_method: None,
            payment_date: None,
            shipping_name: "Ana".into(),
            shipping_email: "ana@example.cl".into(),
            shipping_phone: "+56911111111".into(),
            shipping_address: "Av. Siempre Viva 742".into(),
            shipping_city: "Santiago".into(),
            shipping_region: "RM".into(),
            shipping_comuna: "Providencia".into(),
            shipping_notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn settings() -> InitiatorSettings {
        InitiatorSettings {
            store_name: "Forja del Destino".into(),
            currency: "CLP".into(),
            confirmation_url: Some("https://api.example.cl/flow-webhook".into()),
            return_url: Some("https://api.example.cl/payment-redirect".into()),
        }
    }

    fn initiator(
        orders: MockOrderStore,
        gateway: MockPaymentGateway,
        settings: InitiatorSettings,
    ) -> PaymentInitiator {
        PaymentInitiator::new(
            PrivilegedAccess::new(
                Arc::new(orders),
                Arc::new(MockInventoryStore::new()),
                Arc::new(MockAuditStore::new()),
            ),
            Arc::new(gateway),
            settings,
        )
    }

    fn created() -> CreatedPayment {
        CreatedPayment {
            url: "https://sandbox.flow.cl/app/web/pay.php".into(),
            token: "tok-1".into(),
            flow_order: 8765,
        }
    }

    #[tokio::test]
    async fn creates_and_stores_session() {
        let mut orders = MockOrderStore::new();
        orders
            .expect_get_by_id()
            .returning(|_| Ok(Some(order("pending", None, 19990))));
        orders
            .expect_attach_gateway_session()
            .withf(|id, s| *id == 42 && s.token == "tok-1" && s.flow_order_id == 8765)
            .times(1)
            .returning(|_, _| Ok(true));
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_payment()
            .withf(|r| {
                r.subject == "Orden #42 - Forja del Destino"
                    && r.amount == 19990
                    && r.email == "ana@example.cl"
            })
            .times(1)
            .returning(|_| Ok(created()));

        let session = initiator(orders, gateway, settings())
            .initiate(42)
            .await
            .unwrap();
        assert_eq!(
            session.payment_url,
            "https://sandbox.flow.cl/app/web/pay.php?token=tok-1"
        );
        assert_eq!(session.flow_order_id, 8765);
    }

    #[tokio::test]
    async fn rejects_orders_that_cannot_be_paid() {
        let cases = [
            (order("paid", None, 19990), "InvalidStatus"),
            (order("pending", Some("old"), 19990), "InvalidStatus"),
            (order("pending", None, 0), "ValidationError"),
        ];
        for (model, expected) in cases {
            let mut orders = MockOrderStore::new();
            orders
                .expect_get_by_id()
                .returning(move |_| Ok(Some(model.clone())));
            let mut gateway = MockPaymentGateway::new();
            gateway.expect_create_payment().never();

            let err = initiator(orders, gateway, settings())
                .initiate(42)
                .await
                .unwrap_err();
            let kind = match err {
                ServiceError::InvalidStatus(_) => "InvalidStatus",
                ServiceError::ValidationError(_) => "ValidationError",
                other => panic!("unexpected error {other:?}"),
            };
            assert_eq!(kind, expected);
        }
    }

    #[tokio::test]
    async fn missing_urls_are_a_configuration_error() {
        let mut orders = MockOrderStore::new();
        orders
            .expect_get_by_id()
            .returning(|_| Ok(Some(order("pending", None, 19990))));
        let mut gateway = MockPaymentGateway::new();
        gateway.expect_create_payment().never();

        let err = initiator(
            orders,
            gateway,
            InitiatorSettings {
                return_url: None,
                ..settings()
            },
        )
        .initiate(42)
        .await
        .unwrap_err();
        assert_matches!(err, ServiceError::Configuration(_));
    }

    #[tokio::test]
    async fn gateway_outage_is_transient() {
        let mut orders = MockOrderStore::new();
        orders
            .expect_get_by_id()
            .returning(|_| Ok(Some(order("pending", None, 19990))));
        orders.expect_attach_gateway_session().never();
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_payment()
            .returning(|_| Err(FlowApiError::Timeout));

        let err = initiator(orders, gateway, settings())
            .initiate(42)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::GatewayUnavailable(_));
    }

    #[tokio::test]
    async fn unsaved_session_is_surfaced() {
        let mut orders = MockOrderStore::new();
        orders
            .expect_get_by_id()
            .returning(|_| Ok(Some(order("pending", None, 19990))));
        orders
            .expect_attach_gateway_session()
            .returning(|_, _| Ok(false));
        let mut gateway = MockPaymentGateway::new();
        gateway
            .expect_create_payment()
            .returning(|_| Ok(created()));

        let err = initiator(orders, gateway, settings())
            .initiate(42)
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::PaymentNotSaved { order_id: 42, .. });
    }
}
