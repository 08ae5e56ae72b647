use std::sync::Arc;
use tracing::{info, instrument};

use crate::errors::ServiceError;
use crate::flow::{FlowParams, FlowSigner, GatewayConfirmation, PaymentGateway};
use crate::services::settlement::{SettlementEngine, SettlementOutcome};

/// Entry points for both confirmation channels.
pub struct PaymentVerifier {
    signer: FlowSigner,
    gateway: Arc<dyn PaymentGateway>,
    settlement: SettlementEngine,
}

impl PaymentVerifier {
    pub fn new(
        signer: FlowSigner,
        gateway: Arc<dyn PaymentGateway>,
        settlement: SettlementEngine,
    ) -> Self {
        Self {
            signer,
            gateway,
            settlement,
        }
    }

    /// Asynchronous notification posted by Flow.
    #[instrument(skip(self, params), fields(commerce_order = params.get("commerceOrder").map(String::as_str)))]
    pub async fn process_webhook(
        &self,
        params: &FlowParams,
    ) -> Result<SettlementOutcome, ServiceError> {
        let confirmation = GatewayConfirmation::from_signed_params(&self.signer, params)?;
        self.settlement.settle_with_timeout(confirmation).await
    }

    /// Browser return path: ask Flow for the payment status and settle on it.
    #[instrument(skip(self, token))]
    pub async fn verify_token(&self, token: &str) -> Result<SettlementOutcome, ServiceError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ServiceError::BadRequest("token is required".to_string()));
        }

        let status = self.gateway.get_status(token).await?;
        let confirmation = GatewayConfirmation::from_status_lookup(token, &status)?;
        info!(
            order_id = confirmation.commerce_order,
            flow_status = confirmation.status.code(),
            "Flow status retrieved"
        );
        self.settlement.settle_with_timeout(confirmation).await
    }
}
