use rust_decimal::Decimal;
use std::str::FromStr;

use super::signature::{FlowParams, FlowSigner, SIGNATURE_FIELD};
use super::types::{payment_method_label, ConfirmationChannel, FlowStatus, PaymentStatusResponse};
use crate::errors::{SecurityViolation, ServiceError};

/// Rejection raised while turning raw gateway data into a [`GatewayConfirmation`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfirmationError {
    #[error(transparent)]
    Security(SecurityViolation),
    #[error("missing required field {0}")]
    MissingField(&'static str),
    #[error("field {field} is not a valid number: {value:?}")]
    Malformed { field: &'static str, value: String },
}

impl From<ConfirmationError> for ServiceError {
    fn from(err: ConfirmationError) -> Self {
        match err {
            ConfirmationError::Security(violation) => ServiceError::Security(violation),
            other => ServiceError::ValidationError(other.to_string()),
        }
    }
}

/// A payment confirmation whose shape has been checked once, at the boundary.
///
/// Webhook payloads are only constructible after their signature verifies;
/// status lookups come from our own authenticated gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfirmation {
    pub channel: ConfirmationChannel,
    pub token: String,
    pub commerce_order: i64,
    pub flow_order: Option<i64>,
    pub status: FlowStatus,
    pub amount: Option<Decimal>,
    pub payment_method: Option<i64>,
}

impl GatewayConfirmation {
    pub fn from_signed_params(
        signer: &FlowSigner,
        params: &FlowParams,
    ) -> Result<Self, ConfirmationError> {
        let signature = non_empty(params, SIGNATURE_FIELD).ok_or(ConfirmationError::Security(
            SecurityViolation::MissingSignature,
        ))?;
        if !signer.verify(params, signature) {
            return Err(ConfirmationError::Security(SecurityViolation::BadSignature));
        }

        let token = non_empty(params, "token").ok_or(ConfirmationError::MissingField("token"))?;
        let commerce_order = non_empty(params, "commerceOrder")
            .ok_or(ConfirmationError::MissingField("commerceOrder"))
            .and_then(|raw| parse_i64("commerceOrder", raw))?;

        let status = non_empty(params, "status")
            .map(|raw| parse_i64("status", raw))
            .transpose()?
            .map(FlowStatus::from_code)
            .unwrap_or(FlowStatus::Pending);

        let flow_order = non_empty(params, "flowOrder")
            .map(|raw| parse_i64("flowOrder", raw))
            .transpose()?;

        let amount = non_empty(params, "amount")
            .map(|raw| {
                Decimal::from_str(raw.trim()).map_err(|_| ConfirmationError::Malformed {
                    field: "amount",
                    value: raw.to_string(),
                })
            })
            .transpose()?;

        // Unrecognised method codes still settle, labelled as unknown
        let payment_method = non_empty(params, "paymentMethod").and_then(|raw| raw.trim().parse().ok());

        Ok(Self {
            channel: ConfirmationChannel::Webhook,
            token: token.to_string(),
            commerce_order,
            flow_order,
            status,
            amount,
            payment_method,
        })
    }

    pub fn from_status_lookup(
        token: &str,
        response: &PaymentStatusResponse,
    ) -> Result<Self, ConfirmationError> {
        let commerce_order = response
            .commerce_order
            .ok_or(ConfirmationError::MissingField("commerceOrder"))?;
        let status = response
            .status
            .map(FlowStatus::from_code)
            .ok_or(ConfirmationError::MissingField("status"))?;

        Ok(Self {
            channel: ConfirmationChannel::StatusLookup,
            token: token.to_string(),
            commerce_order,
            flow_order: response.flow_order,
            status,
            amount: response.amount,
            payment_method: response.method_code(),
        })
    }

    pub fn payment_method_label(&self) -> &'static str {
        payment_method_label(self.payment_method)
    }

    /// True when no amount was reported, or it is within `tolerance` of `total`.
    pub fn amount_matches(&self, total: i64, tolerance: i64) -> bool {
        match self.amount {
            None => true,
            Some(amount) => (amount - Decimal::from(total)).abs() <= Decimal::from(tolerance),
        }
    }

    /// Reported amount rounded to whole units, for the audit trail.
    pub fn amount_units(&self) -> i64 {
        self.amount
            .and_then(|a| rust_decimal::prelude::ToPrimitive::to_i64(&a.round()))
            .unwrap_or(0)
    }
}

fn non_empty<'a>(params: &'a FlowParams, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}

fn parse_i64(field: &'static str, raw: &str) -> Result<i64, ConfirmationError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfirmationError::Malformed {
            field,
            value: raw.to_string(),
        })
}
