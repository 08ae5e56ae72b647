use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::flow::FlowApiError;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Failure body shared by every JSON endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "success": false,
    "error": "Order not found",
    "request_id": "req-abc123xyz"
}))]
pub struct ErrorResponse {
    /// Always false
    pub success: bool,
    /// Human-readable error description
    #[schema(example = "Order not found")]
    pub error: String,
    /// Unique request identifier for support and debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
}

/// Which authenticity check rejected a gateway confirmation.
///
/// Only ever logged; callers see [`SECURITY_REJECTION_MESSAGE`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecurityViolation {
    #[error("missing signature")]
    MissingSignature,
    #[error("invalid signature")]
    BadSignature,
    #[error("token does not match order {order_id}")]
    TokenMismatch { order_id: i64 },
    #[error("amount {received} differs from order total {expected}")]
    AmountMismatch { received: String, expected: i64 },
}

impl SecurityViolation {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingSignature => "missing_signature",
            Self::BadSignature => "bad_signature",
            Self::TokenMismatch { .. } => "token_mismatch",
            Self::AmountMismatch { .. } => "amount_mismatch",
        }
    }
}

pub const SECURITY_REJECTION_MESSAGE: &str = "Payment could not be verified";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Security violation: {0}")]
    Security(SecurityViolation),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Payment created for order {order_id} but could not be saved: {reason}")]
    PaymentNotSaved { order_id: i64, reason: String },

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<SecurityViolation> for ServiceError {
    fn from(violation: SecurityViolation) -> Self {
        ServiceError::Security(violation)
    }
}

impl From<crate::flow::SignatureError> for ServiceError {
    fn from(err: crate::flow::SignatureError) -> Self {
        ServiceError::Configuration(err.to_string())
    }
}

impl From<FlowApiError> for ServiceError {
    fn from(err: FlowApiError) -> Self {
        if err.is_transient() {
            ServiceError::GatewayUnavailable(err.to_string())
        } else {
            match err {
                FlowApiError::Signature(inner) => inner.into(),
                other => ServiceError::Gateway(other.to_string()),
            }
        }
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidStatus(_) | Self::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Security(_) => StatusCode::FORBIDDEN,
            Self::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::DatabaseError(_)
            | Self::Configuration(_)
            | Self::PaymentNotSaved { .. }
            | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::Configuration(_) | Self::InternalError(_) => "Internal server error".to_string(),
            Self::Security(_) => SECURITY_REJECTION_MESSAGE.to_string(),
            Self::GatewayUnavailable(_) => {
                "Payment gateway temporarily unavailable, please retry".to_string()
            }
            Self::Gateway(_) => "Payment gateway rejected the request".to_string(),
            Self::Timeout(_) => "Payment is still being processed, please retry".to_string(),
            Self::PaymentNotSaved { .. } => {
                "Payment was created but could not be saved; please contact support".to_string()
            }
            Self::NotFound(msg)
            | Self::ValidationError(msg)
            | Self::InvalidStatus(msg)
            | Self::BadRequest(msg) => msg.clone(),
        }
    }

    /// Whether a caller may retry the same request unchanged
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::GatewayUnavailable(_) | Self::Timeout(_))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            success: false,
            error: self.response_message(),
            request_id: current_request_id(),
        };

        (status, Json(err)).into_response()
    }
}
