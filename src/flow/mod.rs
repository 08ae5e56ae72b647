//! Flow.cl gateway integration: request signing, wire types, the REST client
//! and validated payment confirmations.

pub mod client;
pub mod confirmation;
pub mod signature;
pub mod types;

pub use client::{Backoff, FlowApiError, FlowClient, PaymentGateway};
pub use confirmation::{ConfirmationError, GatewayConfirmation};
pub use signature::{canonical_string, FlowParams, FlowSigner, SignatureError, SIGNATURE_FIELD};
pub use types::{
    payment_method_label, ConfirmationChannel, CreatePaymentRequest, CreatedPayment, FlowStatus,
    PaymentData, PaymentStatusResponse,
};
