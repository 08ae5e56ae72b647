use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use strum::{AsRefStr, Display};
use utoipa::ToSchema;

use super::signature::FlowParams;
use crate::entities::OrderStatus;

/// Payment status codes reported by Flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowStatus {
    Pending,
    Paid,
    Rejected,
    Cancelled,
    Unknown(i64),
}

impl FlowStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => FlowStatus::Pending,
            2 => FlowStatus::Paid,
            3 => FlowStatus::Rejected,
            4 => FlowStatus::Cancelled,
            other => FlowStatus::Unknown(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            FlowStatus::Pending => 1,
            FlowStatus::Paid => 2,
            FlowStatus::Rejected => 3,
            FlowStatus::Cancelled => 4,
            FlowStatus::Unknown(code) => code,
        }
    }

    /// Order status this gateway status settles into. Anything Flow does not
    /// report as final leaves the order pending.
    pub fn order_status(self) -> OrderStatus {
        match self {
            FlowStatus::Paid => OrderStatus::Paid,
            FlowStatus::Rejected => OrderStatus::Failed,
            FlowStatus::Cancelled => OrderStatus::Cancelled,
            FlowStatus::Pending | FlowStatus::Unknown(_) => OrderStatus::Pending,
        }
    }
}

pub const UNKNOWN_PAYMENT_METHOD: &str = "Desconocido";

pub fn payment_method_label(code: Option<i64>) -> &'static str {
    match code {
        Some(1) => "Webpay",
        Some(2) => "Servipag",
        Some(3) => "Multicaja",
        Some(4) => "Khipu",
        Some(9) => "Todos los Medios",
        _ => UNKNOWN_PAYMENT_METHOD,
    }
}

/// How a confirmation reached the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConfirmationChannel {
    /// Asynchronous, signed POST from Flow
    Webhook,
    /// Our own signed `payment/getStatus` call, triggered by the return page
    StatusLookup,
}

/// Parameters for `POST /payment/create`, minus credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePaymentRequest {
    pub commerce_order: i64,
    pub subject: String,
    pub currency: String,
    /// Whole currency units; CLP has no decimals
    pub amount: i64,
    pub email: String,
    pub url_confirmation: String,
    pub url_return: String,
}

impl CreatePaymentRequest {
    /// Unsigned form parameters, including the API key.
    pub fn to_params(&self, api_key: &str) -> FlowParams {
        [
            ("apiKey", api_key.to_string()),
            ("commerceOrder", self.commerce_order.to_string()),
            ("subject", self.subject.clone()),
            ("currency", self.currency.clone()),
            ("amount", self.amount.to_string()),
            ("email", self.email.clone()),
            ("urlConfirmation", self.url_confirmation.clone()),
            ("urlReturn", self.url_return.clone()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

/// Flow's answer to a successful `payment/create`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPayment {
    pub url: String,
    pub token: String,
    #[serde(deserialize_with = "required_lenient_i64")]
    pub flow_order: i64,
}

impl CreatedPayment {
    /// Where the buyer is sent to pay.
    pub fn redirect_url(&self) -> String {
        format!("{}?token={}", self.url, self.token)
    }
}

/// Flow's answer to `payment/getStatus`.
///
/// Flow is loose about numeric fields (`commerceOrder` arrives as text,
/// amounts sometimes as floats), so they are read leniently here and checked
/// when the confirmation is built.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusResponse {
    #[serde(default, deserialize_with = "lenient_i64")]
    pub flow_order: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub commerce_order: Option<i64>,
    #[serde(default)]
    pub request_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub status: Option<i64>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub payer: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub payment_method: Option<i64>,
    #[serde(default)]
    pub payment_data: Option<PaymentData>,
}

impl PaymentStatusResponse {
    /// Method code from `paymentMethod`, falling back to `paymentData.media`.
    pub fn method_code(&self) -> Option<i64> {
        self.payment_method
            .or_else(|| self.payment_data.as_ref().and_then(|d| d.media))
    }
}

/// Details Flow attaches once a payment has been captured.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentData {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub media: Option<i64>,
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub amount: Option<Decimal>,
}

fn parse_lenient(value: Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(parse_lenient))
}

fn required_lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    parse_lenient(raw.clone())
        .ok_or_else(|| serde::de::Error::custom(format!("expected an integer, got {raw}")))
}
