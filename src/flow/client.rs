use async_trait::async_trait;
use metrics::counter;
use rand::Rng;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use super::signature::{FlowParams, FlowSigner, SignatureError};
use super::types::{CreatePaymentRequest, CreatedPayment, PaymentStatusResponse};
use crate::config::AppConfig;

const CREATE_PATH: &str = "payment/create";
const STATUS_PATH: &str = "payment/getStatus";
const DEFAULT_DEADLINE: Duration = Duration::from_secs(20);

#[derive(Debug, thiserror::Error)]
pub enum FlowApiError {
    #[error("request to Flow timed out")]
    Timeout,
    #[error("could not reach Flow: {0}")]
    Connect(String),
    #[error("transport error talking to Flow: {0}")]
    Transport(String),
    #[error("Flow answered {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected Flow response: {0}")]
    Decode(String),
    #[error(transparent)]
    Signature(#[from] SignatureError),
}

impl FlowApiError {
    /// Worth retrying later: the gateway was unreachable or overloaded.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Connect(_) | Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Decode(_) | Self::Signature(_) => false,
        }
    }

    /// The request provably never reached Flow.
    fn never_sent(&self) -> bool {
        matches!(self, Self::Connect(_))
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Outbound calls to the payment gateway.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<CreatedPayment, FlowApiError>;

    async fn get_status(&self, token: &str) -> Result<PaymentStatusResponse, FlowApiError>;
}

/// Retry schedule for gateway calls
#[derive(Debug, Clone)]
pub struct Backoff {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(3),
            factor: 2.0,
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based), with up to 50% random jitter.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.factor.powi(attempt.saturating_sub(1) as i32);
        let base = (self.initial_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64());
        let jitter = rand::thread_rng().gen_range(0.0..=0.5);
        Duration::from_secs_f64(base * (1.0 + jitter))
    }
}

/// HTTP client for the Flow REST API.
#[derive(Debug, Clone)]
pub struct FlowClient {
    http: Client,
    base_url: String,
    api_key: String,
    signer: FlowSigner,
    backoff: Backoff,
    deadline: Duration,
}

impl FlowClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        signer: FlowSigner,
        timeout: Duration,
    ) -> Result<Self, FlowApiError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FlowApiError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            signer,
            backoff: Backoff::default(),
            deadline: DEFAULT_DEADLINE,
        })
    }

    pub fn from_app_config(config: &AppConfig) -> Result<Self, FlowApiError> {
        let signer = FlowSigner::new(&config.flow_secret_key)?;
        let client = Self::new(
            &config.flow_api_url,
            &config.flow_api_key,
            signer,
            config.flow_timeout(),
        )?;
        Ok(client
            .with_backoff(Backoff {
                max_attempts: config.flow_max_retries,
                ..Backoff::default()
            })
            .with_deadline(config.flow_deadline()))
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Bounds a whole call, every attempt and backoff sleep included.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn retrying<T, F, Fut>(
        &self,
        operation: &'static str,
        retryable: fn(&FlowApiError) -> bool,
        mut call: F,
    ) -> Result<T, FlowApiError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, FlowApiError>>,
    {
        let max_attempts = self.backoff.max_attempts.max(1);
        let attempts = async {
            let mut attempt = 0;
            loop {
                attempt += 1;
                counter!("forja_flow.requests", 1, "operation" => operation);
                match call().await {
                    Ok(value) => return Ok(value),
                    Err(err) if attempt < max_attempts && retryable(&err) => {
                        let delay = self.backoff.delay_for(attempt);
                        warn!(
                            operation,
                            attempt,
                            error = %err,
                            "Flow call failed, retrying in {:?}",
                            delay
                        );
                        counter!("forja_flow.retries", 1, "operation" => operation);
                        tokio::time::sleep(delay).await;
                    }
                    Err(err) => {
                        error!(operation, attempt, error = %err, "Flow call failed");
                        counter!("forja_flow.failures", 1, "operation" => operation);
                        return Err(err);
                    }
                }
            }
        };

        match tokio::time::timeout(self.deadline, attempts).await {
            Ok(result) => result,
            Err(_) => {
                error!(operation, deadline = ?self.deadline, "Flow call exceeded its deadline");
                counter!("forja_flow.failures", 1, "operation" => operation);
                Err(FlowApiError::Timeout)
            }
        }
    }

    async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, FlowApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FlowApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response.json::<T>().await.map_err(FlowApiError::from_reqwest)
    }
}

#[async_trait]
impl PaymentGateway for FlowClient {
    #[instrument(skip(self, request), fields(commerce_order = request.commerce_order))]
    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<CreatedPayment, FlowApiError> {
        let form = self.signer.signed(request.to_params(&self.api_key));
        let url = self.endpoint(CREATE_PATH);
        let (http, url, form) = (&self.http, url.as_str(), &form);

        // Creating twice would open two payments; only retry when nothing was sent
        self.retrying("create", FlowApiError::never_sent, move || async move {
            let response = http
                .post(url)
                .form(form)
                .send()
                .await
                .map_err(FlowApiError::from_reqwest)?;
            Self::read_json::<CreatedPayment>(response).await
        })
        .await
        .map(|created| {
            debug!(flow_order = created.flow_order, "Flow payment created");
            created
        })
    }

    #[instrument(skip(self, token))]
    async fn get_status(&self, token: &str) -> Result<PaymentStatusResponse, FlowApiError> {
        let mut query = FlowParams::new();
        query.insert("apiKey".to_string(), self.api_key.clone());
        query.insert("token".to_string(), token.to_string());
        let query = self.signer.signed(query);
        let url = self.endpoint(STATUS_PATH);
        let (http, url, query) = (&self.http, url.as_str(), &query);

        self.retrying("get_status", FlowApiError::is_transient, move || async move {
            let response = http
                .get(url)
                .query(query)
                .send()
                .await
                .map_err(FlowApiError::from_reqwest)?;
            Self::read_json::<PaymentStatusResponse>(response).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> FlowClient {
        FlowClient::new(
            server.uri(),
            "api-key",
            FlowSigner::new("secret").unwrap(),
            Duration::from_secs(5),
        )
        .unwrap()
        .with_backoff(Backoff {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            factor: 2.0,
        })
    }

    fn request() -> CreatePaymentRequest {
        CreatePaymentRequest {
            commerce_order: 42,
            subject: "Orden #42 - Forja del Destino".into(),
            currency: "CLP".into(),
            amount: 19990,
            email: "cliente@example.cl".into(),
            url_confirmation: "https://api.example.cl/flow-webhook".into(),
            url_return: "https://api.example.cl/payment-redirect".into(),
        }
    }

    #[test]
    fn transient_classification() {
        assert!(FlowApiError::Timeout.is_transient());
        assert!(FlowApiError::Status { status: 503, body: String::new() }.is_transient());
        assert!(FlowApiError::Status { status: 429, body: String::new() }.is_transient());
        assert!(!FlowApiError::Status { status: 400, body: String::new() }.is_transient());
        assert!(!FlowApiError::Decode("x".into()).is_transient());
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let backoff = Backoff {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            factor: 2.0,
        };
        let first = backoff.delay_for(1);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(150));
        let capped = backoff.delay_for(4);
        assert!(capped >= Duration::from_millis(250) && capped <= Duration::from_millis(375));
    }

    #[tokio::test]
    async fn create_payment_posts_signed_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payment/create"))
            .and(body_string_contains("apiKey=api-key"))
            .and(body_string_contains("commerceOrder=42"))
            .and(body_string_contains("s="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "url": "https://sandbox.flow.cl/app/web/pay.php",
                "token": "tok-1",
                "flowOrder": 8765
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = client(&server).create_payment(&request()).await.unwrap();
        assert_eq!(created.token, "tok-1");
        assert_eq!(created.flow_order, 8765);
    }

    #[tokio::test]
    async fn create_payment_is_not_retried_after_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payment/create"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).create_payment(&request()).await.unwrap_err();
        assert!(matches!(err, FlowApiError::Status { status: 500, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn get_status_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/payment/getStatus"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/payment/getStatus"))
            .and(query_param("token", "tok-1"))
            .and(query_param("apiKey", "api-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "flowOrder": 8765,
                "commerceOrder": "42",
                "status": 2,
                "amount": 19990,
                "paymentMethod": 1
            })))
            .mount(&server)
            .await;

        let status = client(&server).get_status("tok-1").await.unwrap();
        assert_eq!(status.commerce_order, Some(42));
        assert_eq!(status.status, Some(2));
    }

    #[tokio::test]
    async fn get_status_does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/payment/getStatus"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({"code": 108, "message": "Invalid apiKey"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = client(&server).get_status("tok-1").await.unwrap_err();
        assert!(matches!(err, FlowApiError::Status { status: 401, .. }));
    }

    #[tokio::test]
    async fn deadline_bounds_all_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/payment/getStatus"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let started = std::time::Instant::now();
        let err = client(&server)
            .with_deadline(Duration::from_millis(300))
            .get_status("tok-1")
            .await
            .unwrap_err();
        assert!(matches!(err, FlowApiError::Timeout));
        assert!(err.is_transient());
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
