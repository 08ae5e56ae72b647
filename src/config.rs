use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_FLOW_API_URL: &str = "https://sandbox.flow.cl/api";
const DEFAULT_FLOW_CURRENCY: &str = "CLP";
const DEFAULT_STORE_NAME: &str = "Forja del Destino";
const DEFAULT_CALLBACK_PATH: &str = "/payment/callback";
const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    // ========== Flow.cl gateway ==========
    /// Merchant API key issued by Flow
    #[validate(custom = "validate_required_credential")]
    pub flow_api_key: String,

    /// Shared secret used for request and webhook signatures
    #[validate(custom = "validate_required_credential")]
    pub flow_secret_key: String,

    /// Gateway base URL (sandbox or production)
    #[serde(default = "default_flow_api_url")]
    #[validate(url)]
    pub flow_api_url: String,

    /// Public URL Flow posts payment confirmations to
    #[serde(default)]
    pub flow_webhook_url: Option<String>,

    /// Public URL the buyer returns to after paying
    #[serde(default)]
    pub flow_return_url: Option<String>,

    /// Currency sent with every payment
    #[serde(default = "default_flow_currency")]
    pub flow_currency: String,

    /// Store name used in the payment subject line
    #[serde(default = "default_store_name")]
    pub store_name: String,

    /// Per-request timeout for gateway calls (seconds)
    #[serde(default = "default_flow_timeout_secs")]
    pub flow_timeout_secs: u64,

    /// Attempts for transient gateway failures
    #[serde(default = "default_flow_max_retries")]
    #[validate(range(min = 1, max = 10))]
    pub flow_max_retries: u32,

    /// Upper bound for one logical gateway call, retries and backoff included (seconds)
    #[serde(default = "default_flow_deadline_secs")]
    #[validate(range(min = 1))]
    pub flow_deadline_secs: u64,

    // ========== Settlement ==========
    /// Accepted absolute difference between paid amount and order total
    #[serde(default = "default_amount_tolerance")]
    #[validate(range(min = 0))]
    pub amount_tolerance: i64,

    /// Upper bound for a whole settlement run (seconds)
    #[serde(default = "default_settlement_timeout_secs")]
    pub settlement_timeout_secs: u64,

    /// SPA route the return redirect points at
    #[serde(default = "default_payment_callback_path")]
    pub payment_callback_path: String,
}

impl AppConfig {
    /// Creates a new configuration with defaults for everything but the essentials
    pub fn new(
        database_url: String,
        host: String,
        port: u16,
        environment: String,
        flow_api_key: String,
        flow_secret_key: String,
    ) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            flow_api_key,
            flow_secret_key,
            flow_api_url: default_flow_api_url(),
            flow_webhook_url: None,
            flow_return_url: None,
            flow_currency: default_flow_currency(),
            store_name: default_store_name(),
            flow_timeout_secs: default_flow_timeout_secs(),
            flow_max_retries: default_flow_max_retries(),
            flow_deadline_secs: default_flow_deadline_secs(),
            amount_tolerance: default_amount_tolerance(),
            settlement_timeout_secs: default_settlement_timeout_secs(),
            payment_callback_path: default_payment_callback_path(),
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn flow_timeout(&self) -> Duration {
        Duration::from_secs(self.flow_timeout_secs)
    }

    pub fn settlement_timeout(&self) -> Duration {
        Duration::from_secs(self.settlement_timeout_secs)
    }

    pub fn flow_deadline(&self) -> Duration {
        Duration::from_secs(self.flow_deadline_secs)
    }

    /// Outer HTTP timeout. Verify runs one gateway call and one settlement in
    /// sequence, so both inner bounds must expire before this one.
    pub fn request_timeout(&self) -> Duration {
        self.flow_deadline() + self.settlement_timeout() + REQUEST_TIMEOUT_MARGIN
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if self.is_production() && self.flow_api_url.contains("sandbox") {
            let mut err = ValidationError::new("flow_api_url_sandbox");
            err.message =
                Some("Production must point APP__FLOW_API_URL at the live Flow API".into());
            errors.add("flow_api_url", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_flow_api_url() -> String {
    DEFAULT_FLOW_API_URL.to_string()
}

fn default_flow_currency() -> String {
    DEFAULT_FLOW_CURRENCY.to_string()
}

fn default_store_name() -> String {
    DEFAULT_STORE_NAME.to_string()
}

fn default_flow_timeout_secs() -> u64 {
    15
}

fn default_flow_max_retries() -> u32 {
    3
}

fn default_flow_deadline_secs() -> u64 {
    20
}

fn default_amount_tolerance() -> i64 {
    1 // one peso of rounding slack
}

fn default_settlement_timeout_secs() -> u64 {
    30
}

fn default_payment_callback_path() -> String {
    DEFAULT_CALLBACK_PATH.to_string()
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_required_credential(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("flow_credentials");
        err.message = Some("Flow API key and secret must be configured".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("forja_payments={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // Flow credentials have no default: they must come from a file or APP__FLOW_* variables.
    let config = Config::builder()
        .set_default("database_url", "sqlite://forja.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("flow_api_url", DEFAULT_FLOW_API_URL)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    for key in ["flow_api_key", "flow_secret_key"] {
        if config.get_string(key).is_err() {
            error!(
                "{} is not configured. Set APP__{} before starting the service.",
                key,
                key.to_ascii_uppercase()
            );
            return Err(AppConfigError::Load(ConfigError::NotFound(key.into())));
        }
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
            "api-key".into(),
            "secret".into(),
        )
    }

    #[test]
    fn defaults_match_gateway_expectations() {
        let cfg = base_config();
        assert_eq!(cfg.flow_api_url, "https://sandbox.flow.cl/api");
        assert_eq!(cfg.flow_currency, "CLP");
        assert_eq!(cfg.amount_tolerance, 1);
        assert_eq!(cfg.payment_callback_path, "/payment/callback");
    }

    #[test]
    fn request_timeout_outlasts_gateway_and_settlement_bounds() {
        let mut cfg = base_config();
        cfg.flow_deadline_secs = 20;
        cfg.settlement_timeout_secs = 30;
        assert_eq!(cfg.request_timeout(), Duration::from_secs(55));
        assert!(cfg.request_timeout() > cfg.flow_deadline() + cfg.settlement_timeout());
    }

    #[test]
    fn empty_secret_fails_validation() {
        let mut cfg = base_config();
        cfg.flow_secret_key = "   ".into();
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("flow_secret_key"));
    }

    #[test]
    fn production_rejects_sandbox_gateway() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://forjadeldestino.cl".into());
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.field_errors().contains_key("flow_api_url"));

        cfg.flow_api_url = "https://www.flow.cl/api".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let mut cfg = base_config();
        cfg.environment = "staging".into();
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.cors_allow_any_origin = true;
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn development_allows_permissive_by_default() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }
}
