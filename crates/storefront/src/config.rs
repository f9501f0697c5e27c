//! Storefront configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `STOREFRONT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `STOREFRONT_BASE_URL` - Public URL for the storefront API
//! - `STOREFRONT_SESSION_SECRET` - Session and two-factor code signing secret (min 32 chars, high entropy)
//!
//! ## Optional
//! - `STOREFRONT_HOST` - Bind address (default: 127.0.0.1)
//! - `STOREFRONT_PORT` - Listen port (default: 3000)
//! - `STOREFRONT_CORS_ORIGIN` - Origin of the single-page frontend allowed to call the API
//! - `SMTP_HOST`, `SMTP_PORT`, `SMTP_USERNAME`, `SMTP_PASSWORD`, `SMTP_FROM` - Outgoing mail
//!   (all or nothing; without them two-factor codes are logged instead of mailed)
//! - `ASSISTANT_API_KEY` - Chat-completions API key (assistant disabled when unset)
//! - `ASSISTANT_API_URL` - Chat-completions endpoint (default: `OpenAI`)
//! - `ASSISTANT_MODEL` - Model id (default: gpt-4o-mini)
//! - `TWO_FACTOR_CODE_TTL_SECONDS` (600), `TWO_FACTOR_TOKEN_TTL_SECONDS` (900),
//!   `TWO_FACTOR_RESEND_COOLDOWN_SECONDS` (60), `TWO_FACTOR_MAX_ATTEMPTS` (5)
//! - `DELIVERY_FEE` (5.00), `FREE_DELIVERY_THRESHOLD` (50.00)
//! - `PRODUCT_CACHE_TTL_SECONDS` (300)
//! - `SENTRY_DSN`, `SENTRY_ENVIRONMENT`, `SENTRY_SAMPLE_RATE`, `SENTRY_TRACES_SAMPLE_RATE`
//! - `LOG_FORMAT` - `json` for structured logs, anything else for human-readable output

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use apothecary_core::Price;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

const MIN_SESSION_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

const DEFAULT_ASSISTANT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_ASSISTANT_MODEL: &str = "gpt-4o-mini";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Storefront application configuration.
#[derive(Debug, Clone)]
pub struct StorefrontConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the storefront
    pub base_url: String,
    /// Session signing secret, also keys the two-factor code HMAC
    pub session_secret: SecretString,
    /// Allowed CORS origin for the frontend
    pub cors_origin: Option<String>,
    /// SMTP settings; `None` means development mode
    pub email: Option<EmailConfig>,
    /// Shopping assistant upstream; `None` disables the assistant
    pub assistant: Option<AssistantConfig>,
    /// Two-factor login policy
    pub two_factor: TwoFactorConfig,
    /// Delivery pricing
    pub delivery: DeliveryConfig,
    /// Lifetime of cached catalog responses
    pub product_cache_ttl: Duration,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment tag
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate (0.0 to 1.0)
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate (0.0 to 1.0)
    pub sentry_traces_sample_rate: f32,
    /// Emit logs as JSON
    pub json_logs: bool,
}

/// Email (SMTP) configuration.
///
/// Implements `Debug` manually to redact the password.
#[derive(Clone)]
pub struct EmailConfig {
    /// SMTP server hostname
    pub smtp_host: String,
    /// SMTP server port
    pub smtp_port: u16,
    /// SMTP authentication username
    pub smtp_username: String,
    /// SMTP authentication password
    pub smtp_password: SecretString,
    /// Email sender address (From header)
    pub from_address: String,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .finish()
    }
}

/// Chat-completions API configuration for the shopping assistant.
///
/// Implements `Debug` manually to redact the API key.
#[derive(Clone)]
pub struct AssistantConfig {
    /// Bearer API key
    pub api_key: SecretString,
    /// Full chat-completions endpoint URL
    pub api_url: String,
    /// Model id sent with every request
    pub model: String,
}

impl std::fmt::Debug for AssistantConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantConfig")
            .field("api_key", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

/// Timing and attempt limits for two-factor login challenges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TwoFactorConfig {
    /// How long an emailed code stays valid.
    pub code_ttl: Duration,
    /// How long a login token stays valid.
    pub token_ttl: Duration,
    /// Minimum time between two code emails.
    pub resend_cooldown: Duration,
    /// Wrong codes allowed before the challenge is discarded.
    pub max_attempts: u32,
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self {
            code_ttl: Duration::from_secs(10 * 60),
            token_ttl: Duration::from_secs(15 * 60),
            resend_cooldown: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

/// Flat delivery fee waived above a subtotal threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryConfig {
    /// Fee charged below the threshold.
    pub fee: Price,
    /// Subtotal at or above which delivery is free.
    pub free_threshold: Price,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            fee: Price::from_cents(500),
            free_threshold: Price::from_cents(5_000),
        }
    }
}

impl StorefrontConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("STOREFRONT_DATABASE_URL")?;
        let host = parse_env_or_default("STOREFRONT_HOST", "127.0.0.1")?;
        let port = parse_env_or_default("STOREFRONT_PORT", "3000")?;
        let base_url = get_required_env("STOREFRONT_BASE_URL")?;
        url::Url::parse(&base_url).map_err(|e| {
            ConfigError::InvalidEnvVar("STOREFRONT_BASE_URL".to_string(), e.to_string())
        })?;
        let session_secret = get_validated_secret("STOREFRONT_SESSION_SECRET")?;
        validate_session_secret(&session_secret, "STOREFRONT_SESSION_SECRET")?;

        let cors_origin = get_optional_env("STOREFRONT_CORS_ORIGIN");
        let email = EmailConfig::from_env()?;
        let assistant = AssistantConfig::from_env()?;
        let two_factor = TwoFactorConfig::from_env()?;
        let delivery = DeliveryConfig::from_env()?;
        let product_cache_ttl =
            Duration::from_secs(parse_env_or_default("PRODUCT_CACHE_TTL_SECONDS", "300")?);

        let sentry_dsn = get_optional_env("SENTRY_DSN");
        let sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");
        let sentry_sample_rate = get_optional_env("SENTRY_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(1.0);
        let sentry_traces_sample_rate = get_optional_env("SENTRY_TRACES_SAMPLE_RATE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.1);
        let json_logs = get_optional_env("LOG_FORMAT").is_some_and(|f| f == "json");

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            session_secret,
            cors_origin,
            email,
            assistant,
            two_factor,
            delivery,
            product_cache_ttl,
            sentry_dsn,
            sentry_environment,
            sentry_sample_rate,
            sentry_traces_sample_rate,
            json_logs,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether cookies should carry the `Secure` flag.
    #[must_use]
    pub fn is_https(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}

impl EmailConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let host = get_optional_env("SMTP_HOST");
        let username = get_optional_env("SMTP_USERNAME");
        let password = get_optional_env("SMTP_PASSWORD");
        let from = get_optional_env("SMTP_FROM");

        match (host, username, password, from) {
            (Some(smtp_host), Some(smtp_username), Some(password), Some(from_address)) => {
                Ok(Some(Self {
                    smtp_host,
                    smtp_port: parse_env_or_default("SMTP_PORT", "587")?,
                    smtp_username,
                    smtp_password: SecretString::from(password),
                    from_address,
                }))
            }
            (None, None, None, None) => Ok(None),
            _ => Err(ConfigError::InvalidEnvVar(
                "SMTP_*".to_string(),
                "SMTP_HOST, SMTP_USERNAME, SMTP_PASSWORD and SMTP_FROM must be set together"
                    .to_string(),
            )),
        }
    }
}

impl AssistantConfig {
    fn from_env() -> Result<Option<Self>, ConfigError> {
        let Some(key) = get_optional_env("ASSISTANT_API_KEY") else {
            return Ok(None);
        };
        validate_secret_strength(&key, "ASSISTANT_API_KEY")?;

        let api_url = get_env_or_default("ASSISTANT_API_URL", DEFAULT_ASSISTANT_API_URL);
        url::Url::parse(&api_url).map_err(|e| {
            ConfigError::InvalidEnvVar("ASSISTANT_API_URL".to_string(), e.to_string())
        })?;

        Ok(Some(Self {
            api_key: SecretString::from(key),
            api_url,
            model: get_env_or_default("ASSISTANT_MODEL", DEFAULT_ASSISTANT_MODEL),
        }))
    }
}

impl TwoFactorConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let max_attempts: u32 = parse_env_or_default(
            "TWO_FACTOR_MAX_ATTEMPTS",
            &defaults.max_attempts.to_string(),
        )?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "TWO_FACTOR_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            code_ttl: seconds_env("TWO_FACTOR_CODE_TTL_SECONDS", defaults.code_ttl)?,
            token_ttl: seconds_env("TWO_FACTOR_TOKEN_TTL_SECONDS", defaults.token_ttl)?,
            resend_cooldown: seconds_env(
                "TWO_FACTOR_RESEND_COOLDOWN_SECONDS",
                defaults.resend_cooldown,
            )?,
            max_attempts,
        })
    }
}

impl DeliveryConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            fee: price_env("DELIVERY_FEE", defaults.fee)?,
            free_threshold: price_env("FREE_DELIVERY_THRESHOLD", defaults.free_threshold)?,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL` (used by Fly.io postgres attach).
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    get_optional_env(key).unwrap_or_else(|| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
fn parse_env_or_default<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn seconds_env(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_env_or_default(key, &default.as_secs().to_string())?;
    if secs == 0 {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

fn price_env(key: &str, default: Price) -> Result<Price, ConfigError> {
    let amount: Decimal = parse_env_or_default(key, &default.to_string())?;
    Price::new(amount).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Validate that a session secret meets minimum length requirements.
fn validate_session_secret(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_SESSION_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_SESSION_SECRET_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
/// Minimal configuration for tests elsewhere in the crate.
pub(crate) fn test_config() -> StorefrontConfig {
    StorefrontConfig {
        database_url: SecretString::from("postgres://localhost/test"),
        host: IpAddr::from([127, 0, 0, 1]),
        port: 3000,
        base_url: "http://localhost:3000".to_string(),
        session_secret: SecretString::from("k9$Qm2!vR7@pL4#xT8&wZ1*nB5^cF3%h"),
        cors_origin: None,
        email: None,
        assistant: None,
        two_factor: TwoFactorConfig::default(),
        delivery: DeliveryConfig::default(),
        product_cache_ttl: Duration::from_secs(300),
        sentry_dsn: None,
        sentry_environment: None,
        sentry_sample_rate: 1.0,
        sentry_traces_sample_rate: 0.1,
        json_logs: false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_single_char() {
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let err = validate_secret_strength("your-api-key-here", "TEST_VAR").unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
        assert!(validate_secret_strength("changeme123", "TEST_VAR").is_err());
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let err =
            validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR").unwrap_err();
        assert!(matches!(err, ConfigError::InsecureSecret(_, _)));
    }

    #[test]
    fn test_validate_secret_strength_valid() {
        let result = validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "TEST_VAR");
        assert!(result.is_ok());
    }

    #[test]
    fn test_validate_session_secret_length() {
        let short = SecretString::from("short");
        assert!(validate_session_secret(&short, "TEST_SESSION").is_err());

        let long = SecretString::from("a".repeat(32));
        assert!(validate_session_secret(&long, "TEST_SESSION").is_ok());
    }

    #[test]
    fn test_socket_addr_and_https() {
        let mut config = test_config();
        let addr = config.socket_addr();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 3000);
        assert!(!config.is_https());

        config.base_url = "https://shop.example.org".to_string();
        assert!(config.is_https());
    }

    #[test]
    fn test_defaults() {
        let two_factor = TwoFactorConfig::default();
        assert_eq!(two_factor.code_ttl, Duration::from_secs(600));
        assert_eq!(two_factor.token_ttl, Duration::from_secs(900));
        assert_eq!(two_factor.resend_cooldown, Duration::from_secs(60));
        assert_eq!(two_factor.max_attempts, 5);

        let delivery = DeliveryConfig::default();
        assert_eq!(delivery.fee.to_string(), "5.00");
        assert_eq!(delivery.free_threshold.to_string(), "50.00");
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let email = EmailConfig {
            smtp_host: "smtp.mail.test".to_string(),
            smtp_port: 587,
            smtp_username: "mailer".to_string(),
            smtp_password: SecretString::from("hunter2-smtp"),
            from_address: "shop@mail.test".to_string(),
        };
        let assistant = AssistantConfig {
            api_key: SecretString::from("sk-live-abcdef"),
            api_url: DEFAULT_ASSISTANT_API_URL.to_string(),
            model: DEFAULT_ASSISTANT_MODEL.to_string(),
        };

        let email_debug = format!("{email:?}");
        assert!(email_debug.contains("smtp.mail.test"));
        assert!(!email_debug.contains("hunter2-smtp"));

        let assistant_debug = format!("{assistant:?}");
        assert!(assistant_debug.contains("gpt-4o-mini"));
        assert!(assistant_debug.contains("[REDACTED]"));
        assert!(!assistant_debug.contains("sk-live-abcdef"));
    }
}
