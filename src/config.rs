//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.
//! The struct is built once in `main` and handed down; nothing reads the
//! environment after startup.

use chrono::Duration;
use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (optional): PostgreSQL connection string. When absent the
///   service runs on the in-memory store.
/// - `DB_MAX_CONNECTIONS` (optional): pool size, defaults to 5
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 8001
/// - `JWT_SECRET` (required): HS256 secret for bearer tokens
/// - `STRIPE_SECRET_KEY` (optional): enables the Stripe gateway
/// - `STRIPE_WEBHOOK_SECRET` (required): webhook signing secret
/// - `WEBHOOK_TOLERANCE_SECONDS` (optional): defaults to 300
/// - `CARD_VALIDITY_DAYS` (optional): defaults to 365
/// - `MINIMUM_BILLING_MINUTES` (optional): defaults to 1
/// - `ACTIVATION_CODE_ATTEMPTS` (optional): defaults to 10
/// - `REQUIRE_BALANCE_TO_START` (optional): defaults to true
/// - `LOW_BALANCE_THRESHOLD_MINUTES` (optional): defaults to 30
/// - `LOW_BALANCE_WEBHOOK_URL` / `LOW_BALANCE_WEBHOOK_SECRET` (optional)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_port")]
    pub server_port: u16,

    pub jwt_secret: String,

    pub stripe_secret_key: Option<String>,

    pub stripe_webhook_secret: String,

    #[serde(default = "default_webhook_tolerance")]
    pub webhook_tolerance_seconds: i64,

    #[serde(default = "default_card_validity_days")]
    pub card_validity_days: i64,

    #[serde(default = "default_minimum_billing_minutes")]
    pub minimum_billing_minutes: i32,

    #[serde(default = "default_activation_code_attempts")]
    pub activation_code_attempts: u32,

    #[serde(default = "default_true")]
    pub require_balance_to_start: bool,

    #[serde(default = "default_low_balance_threshold")]
    pub low_balance_threshold_minutes: i64,

    pub low_balance_webhook_url: Option<String>,

    pub low_balance_webhook_secret: Option<String>,
}

fn default_max_connections() -> u32 {
    5
}

fn default_port() -> u16 {
    8001
}

fn default_webhook_tolerance() -> i64 {
    300
}

fn default_card_validity_days() -> i64 {
    365
}

fn default_minimum_billing_minutes() -> i32 {
    1
}

fn default_activation_code_attempts() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

fn default_low_balance_threshold() -> i64 {
    30
}

/// The subset of configuration the ledger services depend on.
#[derive(Debug, Clone, Copy)]
pub struct LedgerConfig {
    /// How long a card stays spendable after activation.
    pub card_validity: Duration,

    /// Floor applied to every billed session.
    pub minimum_billing_minutes: i32,

    /// How many activation codes to try before giving up on a collision.
    pub activation_code_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            card_validity: Duration::days(default_card_validity_days()),
            minimum_billing_minutes: default_minimum_billing_minutes(),
            activation_code_attempts: default_activation_code_attempts(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., JWT_SECRET)
    /// - Environment variable values cannot be parsed into expected types
    /// - Values are out of range (see [`Config::validate`])
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        // Field names are automatically converted: jwt_secret -> JWT_SECRET
        let config = envy::from_env::<Config>()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would break ledger invariants at runtime.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.card_validity_days <= 0 {
            anyhow::bail!("CARD_VALIDITY_DAYS must be positive");
        }
        if self.minimum_billing_minutes < 0 {
            anyhow::bail!("MINIMUM_BILLING_MINUTES must not be negative");
        }
        if self.activation_code_attempts == 0 {
            anyhow::bail!("ACTIVATION_CODE_ATTEMPTS must be at least 1");
        }
        if self.webhook_tolerance_seconds <= 0 {
            anyhow::bail!("WEBHOOK_TOLERANCE_SECONDS must be positive");
        }
        if self.jwt_secret.is_empty() {
            anyhow::bail!("JWT_SECRET must not be empty");
        }
        if let Some(ref url) = self.low_balance_webhook_url {
            validate_webhook_url(url)?;
        }
        Ok(())
    }

    pub fn ledger(&self) -> LedgerConfig {
        LedgerConfig {
            card_validity: Duration::days(self.card_validity_days),
            minimum_billing_minutes: self.minimum_billing_minutes,
            activation_code_attempts: self.activation_code_attempts,
        }
    }
}

/// Validate the notification webhook URL.
///
/// # Rules
///
/// - Must be valid URL
/// - Must be HTTPS (HTTP localhost allowed for development)
/// - Maximum 2048 characters
fn validate_webhook_url(url: &str) -> anyhow::Result<()> {
    if url.len() > 2048 {
        anyhow::bail!("LOW_BALANCE_WEBHOOK_URL exceeds 2048 characters");
    }

    let parsed = url::Url::parse(url)?;

    match parsed.scheme() {
        "https" => Ok(()),
        "http" => match parsed.host_str() {
            Some("localhost") | Some("127.0.0.1") | Some("0.0.0.0") => Ok(()),
            _ => anyhow::bail!("HTTP is only allowed for localhost. Use HTTPS for production."),
        },
        other => anyhow::bail!("LOW_BALANCE_WEBHOOK_URL must use HTTP or HTTPS, got {other}"),
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        database_url: None,
        db_max_connections: default_max_connections(),
        server_port: default_port(),
        jwt_secret: "test-jwt-secret".to_string(),
        stripe_secret_key: None,
        stripe_webhook_secret: "whsec_test".to_string(),
        webhook_tolerance_seconds: default_webhook_tolerance(),
        card_validity_days: default_card_validity_days(),
        minimum_billing_minutes: default_minimum_billing_minutes(),
        activation_code_attempts: default_activation_code_attempts(),
        require_balance_to_start: true,
        low_balance_threshold_minutes: default_low_balance_threshold(),
        low_balance_webhook_url: None,
        low_balance_webhook_secret: None,
    }
}
