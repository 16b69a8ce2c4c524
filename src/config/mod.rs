//! Configuration management
//!
//! This module handles loading and parsing configuration for tiergate.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};

/// Upper bound for day-valued lifetimes; keeps timestamp arithmetic in range
pub const MAX_DURATION_DAYS: i64 = 3650;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Session lifetime
    #[serde(default)]
    pub session: SessionConfig,
    /// Trial clock
    #[serde(default)]
    pub trial: TrialConfig,
    /// Registration and master identity
    #[serde(default)]
    pub auth: AuthConfig,
    /// Payment gateway, package catalog and polling policy
    #[serde(default)]
    pub payment: PaymentConfig,
    /// Legacy identity provider (redirect exchange)
    #[serde(default)]
    pub legacy: LegacyConfig,
    /// Upstream market data / weekly picks provider
    #[serde(default)]
    pub content: ContentConfig,
    /// SMTP transport for verification codes; email verification is
    /// unavailable when absent
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin (for cookie-based auth)
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:3000".to_string()
}

/// Database configuration (SQLite)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path or `sqlite:` URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

fn default_database_url() -> String {
    "data/tiergate.db".to_string()
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Days until an issued session expires
    #[serde(default = "default_session_expiration_days")]
    pub expiration_days: i64,
    /// Interval of the background purge of expired sessions, 0 disables it
    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expiration_days: default_session_expiration_days(),
            purge_interval_secs: default_purge_interval_secs(),
        }
    }
}

fn default_session_expiration_days() -> i64 {
    7
}

fn default_purge_interval_secs() -> u64 {
    3600
}

/// Trial configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialConfig {
    /// Trial length granted at registration
    #[serde(default = "default_trial_days")]
    pub days: i64,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            days: default_trial_days(),
        }
    }
}

fn default_trial_days() -> i64 {
    7
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Minimum password length accepted at registration
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
    /// Username that bypasses all tier gating
    #[serde(default)]
    pub master_username: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            min_password_length: default_min_password_length(),
            master_username: None,
        }
    }
}

fn default_min_password_length() -> usize {
    3
}

/// A purchasable package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageConfig {
    pub id: String,
    pub name: String,
    /// Price in the smallest currency unit
    pub amount_cents: i64,
    pub currency: String,
}

/// Payment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Base URL of the Checkout Sessions API
    #[serde(default = "default_payment_api_base")]
    pub api_base: String,
    /// Secret API key
    #[serde(default)]
    pub secret_key: String,
    /// Webhook signing secret; webhooks are rejected while empty
    #[serde(default)]
    pub webhook_secret: String,
    /// Interval between confirmation polls issued by clients
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Polls before a client gives up with a confirmation timeout
    #[serde(default = "default_max_poll_attempts")]
    pub max_poll_attempts: u32,
    /// How long a completed but unpaid checkout may wait for a delayed
    /// payment method before it is recorded as failed
    #[serde(default = "default_async_payment_window_hours")]
    pub async_payment_window_hours: i64,
    /// Package catalog
    #[serde(default = "default_packages")]
    pub packages: Vec<PackageConfig>,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            api_base: default_payment_api_base(),
            secret_key: String::new(),
            webhook_secret: String::new(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_attempts: default_max_poll_attempts(),
            async_payment_window_hours: default_async_payment_window_hours(),
            packages: default_packages(),
        }
    }
}

fn default_payment_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_poll_attempts() -> u32 {
    5
}

fn default_async_payment_window_hours() -> i64 {
    14 * 24
}

fn default_packages() -> Vec<PackageConfig> {
    vec![PackageConfig {
        id: "premium_monthly".to_string(),
        name: "Premium Monthly".to_string(),
        amount_cents: 999,
        currency: "usd".to_string(),
    }]
}

/// Legacy identity provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LegacyConfig {
    /// Endpoint resolving an external session id to identity claims
    #[serde(default)]
    pub session_data_url: Option<String>,
}

/// Content provider configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Base URL of the upstream quotes / picks service
    #[serde(default)]
    pub base_url: Option<String>,
}

/// SMTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Sender address
    pub from: String,
    #[serde(default = "default_smtp_from_name")]
    pub from_name: String,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_from_name() -> String {
    "Tiergate".to_string()
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - TIERGATE_SERVER_HOST / TIERGATE_SERVER_PORT / TIERGATE_SERVER_CORS_ORIGIN
    /// - TIERGATE_DATABASE_URL
    /// - TIERGATE_SESSION_EXPIRATION_DAYS
    /// - TIERGATE_TRIAL_DAYS
    /// - TIERGATE_AUTH_MASTER_USERNAME
    /// - TIERGATE_PAYMENT_API_BASE / TIERGATE_PAYMENT_SECRET_KEY / TIERGATE_PAYMENT_WEBHOOK_SECRET
    /// - TIERGATE_LEGACY_SESSION_DATA_URL
    /// - TIERGATE_CONTENT_BASE_URL
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Look up a package from the catalog
    pub fn package(&self, id: &str) -> Option<&PackageConfig> {
        self.payment.packages.iter().find(|p| p.id == id)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_DURATION_DAYS).contains(&self.session.expiration_days) {
            return Err(ConfigError::ValidationError(format!(
                "session.expiration_days must be between 1 and {}",
                MAX_DURATION_DAYS
            )));
        }
        if !(0..=MAX_DURATION_DAYS).contains(&self.trial.days) {
            return Err(ConfigError::ValidationError(format!(
                "trial.days must be between 0 and {}",
                MAX_DURATION_DAYS
            )));
        }
        if self.payment.max_poll_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "payment.max_poll_attempts must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_DURATION_DAYS * 24).contains(&self.payment.async_payment_window_hours) {
            return Err(ConfigError::ValidationError(format!(
                "payment.async_payment_window_hours must be between 1 and {}",
                MAX_DURATION_DAYS * 24
            )));
        }
        for package in &self.payment.packages {
            if package.amount_cents <= 0 {
                return Err(ConfigError::ValidationError(format!(
                    "package '{}' must have a positive amount",
                    package.id
                )));
            }
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        // Server configuration
        if let Ok(host) = std::env::var("TIERGATE_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("TIERGATE_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("TIERGATE_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }

        // Database configuration
        if let Ok(url) = std::env::var("TIERGATE_DATABASE_URL") {
            self.database.url = url;
        }

        // Session and trial
        if let Ok(days) = std::env::var("TIERGATE_SESSION_EXPIRATION_DAYS") {
            if let Ok(days) = days.parse::<i64>() {
                self.session.expiration_days = days;
            }
        }
        if let Ok(days) = std::env::var("TIERGATE_TRIAL_DAYS") {
            if let Ok(days) = days.parse::<i64>() {
                self.trial.days = days;
            }
        }

        if let Ok(master) = std::env::var("TIERGATE_AUTH_MASTER_USERNAME") {
            self.auth.master_username = Some(master).filter(|m| !m.is_empty());
        }

        // Payment configuration
        if let Ok(api_base) = std::env::var("TIERGATE_PAYMENT_API_BASE") {
            self.payment.api_base = api_base;
        }
        if let Ok(secret_key) = std::env::var("TIERGATE_PAYMENT_SECRET_KEY") {
            self.payment.secret_key = secret_key;
        }
        if let Ok(webhook_secret) = std::env::var("TIERGATE_PAYMENT_WEBHOOK_SECRET") {
            self.payment.webhook_secret = webhook_secret;
        }

        if let Ok(url) = std::env::var("TIERGATE_LEGACY_SESSION_DATA_URL") {
            self.legacy.session_data_url = Some(url);
        }
        if let Ok(url) = std::env::var("TIERGATE_CONTENT_BASE_URL") {
            self.content.base_url = Some(url);
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Shared mutex for all config tests that modify environment variables.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
