//! Application configuration loaded from environment variables.

use std::sync::Arc;
use std::time::Duration;

use fulfillment::{
    CourierService, InMemoryCourierService, InMemoryPaymentGateway, PaymentGateway,
    SenderDetails, StripeGateway, WebhookCourierService,
};
use thiserror::Error;

/// Errors raised while reading configuration or building providers from it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },

    #[error("{0} is required by the selected provider")]
    Missing(&'static str),

    #[error("failed to build payment client: {0}")]
    Payment(String),

    #[error("failed to build courier client: {0}")]
    Courier(String),
}

/// Which payment gateway handles checkout sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentProvider {
    Mock,
    Stripe,
}

/// Which courier service creates shipping labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourierProvider {
    Mock,
    Webhook,
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`, `RUST_LOG`
/// - `DATABASE_URL` (unset selects the in-memory store), `DATABASE_MAX_CONNECTIONS`
/// - `PAYMENT_PROVIDER` (`mock` | `stripe`), `STRIPE_SECRET_KEY`, `STRIPE_API_BASE`,
///   `STRIPE_TIMEOUT_SECS`
/// - `FRONTEND_URL` for the checkout success and cancel pages
/// - `COURIER_PROVIDER` (`mock` | `webhook`), `COURIER_WEBHOOK_URL`,
///   `COURIER_API_KEY`, `COURIER_TIMEOUT_SECS`
/// - `COURIER_SENDER_NAME`, `COURIER_SENDER_PHONE`, `COURIER_SENDER_ADDRESS`,
///   `COURIER_SENDER_CITY`
/// - `COURIER_POLL_INTERVAL_SECS`, `COURIER_MAX_ATTEMPTS`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub payment_provider: PaymentProvider,
    pub stripe_secret_key: Option<String>,
    pub stripe_api_base: String,
    pub stripe_timeout: Duration,
    pub frontend_url: String,
    pub courier_provider: CourierProvider,
    pub courier_webhook_url: Option<String>,
    pub courier_api_key: Option<String>,
    pub courier_timeout: Duration,
    pub sender: SenderDetails,
    pub courier_poll_interval: Duration,
    pub courier_max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            database_url: None,
            database_max_connections: 5,
            payment_provider: PaymentProvider::Mock,
            stripe_secret_key: None,
            stripe_api_base: "https://api.stripe.com".to_string(),
            stripe_timeout: Duration::from_secs(30),
            frontend_url: "http://localhost:5173".to_string(),
            courier_provider: CourierProvider::Mock,
            courier_webhook_url: None,
            courier_api_key: None,
            courier_timeout: Duration::from_secs(60),
            sender: SenderDetails::default(),
            courier_poll_interval: Duration::from_secs(5),
            courier_max_attempts: 5,
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary variable source, falling back
    /// to defaults for anything unset or blank.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let config = Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse(&get, "PORT", defaults.port)?,
            log_level: get("RUST_LOG").unwrap_or(defaults.log_level),
            database_url: get("DATABASE_URL"),
            database_max_connections: parse(
                &get,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            payment_provider: match get("PAYMENT_PROVIDER").as_deref() {
                None | Some("mock") => PaymentProvider::Mock,
                Some("stripe") => PaymentProvider::Stripe,
                Some(other) => {
                    return Err(ConfigError::Invalid {
                        var: "PAYMENT_PROVIDER",
                        value: other.to_string(),
                    });
                }
            },
            stripe_secret_key: get("STRIPE_SECRET_KEY"),
            stripe_api_base: get("STRIPE_API_BASE").unwrap_or(defaults.stripe_api_base),
            stripe_timeout: Duration::from_secs(parse(
                &get,
                "STRIPE_TIMEOUT_SECS",
                defaults.stripe_timeout.as_secs(),
            )?),
            frontend_url: get("FRONTEND_URL").unwrap_or(defaults.frontend_url),
            courier_provider: match get("COURIER_PROVIDER").as_deref() {
                None | Some("mock") => CourierProvider::Mock,
                Some("webhook") => CourierProvider::Webhook,
                Some(other) => {
                    return Err(ConfigError::Invalid {
                        var: "COURIER_PROVIDER",
                        value: other.to_string(),
                    });
                }
            },
            courier_webhook_url: get("COURIER_WEBHOOK_URL"),
            courier_api_key: get("COURIER_API_KEY"),
            courier_timeout: Duration::from_secs(parse(
                &get,
                "COURIER_TIMEOUT_SECS",
                defaults.courier_timeout.as_secs(),
            )?),
            sender: SenderDetails {
                name: get("COURIER_SENDER_NAME").unwrap_or_default(),
                phone: get("COURIER_SENDER_PHONE").unwrap_or_default(),
                address: get("COURIER_SENDER_ADDRESS").unwrap_or_default(),
                city: get("COURIER_SENDER_CITY").unwrap_or_default(),
            },
            courier_poll_interval: Duration::from_secs(parse(
                &get,
                "COURIER_POLL_INTERVAL_SECS",
                defaults.courier_poll_interval.as_secs(),
            )?),
            courier_max_attempts: parse(&get, "COURIER_MAX_ATTEMPTS", defaults.courier_max_attempts)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Rejects provider selections that lack their credentials, and zero
    /// durations or attempt counts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.payment_provider == PaymentProvider::Stripe && self.stripe_secret_key.is_none() {
            return Err(ConfigError::Missing("STRIPE_SECRET_KEY"));
        }
        if self.courier_provider == CourierProvider::Webhook {
            if self.courier_webhook_url.is_none() {
                return Err(ConfigError::Missing("COURIER_WEBHOOK_URL"));
            }
            if self.courier_api_key.is_none() {
                return Err(ConfigError::Missing("COURIER_API_KEY"));
            }
        }
        let zero = [
            ("COURIER_MAX_ATTEMPTS", self.courier_max_attempts == 0),
            ("COURIER_POLL_INTERVAL_SECS", self.courier_poll_interval.is_zero()),
            ("COURIER_TIMEOUT_SECS", self.courier_timeout.is_zero()),
            ("STRIPE_TIMEOUT_SECS", self.stripe_timeout.is_zero()),
        ];
        if let Some((var, _)) = zero.into_iter().find(|(_, is_zero)| *is_zero) {
            return Err(ConfigError::Invalid {
                var,
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Builds the configured payment gateway.
    pub fn payment_gateway(&self) -> Result<Arc<dyn PaymentGateway>, ConfigError> {
        match self.payment_provider {
            PaymentProvider::Mock => Ok(Arc::new(InMemoryPaymentGateway::new())),
            PaymentProvider::Stripe => {
                let key = self
                    .stripe_secret_key
                    .as_deref()
                    .ok_or(ConfigError::Missing("STRIPE_SECRET_KEY"))?;
                let gateway = StripeGateway::new(&self.stripe_api_base, key, self.stripe_timeout)
                    .map_err(|err| ConfigError::Payment(err.to_string()))?;
                Ok(Arc::new(gateway))
            }
        }
    }

    /// Builds the configured courier service.
    pub fn courier_service(&self) -> Result<Arc<dyn CourierService>, ConfigError> {
        match self.courier_provider {
            CourierProvider::Mock => Ok(Arc::new(InMemoryCourierService::new())),
            CourierProvider::Webhook => {
                let url = self
                    .courier_webhook_url
                    .as_deref()
                    .ok_or(ConfigError::Missing("COURIER_WEBHOOK_URL"))?;
                let key = self
                    .courier_api_key
                    .as_deref()
                    .ok_or(ConfigError::Missing("COURIER_API_KEY"))?;
                let service = WebhookCourierService::new(url, key, self.courier_timeout)
                    .map_err(|err| ConfigError::Courier(err.to_string()))?;
                Ok(Arc::new(service))
            }
        }
    }
}

fn parse<T, G>(get: &G, var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
