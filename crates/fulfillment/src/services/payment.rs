//! Payment gateway trait, in-memory implementation and Stripe client.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use common::{Money, OrderId};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

/// Errors returned by a payment gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request never got a response.
    #[error("payment gateway request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The gateway answered with an error status.
    #[error("payment gateway returned {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The gateway answered with something we cannot use.
    #[error("invalid payment gateway response: {0}")]
    InvalidResponse(String),

    /// The gateway is unavailable.
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),
}

/// One priced line of a checkout request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutLine {
    pub name: String,
    pub unit_amount: Money,
    pub quantity: u32,
}

/// Everything a gateway needs to open a hosted checkout page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutRequest {
    pub order_id: OrderId,
    /// Lowercase ISO currency code.
    pub currency: String,
    pub lines: Vec<CheckoutLine>,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
    pub metadata: Vec<(String, String)>,
}

impl CheckoutRequest {
    /// Returns the sum of all lines.
    pub fn amount(&self) -> Money {
        self.lines
            .iter()
            .map(|line| line.unit_amount.multiply(line.quantity))
            .sum()
    }
}

/// A checkout session as created by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySession {
    pub id: String,
    pub url: String,
}

/// Trait for payment gateways.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a checkout session.
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<GatewaySession, GatewayError>;
}

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    requests: Vec<CheckoutRequest>,
    next_id: u32,
    fail_on_create: bool,
}

/// In-memory payment gateway for testing and local development.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
}

impl InMemoryPaymentGateway {
    /// Creates a new in-memory gateway.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the gateway to fail every session creation.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state.write().unwrap().fail_on_create = fail;
    }

    /// Returns the number of sessions created.
    pub fn session_count(&self) -> usize {
        self.state.read().unwrap().requests.len()
    }

    /// Returns the most recent request that produced a session.
    pub fn last_request(&self) -> Option<CheckoutRequest> {
        self.state.read().unwrap().requests.last().cloned()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<GatewaySession, GatewayError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_create {
            return Err(GatewayError::Unavailable("checkout declined".to_string()));
        }

        state.next_id += 1;
        let id = format!("cs_test_{:04}", state.next_id);
        state.requests.push(request.clone());

        Ok(GatewaySession {
            url: format!("https://checkout.test/pay/{id}"),
            id,
        })
    }
}

#[derive(Deserialize)]
struct StripeSession {
    id: String,
    url: Option<String>,
}

#[derive(Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Deserialize)]
struct StripeErrorDetail {
    message: String,
}

/// Stripe Checkout client.
///
/// Sessions are created with a form-encoded POST to
/// `{api_base}/v1/checkout/sessions`, authenticated with the secret key.
pub struct StripeGateway {
    client: Client,
    api_base: String,
    secret_key: String,
}

impl StripeGateway {
    /// Creates a Stripe client whose requests give up after `timeout`.
    pub fn new(api_base: &str, secret_key: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        })
    }

    fn form_params(request: &CheckoutRequest) -> Vec<(String, String)> {
        let mut params = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            ("customer_email".to_string(), request.customer_email.clone()),
            (
                "client_reference_id".to_string(),
                request.order_id.to_string(),
            ),
        ];

        for (i, line) in request.lines.iter().enumerate() {
            let prefix = format!("line_items[{i}]");
            params.push((
                format!("{prefix}[price_data][currency]"),
                request.currency.clone(),
            ));
            params.push((
                format!("{prefix}[price_data][product_data][name]"),
                line.name.clone(),
            ));
            params.push((
                format!("{prefix}[price_data][unit_amount]"),
                line.unit_amount.cents().to_string(),
            ));
            params.push((format!("{prefix}[quantity]"), line.quantity.to_string()));
        }

        for (key, value) in &request.metadata {
            params.push((format!("metadata[{key}]"), value.clone()));
        }

        params
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<GatewaySession, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&Self::form_params(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<StripeErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or(body);
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let session: StripeSession = response.json().await?;
        let url = session
            .url
            .ok_or_else(|| GatewayError::InvalidResponse("session has no url".to_string()))?;

        Ok(GatewaySession {
            id: session.id,
            url,
        })
    }
}
