//! Courier service trait, in-memory implementation and webhook client.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Utc};
use domain::Order;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Package type declared for every shipment.
pub const DEFAULT_PACKAGE_TYPE: &str = "caja_pequena";

/// Declared weight in pounds when nothing better is known.
pub const DEFAULT_WEIGHT_LBS: f64 = 1.0;

/// Errors returned by a courier service.
#[derive(Debug, Error)]
pub enum CourierError {
    /// The request never got a response.
    #[error("courier request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The courier answered with an error status.
    #[error("courier returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The courier processed the request and refused it.
    #[error("courier rejected the shipment: {0}")]
    Rejected(String),

    /// Sender data needed on every guide is missing.
    #[error("courier sender is not configured: missing {0}")]
    SenderNotConfigured(&'static str),

    /// The courier is unavailable.
    #[error("courier unavailable: {0}")]
    Unavailable(String),
}

impl CourierError {
    /// Returns true if the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            CourierError::Request(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            CourierError::Status { status, .. } => {
                StatusCode::from_u16(*status).is_ok_and(|s| {
                    s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error()
                })
            }
            CourierError::Unavailable(_) => true,
            CourierError::Rejected(_) | CourierError::SenderNotConfigured(_) => false,
        }
    }
}

/// The shop's own data, printed as sender on every guide.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderDetails {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
}

impl SenderDetails {
    /// Checks that name, phone and address are present.
    pub fn validate(&self) -> Result<(), CourierError> {
        for (field, value) in [
            ("sender name", &self.name),
            ("sender phone", &self.phone),
            ("sender address", &self.address),
        ] {
            if value.trim().is_empty() {
                return Err(CourierError::SenderNotConfigured(field));
            }
        }
        Ok(())
    }
}

/// Request body for creating a shipping guide.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuideRequest {
    pub sender_name: String,
    pub sender_phone: String,
    pub sender_address: String,
    pub sender_city: String,

    pub recipient_name: String,
    pub recipient_phone: String,
    /// Empty for branch pickup.
    pub recipient_address: String,
    pub recipient_city: String,

    pub order_id: String,
    pub package_type: String,
    pub weight: f64,
    /// Declared value in quetzales.
    pub declared_value: f64,
    pub notes: String,

    pub delivery_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pickup_branch: Option<String>,
}

impl GuideRequest {
    /// Builds the guide request for an order.
    pub fn for_order(order: &Order, sender: &SenderDetails) -> Self {
        Self {
            sender_name: sender.name.clone(),
            sender_phone: sender.phone.clone(),
            sender_address: sender.address.clone(),
            sender_city: sender.city.clone(),
            recipient_name: order.customer.name.clone(),
            recipient_phone: order.customer.phone.clone(),
            recipient_address: order.shipping.address.clone(),
            recipient_city: order.shipping.municipality.clone(),
            order_id: order.id.to_string(),
            package_type: DEFAULT_PACKAGE_TYPE.to_string(),
            weight: DEFAULT_WEIGHT_LBS,
            declared_value: order.total.cents() as f64 / 100.0,
            notes: format!("Order {}", order.id),
            delivery_type: order.shipping.delivery_type.as_str().to_string(),
            pickup_branch: order.shipping.pickup_branch.clone(),
        }
    }
}

/// Response body of a guide creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuideResponse {
    pub success: bool,
    #[serde(default)]
    pub tracking_number: String,
    /// URL of the printable label.
    #[serde(default, rename = "guide_url")]
    pub label_url: String,
    #[serde(default)]
    pub estimated_days: u32,
    #[serde(default)]
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Trait for courier label providers.
#[async_trait]
pub trait CourierService: Send + Sync {
    /// Creates a shipping guide.
    async fn create_guide(&self, request: &GuideRequest) -> Result<GuideResponse, CourierError>;
}

#[derive(Debug, Default)]
struct InMemoryCourierState {
    requests: Vec<GuideRequest>,
    next_sequence: u32,
    fail_on_create: bool,
    reject_with: Option<String>,
}

/// In-memory courier for testing and local development.
///
/// Tracking numbers follow the `CE-{year}-{6 digits}` shape.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCourierService {
    state: Arc<RwLock<InMemoryCourierState>>,
}

impl InMemoryCourierService {
    /// Creates a new in-memory courier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the courier to be unreachable.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.state.write().unwrap().fail_on_create = fail;
    }

    /// Configures the courier to answer `success: false` with a message.
    pub fn set_reject_with(&self, message: Option<&str>) {
        self.state.write().unwrap().reject_with = message.map(str::to_string);
    }

    /// Returns the number of guide requests received.
    pub fn request_count(&self) -> usize {
        self.state.read().unwrap().requests.len()
    }

    /// Returns the most recent guide request.
    pub fn last_request(&self) -> Option<GuideRequest> {
        self.state.read().unwrap().requests.last().cloned()
    }
}

#[async_trait]
impl CourierService for InMemoryCourierService {
    async fn create_guide(&self, request: &GuideRequest) -> Result<GuideResponse, CourierError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_create {
            return Err(CourierError::Unavailable("courier offline".to_string()));
        }

        state.requests.push(request.clone());

        if let Some(message) = &state.reject_with {
            return Ok(GuideResponse {
                success: false,
                error_message: Some(message.clone()),
                ..GuideResponse::default()
            });
        }

        state.next_sequence += 1;
        let tracking_number = format!("CE-{}-{:06}", Utc::now().year(), state.next_sequence);

        Ok(GuideResponse {
            success: true,
            label_url: format!("https://storage.example.com/guides/{tracking_number}.pdf"),
            tracking_number,
            estimated_days: 3,
            cost: 36.0,
            error_message: None,
        })
    }
}

/// Courier integration through an automation webhook.
///
/// The guide request is POSTed as JSON with a bearer token.
pub struct WebhookCourierService {
    client: Client,
    url: String,
    api_key: String,
}

impl WebhookCourierService {
    /// Creates a webhook client with the given request timeout.
    pub fn new(url: &str, api_key: &str, timeout: Duration) -> Result<Self, CourierError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl CourierService for WebhookCourierService {
    async fn create_guide(&self, request: &GuideRequest) -> Result<GuideResponse, CourierError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(CourierError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GuideRequest {
        GuideRequest {
            sender_name: "Tienda".to_string(),
            sender_phone: "7777-0000".to_string(),
            sender_address: "4a Calle 2-10".to_string(),
            sender_city: "Huehuetenango".to_string(),
            recipient_name: "Ana".to_string(),
            recipient_phone: "5555-0000".to_string(),
            recipient_address: "3a Calle 4-20 Zona 1".to_string(),
            recipient_city: "Cobán".to_string(),
            order_id: "order-1".to_string(),
            package_type: DEFAULT_PACKAGE_TYPE.to_string(),
            weight: DEFAULT_WEIGHT_LBS,
            declared_value: 61.0,
            notes: String::new(),
            delivery_type: "home_delivery".to_string(),
            pickup_branch: None,
        }
    }

    #[tokio::test]
    async fn test_tracking_numbers_are_sequential() {
        let courier = InMemoryCourierService::new();
        let year = Utc::now().year();

        let first = courier.create_guide(&request()).await.unwrap();
        let second = courier.create_guide(&request()).await.unwrap();

        assert!(first.success);
        assert_eq!(first.tracking_number, format!("CE-{year}-000001"));
        assert_eq!(second.tracking_number, format!("CE-{year}-000002"));
        assert!(first.label_url.ends_with("000001.pdf"));
        assert_eq!(courier.request_count(), 2);
    }

    #[tokio::test]
    async fn test_rejection_is_reported_in_body() {
        let courier = InMemoryCourierService::new();
        courier.set_reject_with(Some("destino no cubierto"));

        let response = courier.create_guide(&request()).await.unwrap();
        assert!(!response.success);
        assert_eq!(response.error_message.as_deref(), Some("destino no cubierto"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(CourierError::Unavailable("x".into()).is_retryable());
        assert!(
            CourierError::Status {
                status: 503,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            CourierError::Status {
                status: 429,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(
            !CourierError::Status {
                status: 401,
                body: String::new()
            }
            .is_retryable()
        );
        assert!(!CourierError::Rejected("no".into()).is_retryable());
        assert!(!CourierError::SenderNotConfigured("sender name").is_retryable());
    }

    #[test]
    fn test_sender_validation() {
        let mut sender = SenderDetails {
            name: "Tienda".to_string(),
            phone: "7777-0000".to_string(),
            address: "4a Calle 2-10".to_string(),
            city: String::new(),
        };
        assert!(sender.validate().is_ok());

        sender.phone = " ".to_string();
        assert!(matches!(
            sender.validate(),
            Err(CourierError::SenderNotConfigured("sender phone"))
        ));
    }

    #[test]
    fn test_guide_response_uses_wire_names() {
        let response: GuideResponse = serde_json::from_value(serde_json::json!({
            "success": true,
            "tracking_number": "CE-2026-123456",
            "guide_url": "https://labels/CE-2026-123456.pdf",
            "estimated_days": 4,
            "cost": 36.0
        }))
        .unwrap();

        assert_eq!(response.label_url, "https://labels/CE-2026-123456.pdf");
        assert_eq!(response.error_message, None);
    }
}
