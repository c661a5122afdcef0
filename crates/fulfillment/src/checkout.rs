//! Payment checkout session initiation.

use std::sync::Arc;

use common::OrderId;
use domain::{Order, OrderStatus};
use order_store::OrderStore;
use serde::Serialize;

use crate::error::{FulfillmentError, Result};
use crate::services::{CheckoutLine, CheckoutRequest, PaymentGateway};

/// Currency charged at checkout.
pub const CHECKOUT_CURRENCY: &str = "gtq";

/// Name of the extra line carrying the shipping fee.
pub const SHIPPING_LINE_NAME: &str = "Shipping";

/// Where the hosted checkout page sends the customer back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutUrls {
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutUrls {
    /// Derives the success and cancel pages from the storefront base URL.
    pub fn from_frontend(frontend_url: &str) -> Self {
        let base = frontend_url.trim_end_matches('/');
        Self {
            success_url: format!("{base}/checkout/success?session_id={{CHECKOUT_SESSION_ID}}"),
            cancel_url: format!("{base}/checkout/cancel"),
        }
    }
}

/// A checkout session attached to an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutSession {
    pub order_id: OrderId,
    pub session_id: String,
    pub url: String,
}

/// Opens payment checkout sessions for unpaid orders.
pub struct CheckoutInitiator<S: OrderStore> {
    store: S,
    gateway: Arc<dyn PaymentGateway>,
    urls: CheckoutUrls,
}

impl<S: OrderStore> CheckoutInitiator<S> {
    /// Creates a new checkout initiator.
    pub fn new(store: S, gateway: Arc<dyn PaymentGateway>, urls: CheckoutUrls) -> Self {
        Self {
            store,
            gateway,
            urls,
        }
    }

    /// Opens (or returns the already open) checkout session of an order.
    ///
    /// An attached session is returned whatever the status. Otherwise the
    /// order must be pending or processing. A gateway failure leaves the
    /// order and its stock decrements untouched.
    #[tracing::instrument(skip(self))]
    pub async fn start_checkout(&self, order_id: OrderId) -> Result<CheckoutSession> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))?;

        if let Some(session) = attached_session(&order) {
            tracing::debug!(%order_id, "reusing existing checkout session");
            return Ok(session);
        }

        // The courier worker may already have moved the order to processing.
        if !matches!(order.status, OrderStatus::Pending | OrderStatus::Processing) {
            return Err(FulfillmentError::InvalidState(format!(
                "checkout requires an unpaid order, order {order_id} is {}",
                order.status
            )));
        }

        let request = self.build_request(&order);
        let created = match self.gateway.create_checkout_session(&request).await {
            Ok(created) => created,
            Err(err) => {
                metrics::counter!("checkout_session_failures_total").increment(1);
                tracing::warn!(%order_id, error = %err, "checkout session creation failed");
                return Err(err.into());
            }
        };

        let stored = self
            .store
            .attach_payment_session(order_id, &created.id, &created.url)
            .await?;
        metrics::counter!("checkout_sessions_created_total").increment(1);
        tracing::info!(%order_id, session_id = %created.id, "checkout session created");

        // A concurrent caller may have attached its session first.
        attached_session(&stored).ok_or_else(|| {
            FulfillmentError::Dependency("checkout session was not persisted".to_string())
        })
    }

    fn build_request(&self, order: &Order) -> CheckoutRequest {
        let mut lines: Vec<CheckoutLine> = order
            .items
            .iter()
            .map(|item| CheckoutLine {
                name: item.product_name.clone(),
                unit_amount: item.unit_price,
                quantity: item.quantity,
            })
            .collect();

        if order.shipping_fee.is_positive() {
            lines.push(CheckoutLine {
                name: SHIPPING_LINE_NAME.to_string(),
                unit_amount: order.shipping_fee,
                quantity: 1,
            });
        }

        CheckoutRequest {
            order_id: order.id,
            currency: CHECKOUT_CURRENCY.to_string(),
            lines,
            customer_email: order.customer.email.clone(),
            success_url: self.urls.success_url.clone(),
            cancel_url: self.urls.cancel_url.clone(),
            metadata: vec![("order_id".to_string(), order.id.to_string())],
        }
    }
}

fn attached_session(order: &Order) -> Option<CheckoutSession> {
    match (&order.payment_session_id, &order.payment_session_url) {
        (Some(id), Some(url)) => Some(CheckoutSession {
            order_id: order.id,
            session_id: id.clone(),
            url: url.clone(),
        }),
        _ => None,
    }
}
