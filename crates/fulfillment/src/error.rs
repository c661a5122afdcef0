//! Fulfillment error types.

use common::{OrderId, ProductId};
use domain::{OrderError, OrderStatus};
use order_store::StoreError;
use thiserror::Error;

use crate::services::{CourierError, GatewayError};

/// Errors that can occur while placing or advancing an order.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// Malformed input. Raised before the datastore is touched.
    #[error("{0}")]
    Validation(OrderError),

    /// A requested product does not exist.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The order does not exist.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Not enough units left to fill a line.
    #[error("Insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock {
        product_id: ProductId,
        requested: u32,
        available: u32,
    },

    /// Another writer changed the order status first.
    #[error("Order {order_id} changed concurrently: expected {expected}, found {actual}")]
    StatusConflict {
        order_id: OrderId,
        expected: OrderStatus,
        actual: OrderStatus,
    },

    /// The order is not in a state that allows the operation.
    #[error("Invalid order state: {0}")]
    InvalidState(String),

    /// An external provider failed.
    #[error("Dependency failure: {0}")]
    Dependency(String),

    /// The datastore failed.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl FulfillmentError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FulfillmentError::Validation(_) => "validation",
            FulfillmentError::ProductNotFound(_) => "product_not_found",
            FulfillmentError::OrderNotFound(_) => "order_not_found",
            FulfillmentError::InsufficientStock { .. } => "insufficient_stock",
            FulfillmentError::StatusConflict { .. } => "status_conflict",
            FulfillmentError::InvalidState(_) => "invalid_state",
            FulfillmentError::Dependency(_) => "dependency",
            FulfillmentError::Store(_) => "store",
        }
    }
}

impl From<OrderError> for FulfillmentError {
    fn from(err: OrderError) -> Self {
        if err.is_validation() {
            FulfillmentError::Validation(err)
        } else {
            FulfillmentError::InvalidState(err.to_string())
        }
    }
}

impl From<StoreError> for FulfillmentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ProductNotFound(id) => FulfillmentError::ProductNotFound(id),
            StoreError::OrderNotFound(id) => FulfillmentError::OrderNotFound(id),
            StoreError::InsufficientStock {
                product_id,
                requested,
                available,
            } => FulfillmentError::InsufficientStock {
                product_id,
                requested,
                available,
            },
            StoreError::StatusConflict {
                order_id,
                expected,
                actual,
            } => FulfillmentError::StatusConflict {
                order_id,
                expected,
                actual,
            },
            other => FulfillmentError::Store(other),
        }
    }
}

impl From<GatewayError> for FulfillmentError {
    fn from(err: GatewayError) -> Self {
        FulfillmentError::Dependency(err.to_string())
    }
}

impl From<CourierError> for FulfillmentError {
    fn from(err: CourierError) -> Self {
        FulfillmentError::Dependency(err.to_string())
    }
}

/// Convenience type alias for fulfillment results.
pub type Result<T> = std::result::Result<T, FulfillmentError>;
