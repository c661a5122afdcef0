//! Order model and related types.

mod commands;
mod model;
mod status;

pub use commands::{CreateOrder, LineItemRequest, MIN_ADDRESS_LEN, ShippingRequest};
pub use model::{CustomerContact, DeliveryType, Order, OrderItem, Product, ShippingDetails};
pub use status::OrderStatus;

use common::ProductId;
use thiserror::Error;

/// Errors raised by order validation and the status state machine.
#[derive(Debug, Error)]
pub enum OrderError {
    /// A required field is missing or blank.
    #[error("{0} is required")]
    MissingField(&'static str),

    /// The customer email is not a valid address.
    #[error("Invalid customer email: {0}")]
    InvalidEmail(String),

    /// Home delivery address is too short to be deliverable.
    #[error("Shipping address must have at least {min} characters for home delivery")]
    AddressTooShort { min: usize },

    /// Branch pickup without a branch.
    #[error("Pickup branch is required for branch pickup")]
    PickupBranchRequired,

    /// Order has no items.
    #[error("Order has no items")]
    NoItems,

    /// Invalid quantity.
    #[error("Invalid quantity {quantity} for product {product_id} (must be greater than 0)")]
    InvalidQuantity {
        product_id: ProductId,
        quantity: u32,
    },

    /// The requested status is not one of the known statuses.
    #[error("Unknown order status: {0:?}")]
    UnknownStatus(String),

    /// The requested transition is not in the allowed edge set.
    #[error("Invalid status transition: cannot move from {from} to {to}")]
    InvalidStatusTransition { from: OrderStatus, to: OrderStatus },
}

impl OrderError {
    /// Returns true for malformed-input errors, as opposed to state errors.
    pub fn is_validation(&self) -> bool {
        !matches!(self, OrderError::InvalidStatusTransition { .. })
    }
}
