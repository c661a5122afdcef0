//! Domain layer for order fulfillment.
//!
//! This crate provides:
//! - the order record with its immutable item snapshots
//! - the order status state machine
//! - shipping classification of free-text destinations
//! - input validation for order creation

pub mod order;
pub mod shipping;

pub use common::{Money, OrderId, ProductId, UserId};
pub use order::{
    CreateOrder, CustomerContact, DeliveryType, LineItemRequest, Order, OrderError, OrderItem,
    OrderStatus, Product, ShippingDetails, ShippingRequest,
};
pub use shipping::{
    DeliveryMethod, ShippingClassification, ShippingClassifier, ShippingRules,
    normalize_destination,
};
