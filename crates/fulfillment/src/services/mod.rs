//! External provider traits with in-memory and HTTP implementations.

pub mod courier;
pub mod payment;

pub use courier::{
    CourierError, CourierService, GuideRequest, GuideResponse, InMemoryCourierService,
    SenderDetails, WebhookCourierService,
};
pub use payment::{
    CheckoutLine, CheckoutRequest, GatewayError, GatewaySession, InMemoryPaymentGateway,
    PaymentGateway, StripeGateway,
};
