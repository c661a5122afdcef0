//! Order fulfillment services.
//!
//! This crate coordinates everything that happens around an order:
//! 1. Placing it (validation, pricing, stock decrements, persistence)
//! 2. Opening a payment checkout session for it
//! 3. Obtaining a courier shipping label in the background
//!
//! Steps 2 and 3 talk to external providers through the traits in
//! [`services`]. Only step 1 is all-or-nothing.

pub mod checkout;
pub mod courier;
pub mod error;
pub mod orders;
pub mod pricing;
pub mod services;

pub use checkout::{CheckoutInitiator, CheckoutSession, CheckoutUrls};
pub use courier::{CourierOrchestrator, CourierWorker, JobOutcome, RetryPolicy, WorkerConfig};
pub use error::{FulfillmentError, Result};
pub use orders::OrderService;
pub use pricing::PricedItems;
pub use services::{
    CheckoutLine, CheckoutRequest, CourierError, CourierService, GatewayError, GatewaySession,
    GuideRequest, GuideResponse, InMemoryCourierService, InMemoryPaymentGateway,
    PaymentGateway, SenderDetails, StripeGateway, WebhookCourierService,
};
