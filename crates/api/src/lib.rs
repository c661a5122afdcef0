//! HTTP API server for order placement, checkout and courier fulfillment.
//!
//! Provides REST endpoints for orders, checkout sessions and shipping
//! estimates, with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use domain::ShippingClassifier;
use fulfillment::{CheckoutInitiator, CheckoutUrls, OrderService, PaymentGateway};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderStore;
use tokio::sync::Notify;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S: OrderStore> {
    pub orders: OrderService<S>,
    pub checkout: CheckoutInitiator<S>,
}

impl<S: OrderStore + Clone> AppState<S> {
    /// Wires the services over one store handle.
    ///
    /// `courier_notify` is the nudge shared with the courier worker.
    pub fn new(
        store: S,
        classifier: Arc<ShippingClassifier>,
        gateway: Arc<dyn PaymentGateway>,
        urls: CheckoutUrls,
        courier_notify: Arc<Notify>,
    ) -> Self {
        Self {
            orders: OrderService::new(store.clone(), classifier).with_courier_notify(courier_notify),
            checkout: CheckoutInitiator::new(store, gateway, urls),
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: OrderStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::system::health))
        .route(
            "/orders",
            post(routes::orders::create::<S>).get(routes::orders::list::<S>),
        )
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/status", put(routes::orders::update_status::<S>))
        .route(
            "/payments/checkout-session",
            post(routes::payments::checkout_session::<S>),
        )
        .route("/shipping/estimate", post(routes::shipping::estimate::<S>))
        .route("/admin/orders/stats", get(routes::admin::stats::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
