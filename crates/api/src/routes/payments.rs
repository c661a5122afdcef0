//! Checkout session endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use order_store::OrderStore;
use serde::{Deserialize, Serialize};

use super::orders::parse_order_id;
use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct CheckoutSessionRequest {
    pub order_id: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutSessionResponse {
    pub order_id: String,
    pub session_id: String,
    pub checkout_url: String,
}

/// POST /payments/checkout-session: open (or reopen) checkout for a pending order.
#[tracing::instrument(skip(state, payload))]
pub async fn checkout_session<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<CheckoutSessionRequest>, JsonRejection>,
) -> Result<Json<CheckoutSessionResponse>, ApiError> {
    let Json(req) = payload?;
    let order_id = parse_order_id(&req.order_id)?;

    let session = state.checkout.start_checkout(order_id).await?;

    Ok(Json(CheckoutSessionResponse {
        order_id: session.order_id.to_string(),
        session_id: session.session_id,
        checkout_url: session.url,
    }))
}
