//! Pre-checkout shipping estimate.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use order_store::OrderStore;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EstimateRequest {
    #[serde(alias = "municipality")]
    pub destination: String,
}

#[derive(Debug, Serialize)]
pub struct EstimateResponse {
    pub destination: String,
    pub is_local_zone: bool,
    pub shipping_fee_cents: i64,
    pub requires_courier: bool,
    pub shipping_method: String,
}

/// POST /shipping/estimate
///
/// Uses the same classifier as order creation, so the quoted fee is the
/// fee the order will carry.
#[tracing::instrument(skip(state, payload))]
pub async fn estimate<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<EstimateRequest>, JsonRejection>,
) -> Result<Json<EstimateResponse>, ApiError> {
    let Json(req) = payload?;
    let classification = state.orders.estimate_shipping(&req.destination)?;

    Ok(Json(EstimateResponse {
        destination: req.destination,
        is_local_zone: classification.is_local_zone,
        shipping_fee_cents: classification.fee.cents(),
        requires_courier: classification.requires_courier,
        shipping_method: classification.method.as_str().to_string(),
    }))
}
