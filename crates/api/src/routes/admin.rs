//! Back-office order statistics.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use order_store::OrderStore;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize)]
pub struct OrderStatsResponse {
    pub total_orders: u64,
    pub pending: u64,
    pub processing: u64,
    pub paid: u64,
    pub shipped: u64,
    pub delivered: u64,
    pub cancelled: u64,
    /// Totals of shipped and delivered orders.
    pub revenue_cents: i64,
}

/// GET /admin/orders/stats
#[tracing::instrument(skip(state))]
pub async fn stats<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<OrderStatsResponse>, ApiError> {
    let stats = state.orders.order_stats().await?;

    Ok(Json(OrderStatsResponse {
        total_orders: stats.total_orders,
        pending: stats.pending,
        processing: stats.processing,
        paid: stats.paid,
        shipped: stats.shipped,
        delivered: stats.delivered,
        cancelled: stats.cancelled,
        revenue_cents: stats.revenue.cents(),
    }))
}
