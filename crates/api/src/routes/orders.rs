//! Order placement, lookup and status endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use domain::{
    CreateOrder, CustomerContact, DeliveryType, LineItemRequest, Order, OrderStatus, ProductId,
    ShippingRequest,
};
use fulfillment::CheckoutSession;
use order_store::OrderStore;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CreateOrderRequest {
    pub user_id: Option<uuid::Uuid>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub shipping_address: String,
    pub shipping_municipality: String,
    pub shipping_department: Option<String>,
    pub delivery_type: Option<DeliveryType>,
    pub pickup_branch: Option<String>,
    pub delivery_notes: Option<String>,
    pub items: Vec<OrderItemRequest>,
}

#[derive(Debug, Deserialize)]
pub struct OrderItemRequest {
    pub product_id: i64,
    pub quantity: u32,
}

impl From<CreateOrderRequest> for CreateOrder {
    fn from(req: CreateOrderRequest) -> Self {
        CreateOrder {
            user_id: req.user_id.map(UserId::from),
            customer: CustomerContact {
                name: req.customer_name,
                email: req.customer_email,
                phone: req.customer_phone,
            },
            shipping: ShippingRequest {
                address: req.shipping_address,
                municipality: req.shipping_municipality,
                department: req.shipping_department,
                delivery_type: req.delivery_type.unwrap_or_default(),
                pickup_branch: req.pickup_branch,
                notes: req.delivery_notes,
            },
            items: req
                .items
                .into_iter()
                .map(|item| LineItemRequest::new(ProductId::new(item.product_id), item.quantity))
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: Option<String>,
    pub status: OrderStatus,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub shipping_address: String,
    pub shipping_municipality: String,
    pub shipping_department: Option<String>,
    pub shipping_method: String,
    pub requires_courier: bool,
    pub delivery_type: DeliveryType,
    pub pickup_branch: Option<String>,
    pub delivery_notes: Option<String>,
    pub subtotal_cents: i64,
    pub shipping_fee_cents: i64,
    pub total_cents: i64,
    pub payment_session_id: Option<String>,
    pub tracking_number: Option<String>,
    pub label_url: Option<String>,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OrderItemResponse {
    pub product_id: i64,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: i64,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        OrderResponse {
            id: order.id.to_string(),
            user_id: order.user_id.map(|id| id.to_string()),
            status: order.status,
            customer_name: order.customer.name,
            customer_email: order.customer.email,
            customer_phone: order.customer.phone,
            shipping_address: order.shipping.address,
            shipping_municipality: order.shipping.municipality,
            shipping_department: order.shipping.department,
            shipping_method: order.shipping.method.as_str().to_string(),
            requires_courier: order.shipping.requires_courier,
            delivery_type: order.shipping.delivery_type,
            pickup_branch: order.shipping.pickup_branch,
            delivery_notes: order.shipping.notes,
            subtotal_cents: order.subtotal.cents(),
            shipping_fee_cents: order.shipping_fee.cents(),
            total_cents: order.total.cents(),
            payment_session_id: order.payment_session_id,
            tracking_number: order.tracking_number,
            label_url: order.label_url,
            items: order
                .items
                .into_iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id.as_i64(),
                    product_name: item.product_name,
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price.cents(),
                })
                .collect(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// A created order with the result of opening its checkout session.
///
/// Checkout runs after the order commits, so its failure is reported here
/// instead of failing the request.
#[derive(Debug, Serialize)]
pub struct OrderCreatedResponse {
    #[serde(flatten)]
    pub order: OrderResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout: Option<CheckoutSession>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_error: Option<String>,
}

// -- Handlers --

/// POST /orders: place an order, then open its checkout session.
#[tracing::instrument(skip(state, payload))]
pub async fn create<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderCreatedResponse>), ApiError> {
    let Json(req) = payload?;
    let order = state.orders.create_order(req.into()).await?;

    let (checkout, checkout_error) = match state.checkout.start_checkout(order.id).await {
        Ok(session) => (Some(session), None),
        Err(err) => {
            tracing::warn!(order_id = %order.id, error = %err, "order created without checkout session");
            (None, Some(err.to_string()))
        }
    };

    // Reload so the response carries the session written by checkout.
    let order = match checkout {
        Some(_) => state.orders.get_order(order.id).await?,
        None => order,
    };

    let response = OrderCreatedResponse {
        order: order.into(),
        checkout,
        checkout_error,
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.orders.get_order(order_id).await?;
    Ok(Json(order.into()))
}

/// GET /orders?owner={user_id}: a customer's orders, newest first.
#[tracing::instrument(skip(state, query))]
pub async fn list<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    query: Result<Query<ListOrdersQuery>, QueryRejection>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let Query(query) = query?;
    let owner = query
        .owner
        .filter(|owner| !owner.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("owner query parameter is required".to_string()))?;
    let user_id: UserId = owner
        .trim()
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid owner: {e}")))?;

    let orders = state.orders.list_orders_for_user(user_id).await?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// PUT /orders/{id}/status
#[tracing::instrument(skip(state, payload))]
pub async fn update_status<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateStatusRequest>, JsonRejection>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let Json(req) = payload?;
    let target: OrderStatus = req
        .status
        .trim()
        .parse()
        .map_err(|e: domain::OrderError| ApiError::BadRequest(e.to_string()))?;

    let order = state.orders.update_status(order_id, target).await?;
    Ok(Json(order.into()))
}

pub(crate) fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    id.trim()
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order id: {e}")))
}
