//! API error types with HTTP response mapping.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fulfillment::FulfillmentError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed path, query or body.
    BadRequest(String),
    /// Error from the order services.
    Fulfillment(FulfillmentError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Fulfillment(err) => fulfillment_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn fulfillment_error_to_response(err: FulfillmentError) -> (StatusCode, String) {
    match &err {
        FulfillmentError::Validation(_) | FulfillmentError::InvalidState(_) => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        FulfillmentError::ProductNotFound(_) | FulfillmentError::OrderNotFound(_) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        FulfillmentError::InsufficientStock { .. } | FulfillmentError::StatusConflict { .. } => {
            (StatusCode::CONFLICT, err.to_string())
        }
        FulfillmentError::Dependency(_) => (StatusCode::BAD_GATEWAY, err.to_string()),
        FulfillmentError::Store(_) => {
            tracing::error!(error = %err, "datastore failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal datastore error".to_string(),
            )
        }
    }
}

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        ApiError::Fulfillment(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use common::OrderId;
    use domain::{OrderError, OrderStatus, ProductId};
    use order_store::StoreError;

    use super::*;

    fn status_of(err: FulfillmentError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_status_codes() {
        let id = OrderId::new();
        assert_eq!(
            status_of(OrderError::NoItems.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(FulfillmentError::ProductNotFound(ProductId::new(7))),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(FulfillmentError::OrderNotFound(id)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(FulfillmentError::InsufficientStock {
                product_id: ProductId::new(7),
                requested: 2,
                available: 1,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(FulfillmentError::StatusConflict {
                order_id: id,
                expected: OrderStatus::Pending,
                actual: OrderStatus::Cancelled,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(FulfillmentError::InvalidState("not pending".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(FulfillmentError::Dependency("gateway down".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(FulfillmentError::Store(StoreError::Unavailable("down".into()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
