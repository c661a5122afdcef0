//! Order placement and lifecycle.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::{OrderId, UserId};
use domain::{CreateOrder, Order, OrderError, OrderStatus, ShippingClassification, ShippingClassifier};
use order_store::{OrderStats, OrderStore};
use tokio::sync::Notify;

use crate::error::{FulfillmentError, Result};
use crate::pricing;

/// Application service for placing orders and moving them through their
/// lifecycle.
///
/// Placement is all-or-nothing: validation, stock decrements, the order
/// rows and the courier outbox job are committed in one store transaction.
pub struct OrderService<S: OrderStore> {
    store: S,
    classifier: Arc<ShippingClassifier>,
    courier_notify: Option<Arc<Notify>>,
}

impl<S: OrderStore> OrderService<S> {
    /// Creates a new order service.
    pub fn new(store: S, classifier: Arc<ShippingClassifier>) -> Self {
        Self {
            store,
            classifier,
            courier_notify: None,
        }
    }

    /// Wakes the courier worker whenever an order needing a label commits.
    pub fn with_courier_notify(mut self, notify: Arc<Notify>) -> Self {
        self.courier_notify = Some(notify);
        self
    }

    /// Returns the shared shipping classifier.
    pub fn classifier(&self) -> &ShippingClassifier {
        &self.classifier
    }

    /// Places a new order.
    #[tracing::instrument(skip(self, cmd), fields(items = cmd.items.len()))]
    pub async fn create_order(&self, cmd: CreateOrder) -> Result<Order> {
        let start = Instant::now();
        let result = self.place(&cmd).await;
        metrics::histogram!("order_creation_duration_seconds")
            .record(start.elapsed().as_secs_f64());

        match &result {
            Ok(order) => {
                metrics::counter!("orders_created_total").increment(1);
                tracing::info!(
                    order_id = %order.id,
                    total = %order.total,
                    requires_courier = order.shipping.requires_courier,
                    "order created"
                );
            }
            Err(err) => {
                metrics::counter!("order_creation_failures_total", "reason" => err.kind())
                    .increment(1);
                tracing::warn!(reason = err.kind(), error = %err, "order creation failed");
            }
        }

        result
    }

    async fn place(&self, cmd: &CreateOrder) -> Result<Order> {
        cmd.validate()?;
        let classification = self.classifier.classify(&cmd.shipping.municipality);

        let mut tx = self.store.begin().await?;
        let priced = pricing::price_items(tx.as_mut(), &cmd.items).await?;
        let order = Order::pending(cmd, &classification, priced.items);

        tx.insert_order(&order).await?;
        if order.shipping.requires_courier {
            tx.enqueue_courier_job(order.id, Utc::now()).await?;
        }
        tx.commit().await?;

        if order.shipping.requires_courier
            && let Some(notify) = &self.courier_notify
        {
            notify.notify_one();
        }

        Ok(order)
    }

    /// Loads an order with its items.
    #[tracing::instrument(skip(self))]
    pub async fn get_order(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or(FulfillmentError::OrderNotFound(order_id))
    }

    /// Lists a customer's orders, newest first.
    #[tracing::instrument(skip(self))]
    pub async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        Ok(self.store.list_orders_for_user(user_id).await?)
    }

    /// Moves an order to `target` if the state machine allows it.
    ///
    /// The write is conditional on the status the move was validated
    /// against; a concurrent change yields `StatusConflict`.
    #[tracing::instrument(skip(self))]
    pub async fn update_status(&self, order_id: OrderId, target: OrderStatus) -> Result<Order> {
        let order = self.get_order(order_id).await?;
        let next = order.status.transition_to(target)?;
        let updated = self.store.update_status(order_id, order.status, next).await?;

        tracing::info!(%order_id, from = %order.status, to = %next, "order status updated");
        Ok(updated)
    }

    /// Classifies a destination before checkout.
    pub fn estimate_shipping(&self, destination: &str) -> Result<ShippingClassification> {
        if destination.trim().is_empty() {
            return Err(OrderError::MissingField("destination").into());
        }
        Ok(self.classifier.classify(destination))
    }

    /// Counts orders per status.
    #[tracing::instrument(skip(self))]
    pub async fn order_stats(&self) -> Result<OrderStats> {
        Ok(self.store.order_stats().await?)
    }
}

#[cfg(test)]
mod tests {
    use domain::{
        CustomerContact, DeliveryMethod, DeliveryType, LineItemRequest, Money, Product, ProductId,
        ShippingRequest,
    };
    use order_store::{CourierJobState, InMemoryOrderStore};

    use super::*;

    async fn service() -> (OrderService<InMemoryOrderStore>, InMemoryOrderStore) {
        let store = InMemoryOrderStore::new();
        store
            .insert_product(Product {
                id: ProductId::new(1),
                name: "Huipil".to_string(),
                price: Money::from_cents(1000),
                stock: 5,
            })
            .await;
        let service = OrderService::new(store.clone(), Arc::new(ShippingClassifier::default()));
        (service, store)
    }

    fn command(municipality: &str, quantity: u32) -> CreateOrder {
        CreateOrder {
            user_id: None,
            customer: CustomerContact {
                name: "Ana".to_string(),
                email: "ana@example.com".to_string(),
                phone: "5555-0000".to_string(),
            },
            shipping: ShippingRequest {
                address: "3a Calle 4-20 Zona 1".to_string(),
                municipality: municipality.to_string(),
                department: None,
                delivery_type: DeliveryType::HomeDelivery,
                pickup_branch: None,
                notes: None,
            },
            items: vec![LineItemRequest::new(ProductId::new(1), quantity)],
        }
    }

    #[tokio::test]
    async fn test_local_order_has_no_courier_job() {
        let (service, store) = service().await;

        let order = service.create_order(command("Chiantla", 1)).await.unwrap();

        assert_eq!(order.shipping.method, DeliveryMethod::LocalDelivery);
        assert!(store.get_courier_job(order.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_national_order_enqueues_courier_job_and_notifies() {
        let (service, store) = service().await;
        let notify = Arc::new(Notify::new());
        let service = service.with_courier_notify(notify.clone());

        let order = service.create_order(command("Cobán", 1)).await.unwrap();

        let job = store.get_courier_job(order.id).await.unwrap().unwrap();
        assert_eq!(job.state, CourierJobState::Pending);
        // notify_one stores a permit, so this returns immediately.
        notify.notified().await;
    }

    #[tokio::test]
    async fn test_validation_never_touches_stock() {
        let (service, store) = service().await;

        let result = service.create_order(command("Cobán", 0)).await;

        assert!(matches!(result, Err(FulfillmentError::Validation(_))));
        assert_eq!(store.product_stock(ProductId::new(1)).await, Some(5));
    }

    #[tokio::test]
    async fn test_illegal_transition_is_invalid_state() {
        let (service, _) = service().await;
        let order = service.create_order(command("Cobán", 1)).await.unwrap();

        let result = service.update_status(order.id, OrderStatus::Shipped).await;
        assert!(matches!(result, Err(FulfillmentError::InvalidState(_))));

        let result = service.update_status(order.id, OrderStatus::Pending).await;
        assert!(matches!(result, Err(FulfillmentError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_estimate_rejects_empty_destination() {
        let (service, _) = service().await;

        assert!(matches!(
            service.estimate_shipping("   "),
            Err(FulfillmentError::Validation(OrderError::MissingField(_)))
        ));
        let estimate = service.estimate_shipping("HUEHUETENANGO").unwrap();
        assert!(estimate.is_local_zone);
    }
}
