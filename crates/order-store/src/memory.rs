use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Order, OrderStatus, Product};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::{
    OrderId, ProductId, Result, StoreError, UserId,
    store::{
        CourierJob, CourierJobState, OrderStats, OrderStore, OrderTransaction, StatusChange,
    },
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    products: HashMap<ProductId, Product>,
    orders: HashMap<OrderId, Order>,
    courier_jobs: HashMap<OrderId, CourierJob>,
    fail_on_commit: bool,
}

/// In-memory order store implementation for testing and local development.
///
/// Transactions hold the write lock for their whole lifetime and work on a
/// staged copy of the state, so they are serialized and a dropped
/// transaction leaves nothing behind.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a catalog product.
    pub async fn insert_product(&self, product: Product) {
        self.state
            .write()
            .await
            .products
            .insert(product.id, product);
    }

    /// Returns the current stock of a product.
    pub async fn product_stock(&self, product_id: ProductId) -> Option<u32> {
        self.state
            .read()
            .await
            .products
            .get(&product_id)
            .map(|p| p.stock)
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Makes every following commit fail, as a datastore outage would.
    pub async fn set_fail_on_commit(&self, fail: bool) {
        self.state.write().await.fail_on_commit = fail;
    }

    /// Clears all products, orders and jobs.
    pub async fn clear(&self) {
        *self.state.write().await = MemoryState::default();
    }

    async fn modify_order<F>(&self, order_id: OrderId, f: F) -> Result<Order>
    where
        F: FnOnce(&mut Order) -> Result<()> + Send,
    {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        f(order)?;
        Ok(order.clone())
    }

    async fn modify_job<F>(&self, order_id: OrderId, f: F) -> Result<()>
    where
        F: FnOnce(&mut CourierJob) + Send,
    {
        let mut state = self.state.write().await;
        let job = state
            .courier_jobs
            .get_mut(&order_id)
            .ok_or(StoreError::OrderNotFound(order_id))?;
        f(job);
        job.updated_at = Utc::now();
        Ok(())
    }
}

struct InMemoryTransaction {
    guard: OwnedRwLockWriteGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl OrderTransaction for InMemoryTransaction {
    async fn decrement_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<Product> {
        let product = self
            .staged
            .products
            .get_mut(&product_id)
            .ok_or(StoreError::ProductNotFound(product_id))?;

        if product.stock < quantity {
            return Err(StoreError::InsufficientStock {
                product_id,
                requested: quantity,
                available: product.stock,
            });
        }

        product.stock -= quantity;
        Ok(product.clone())
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        if self.staged.orders.contains_key(&order.id) {
            return Err(StoreError::Unavailable(format!(
                "order {} already exists",
                order.id
            )));
        }
        self.staged.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn enqueue_courier_job(&mut self, order_id: OrderId, now: DateTime<Utc>) -> Result<()> {
        self.staged.courier_jobs.insert(
            order_id,
            CourierJob {
                order_id,
                state: CourierJobState::Pending,
                attempts: 0,
                last_error: None,
                next_attempt_at: now,
                updated_at: now,
            },
        );
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryTransaction { mut guard, staged } = *self;
        if guard.fail_on_commit {
            return Err(StoreError::Unavailable("commit refused".to_string()));
        }
        *guard = staged;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>> {
        let guard = self.state.clone().write_owned().await;
        let staged = MemoryState::clone(&guard);
        Ok(Box::new(InMemoryTransaction { guard, staged }))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|o| o.user_id == Some(user_id))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order> {
        self.modify_order(order_id, |order| {
            if order.status != expected {
                return Err(StoreError::StatusConflict {
                    order_id,
                    expected,
                    actual: order.status,
                });
            }
            order.status = next;
            order.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn attach_payment_session(
        &self,
        order_id: OrderId,
        session_id: &str,
        session_url: &str,
    ) -> Result<Order> {
        self.modify_order(order_id, |order| {
            if order.payment_session_id.is_none() {
                order.payment_session_id = Some(session_id.to_string());
                order.payment_session_url = Some(session_url.to_string());
                order.updated_at = Utc::now();
            }
            Ok(())
        })
        .await
    }

    async fn attach_courier_label(
        &self,
        order_id: OrderId,
        tracking_number: &str,
        label_url: &str,
        advance: Option<StatusChange>,
    ) -> Result<Order> {
        self.modify_order(order_id, |order| {
            order.tracking_number = Some(tracking_number.to_string());
            order.label_url = Some(label_url.to_string());
            if let Some(change) = advance
                && order.status == change.from
            {
                order.status = change.to;
            }
            order.updated_at = Utc::now();
            Ok(())
        })
        .await
    }

    async fn order_stats(&self) -> Result<OrderStats> {
        let state = self.state.read().await;
        let mut stats = OrderStats::default();
        for order in state.orders.values() {
            stats.record(order.status, 1, order.total);
        }
        Ok(stats)
    }

    async fn claim_courier_jobs(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CourierJob>> {
        let mut state = self.state.write().await;
        let mut due: Vec<_> = state
            .courier_jobs
            .values_mut()
            .filter(|job| {
                matches!(job.state, CourierJobState::Pending | CourierJobState::InFlight)
                    && job.next_attempt_at <= now
            })
            .collect();
        due.sort_by_key(|job| job.next_attempt_at);

        Ok(due
            .into_iter()
            .take(limit)
            .map(|job| {
                job.state = CourierJobState::InFlight;
                job.attempts += 1;
                job.next_attempt_at = lease_until;
                job.updated_at = now;
                job.clone()
            })
            .collect())
    }

    async fn complete_courier_job(&self, order_id: OrderId) -> Result<()> {
        self.modify_job(order_id, |job| {
            job.state = CourierJobState::Completed;
        })
        .await
    }

    async fn reschedule_courier_job(
        &self,
        order_id: OrderId,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        self.modify_job(order_id, |job| {
            job.state = CourierJobState::Pending;
            job.last_error = Some(error.to_string());
            job.next_attempt_at = next_attempt_at;
        })
        .await
    }

    async fn bury_courier_job(&self, order_id: OrderId, error: &str) -> Result<()> {
        self.modify_job(order_id, |job| {
            job.state = CourierJobState::Dead;
            job.last_error = Some(error.to_string());
        })
        .await
    }

    async fn get_courier_job(&self, order_id: OrderId) -> Result<Option<CourierJob>> {
        Ok(self.state.read().await.courier_jobs.get(&order_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use domain::{
        CreateOrder, CustomerContact, DeliveryType, LineItemRequest, Money, OrderItem,
        ShippingClassifier, ShippingRequest,
    };

    use super::*;

    fn product(id: i64, stock: u32) -> Product {
        Product {
            id: ProductId::new(id),
            name: format!("Product {id}"),
            price: Money::from_cents(1000),
            stock,
        }
    }

    fn order_for(user_id: Option<UserId>, items: Vec<OrderItem>) -> Order {
        let cmd = CreateOrder {
            user_id,
            customer: CustomerContact {
                name: "Ana".to_string(),
                email: "ana@example.com".to_string(),
                phone: "5555-0000".to_string(),
            },
            shipping: ShippingRequest {
                address: "3a Calle 4-20 Zona 1".to_string(),
                municipality: "Cobán".to_string(),
                department: Some("Alta Verapaz".to_string()),
                delivery_type: DeliveryType::HomeDelivery,
                pickup_branch: None,
                notes: None,
            },
            items: vec![LineItemRequest::new(ProductId::new(1), 1)],
        };
        let classification = ShippingClassifier::default().classify(&cmd.shipping.municipality);
        Order::pending(&cmd, &classification, items)
    }

    async fn store_with_order() -> (InMemoryOrderStore, Order) {
        let store = InMemoryOrderStore::new();
        store.insert_product(product(1, 3)).await;

        let mut tx = store.begin().await.unwrap();
        let snapshot = tx.decrement_stock(ProductId::new(1), 1).await.unwrap();
        let order = order_for(None, vec![OrderItem::snapshot(&snapshot, 1)]);
        tx.insert_order(&order).await.unwrap();
        tx.enqueue_courier_job(order.id, Utc::now()).await.unwrap();
        tx.commit().await.unwrap();

        (store, order)
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let (store, order) = store_with_order().await;

        assert_eq!(store.product_stock(ProductId::new(1)).await, Some(2));
        assert_eq!(store.get_order(order.id).await.unwrap(), Some(order.clone()));
        let job = store.get_courier_job(order.id).await.unwrap().unwrap();
        assert_eq!(job.state, CourierJobState::Pending);
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = InMemoryOrderStore::new();
        store.insert_product(product(1, 3)).await;

        {
            let mut tx = store.begin().await.unwrap();
            tx.decrement_stock(ProductId::new(1), 2).await.unwrap();
        }

        assert_eq!(store.product_stock(ProductId::new(1)).await, Some(3));
    }

    #[tokio::test]
    async fn test_decrement_rejects_insufficient_stock() {
        let store = InMemoryOrderStore::new();
        store.insert_product(product(1, 1)).await;

        let mut tx = store.begin().await.unwrap();
        let result = tx.decrement_stock(ProductId::new(1), 2).await;
        assert!(matches!(
            result,
            Err(StoreError::InsufficientStock {
                requested: 2,
                available: 1,
                ..
            })
        ));

        let result = tx.decrement_stock(ProductId::new(9), 1).await;
        assert!(matches!(result, Err(StoreError::ProductNotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_state_untouched() {
        let store = InMemoryOrderStore::new();
        store.insert_product(product(1, 3)).await;
        store.set_fail_on_commit(true).await;

        let mut tx = store.begin().await.unwrap();
        tx.decrement_stock(ProductId::new(1), 1).await.unwrap();
        assert!(tx.commit().await.is_err());

        assert_eq!(store.product_stock(ProductId::new(1)).await, Some(3));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_update_status_is_compare_and_set() {
        let (store, order) = store_with_order().await;

        let updated = store
            .update_status(order.id, OrderStatus::Pending, OrderStatus::Processing)
            .await
            .unwrap();
        assert_eq!(updated.status, OrderStatus::Processing);

        let result = store
            .update_status(order.id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await;
        assert!(matches!(
            result,
            Err(StoreError::StatusConflict {
                actual: OrderStatus::Processing,
                ..
            })
        ));

        let result = store
            .update_status(OrderId::new(), OrderStatus::Pending, OrderStatus::Cancelled)
            .await;
        assert!(matches!(result, Err(StoreError::OrderNotFound(_))));
    }

    #[tokio::test]
    async fn test_payment_session_is_attached_once() {
        let (store, order) = store_with_order().await;

        store
            .attach_payment_session(order.id, "cs_1", "https://pay/1")
            .await
            .unwrap();
        let stored = store
            .attach_payment_session(order.id, "cs_2", "https://pay/2")
            .await
            .unwrap();

        assert_eq!(stored.payment_session_id.as_deref(), Some("cs_1"));
        assert_eq!(stored.payment_session_url.as_deref(), Some("https://pay/1"));
    }

    #[tokio::test]
    async fn test_courier_label_advances_only_from_expected_status() {
        let (store, order) = store_with_order().await;
        store
            .update_status(order.id, OrderStatus::Pending, OrderStatus::Cancelled)
            .await
            .unwrap();

        let change = StatusChange {
            from: OrderStatus::Pending,
            to: OrderStatus::Processing,
        };
        let stored = store
            .attach_courier_label(order.id, "CE-1", "https://label/1", Some(change))
            .await
            .unwrap();

        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert_eq!(stored.tracking_number.as_deref(), Some("CE-1"));
    }

    #[tokio::test]
    async fn test_claim_leases_jobs_until_expiry() {
        let (store, order) = store_with_order().await;
        let now = Utc::now();
        let lease_until = now + Duration::seconds(30);

        let claimed = store.claim_courier_jobs(now, lease_until, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 1);
        assert_eq!(claimed[0].state, CourierJobState::InFlight);

        // Leased jobs are invisible until the lease runs out.
        assert!(store.claim_courier_jobs(now, lease_until, 10).await.unwrap().is_empty());

        let reclaimed = store
            .claim_courier_jobs(lease_until, lease_until + Duration::seconds(30), 10)
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].attempts, 2);

        store.complete_courier_job(order.id).await.unwrap();
        let job = store.get_courier_job(order.id).await.unwrap().unwrap();
        assert_eq!(job.state, CourierJobState::Completed);
    }

    #[tokio::test]
    async fn test_list_orders_newest_first() {
        let store = InMemoryOrderStore::new();
        let user = UserId::new();

        let mut older = order_for(Some(user), vec![]);
        older.created_at = Utc::now() - Duration::minutes(5);
        let newer = order_for(Some(user), vec![]);
        let other = order_for(Some(UserId::new()), vec![]);

        let mut tx = store.begin().await.unwrap();
        for order in [&older, &newer, &other] {
            tx.insert_order(order).await.unwrap();
        }
        tx.commit().await.unwrap();

        let listed = store.list_orders_for_user(user).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
    }
}
