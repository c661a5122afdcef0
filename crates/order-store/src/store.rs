use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{Money, Order, OrderStatus, Product};

use crate::{OrderId, ProductId, Result, StoreError, UserId};

/// A status move applied together with another write.
///
/// The move only happens if the order is still in `from`; otherwise the
/// status is left untouched and the rest of the write still applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

/// Lifecycle of a courier outbox job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CourierJobState {
    /// Waiting for its next attempt.
    Pending,
    /// Claimed by a worker; re-claimable once its lease expires.
    InFlight,
    /// Label created, or no longer needed.
    Completed,
    /// Gave up; the order keeps empty tracking fields.
    Dead,
}

impl CourierJobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourierJobState::Pending => "pending",
            CourierJobState::InFlight => "in_flight",
            CourierJobState::Completed => "completed",
            CourierJobState::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(CourierJobState::Pending),
            "in_flight" => Ok(CourierJobState::InFlight),
            "completed" => Ok(CourierJobState::Completed),
            "dead" => Ok(CourierJobState::Dead),
            other => Err(StoreError::CorruptRow(format!(
                "unknown courier job state {other:?}"
            ))),
        }
    }
}

impl std::fmt::Display for CourierJobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outbox record asking for a courier label for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourierJob {
    pub order_id: OrderId,
    pub state: CourierJobState,
    /// Number of times the job has been claimed.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate counts for the back office.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderStats {
    pub total_orders: u64,
    pub pending: u64,
    pub processing: u64,
    pub paid: u64,
    pub shipped: u64,
    pub delivered: u64,
    pub cancelled: u64,
    /// Sum of totals of shipped and delivered orders.
    pub revenue: Money,
}

impl OrderStats {
    /// Adds `count` orders of `status` whose totals sum to `total`.
    pub fn record(&mut self, status: OrderStatus, count: u64, total: Money) {
        self.total_orders += count;
        match status {
            OrderStatus::Pending => self.pending += count,
            OrderStatus::Processing => self.processing += count,
            OrderStatus::Paid => self.paid += count,
            OrderStatus::Shipped => self.shipped += count,
            OrderStatus::Delivered => self.delivered += count,
            OrderStatus::Cancelled => self.cancelled += count,
        }
        if matches!(status, OrderStatus::Shipped | OrderStatus::Delivered) {
            self.revenue += total;
        }
    }
}

/// One all-or-nothing unit of work for order creation.
///
/// Dropping the transaction without calling [`commit`](Self::commit) rolls
/// back every write made through it, including stock decrements.
#[async_trait]
pub trait OrderTransaction: Send {
    /// Decrements stock by `quantity` only if at least `quantity` units are
    /// available, as one conditional write evaluated by the store.
    ///
    /// Returns the product as it is after the decrement, carrying the
    /// authoritative name and price to snapshot. Fails with
    /// `ProductNotFound` or `InsufficientStock` without changing anything.
    async fn decrement_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<Product>;

    /// Persists the order header and every item.
    async fn insert_order(&mut self, order: &Order) -> Result<()>;

    /// Enqueues the courier outbox job for an order, due immediately.
    async fn enqueue_courier_job(&mut self, order_id: OrderId, now: DateTime<Utc>) -> Result<()>;

    /// Makes every write visible atomically.
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Core trait for order persistence backends.
///
/// All implementations must be thread-safe (Send + Sync). The store is the
/// single authority for stock; callers never read-then-write stock levels.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Opens a unit of work for order creation.
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>>;

    /// Loads an order with its items.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Lists a customer's orders, newest first.
    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Compare-and-set status write.
    ///
    /// Fails with `StatusConflict` if the order is no longer in `expected`,
    /// and with `OrderNotFound` if it does not exist.
    async fn update_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order>;

    /// Attaches a checkout session if the order has none yet.
    ///
    /// Returns the order as stored afterwards; if another session was
    /// attached first, that one is kept.
    async fn attach_payment_session(
        &self,
        order_id: OrderId,
        session_id: &str,
        session_url: &str,
    ) -> Result<Order>;

    /// Attaches courier tracking data, optionally moving the status.
    async fn attach_courier_label(
        &self,
        order_id: OrderId,
        tracking_number: &str,
        label_url: &str,
        advance: Option<StatusChange>,
    ) -> Result<Order>;

    /// Counts orders per status.
    async fn order_stats(&self) -> Result<OrderStats>;

    /// Claims up to `limit` due courier jobs, leasing each until `lease_until`.
    ///
    /// A job is due when it is pending and its next attempt time has passed,
    /// or when it is in flight and its lease has expired. Claiming bumps the
    /// attempt counter.
    async fn claim_courier_jobs(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CourierJob>>;

    /// Marks a job completed.
    async fn complete_courier_job(&self, order_id: OrderId) -> Result<()>;

    /// Returns a job to pending with a new due time.
    async fn reschedule_courier_job(
        &self,
        order_id: OrderId,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Gives up on a job.
    async fn bury_courier_job(&self, order_id: OrderId, error: &str) -> Result<()>;

    /// Reads a job.
    async fn get_courier_job(&self, order_id: OrderId) -> Result<Option<CourierJob>>;
}
