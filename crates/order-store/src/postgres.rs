use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    CustomerContact, DeliveryMethod, DeliveryType, Money, Order, OrderItem, OrderStatus, Product,
    ShippingDetails,
};
use sqlx::{
    PgPool, Postgres, Row, Transaction,
    postgres::{PgArguments, PgRow},
};
use uuid::Uuid;

use crate::{
    OrderId, ProductId, Result, StoreError, UserId,
    store::{
        CourierJob, CourierJobState, OrderStats, OrderStore, OrderTransaction, StatusChange,
    },
};

const ORDER_COLUMNS: &str = r#"
    id, user_id, status, customer_name, customer_email, customer_phone,
    shipping_address, shipping_municipality, shipping_department, shipping_method,
    requires_courier, delivery_type, pickup_branch, delivery_notes,
    subtotal, shipping_fee, total, payment_session_id, payment_session_url,
    tracking_number, label_url, created_at, updated_at
"#;

const COURIER_JOB_COLUMNS: &str =
    "order_id, state, attempts, last_error, next_attempt_at, updated_at";

/// PostgreSQL-backed order store implementation.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Inserts or replaces a catalog product.
    pub async fn upsert_product(&self, product: &Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, price, stock)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE
            SET name = EXCLUDED.name, price = EXCLUDED.price, stock = EXCLUDED.stock,
                updated_at = NOW()
            "#,
        )
        .bind(product.id.as_i64())
        .bind(&product.name)
        .bind(product.price.cents())
        .bind(i64::from(product.stock))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_items(&self, order_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<OrderItem>>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, product_id, product_name_snapshot, quantity,
                   unit_price_snapshot, created_at
            FROM order_items
            WHERE order_id = ANY($1)
            ORDER BY order_id, line_no ASC
            "#,
        )
        .bind(order_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut items: HashMap<Uuid, Vec<OrderItem>> = HashMap::new();
        for row in rows {
            let order_id: Uuid = row.try_get("order_id")?;
            items.entry(order_id).or_default().push(row_to_item(&row)?);
        }
        Ok(items)
    }

    async fn rows_to_orders(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let ids = rows
            .iter()
            .map(|row| row.try_get::<Uuid, _>("id"))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut items = self.load_items(&ids).await?;

        rows.iter()
            .map(|row| {
                let id: Uuid = row.try_get("id")?;
                row_to_order(row, items.remove(&id).unwrap_or_default())
            })
            .collect()
    }

    async fn require_order(&self, order_id: OrderId) -> Result<Order> {
        self.get_order(order_id)
            .await?
            .ok_or(StoreError::OrderNotFound(order_id))
    }

    async fn update_job(
        &self,
        query: sqlx::query::Query<'_, Postgres, PgArguments>,
        order_id: OrderId,
    ) -> Result<()> {
        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order_id));
        }
        Ok(())
    }
}

fn corrupt(what: &str, value: impl std::fmt::Display) -> StoreError {
    StoreError::CorruptRow(format!("{what}: {value}"))
}

fn to_u32(what: &str, value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| corrupt(what, value))
}

fn to_i32(what: &str, value: usize) -> Result<i32> {
    i32::try_from(value).map_err(|_| StoreError::OutOfRange(format!("{what}: {value}")))
}

fn row_to_product(row: &PgRow) -> Result<Product> {
    Ok(Product {
        id: ProductId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        price: Money::from_cents(row.try_get("price")?),
        stock: to_u32("stock", row.try_get("stock")?)?,
    })
}

fn row_to_item(row: &PgRow) -> Result<OrderItem> {
    Ok(OrderItem {
        id: row.try_get("id")?,
        product_id: ProductId::new(row.try_get("product_id")?),
        product_name: row.try_get("product_name_snapshot")?,
        quantity: to_u32("quantity", row.try_get("quantity")?)?,
        unit_price: Money::from_cents(row.try_get("unit_price_snapshot")?),
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_order(row: &PgRow, items: Vec<OrderItem>) -> Result<Order> {
    let status: String = row.try_get("status")?;
    let method: String = row.try_get("shipping_method")?;
    let delivery_type: String = row.try_get("delivery_type")?;

    Ok(Order {
        id: OrderId::from_uuid(row.try_get("id")?),
        user_id: row.try_get::<Option<Uuid>, _>("user_id")?.map(UserId::from_uuid),
        status: status
            .parse::<OrderStatus>()
            .map_err(|_| corrupt("status", &status))?,
        customer: CustomerContact {
            name: row.try_get("customer_name")?,
            email: row.try_get("customer_email")?,
            phone: row.try_get("customer_phone")?,
        },
        shipping: ShippingDetails {
            address: row.try_get("shipping_address")?,
            municipality: row.try_get("shipping_municipality")?,
            department: row.try_get("shipping_department")?,
            delivery_type: DeliveryType::parse(&delivery_type)
                .ok_or_else(|| corrupt("delivery_type", &delivery_type))?,
            pickup_branch: row.try_get("pickup_branch")?,
            notes: row.try_get("delivery_notes")?,
            method: DeliveryMethod::parse(&method)
                .ok_or_else(|| corrupt("shipping_method", &method))?,
            requires_courier: row.try_get("requires_courier")?,
        },
        subtotal: Money::from_cents(row.try_get("subtotal")?),
        shipping_fee: Money::from_cents(row.try_get("shipping_fee")?),
        total: Money::from_cents(row.try_get("total")?),
        payment_session_id: row.try_get("payment_session_id")?,
        payment_session_url: row.try_get("payment_session_url")?,
        tracking_number: row.try_get("tracking_number")?,
        label_url: row.try_get("label_url")?,
        items,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_job(row: &PgRow) -> Result<CourierJob> {
    let state: String = row.try_get("state")?;
    Ok(CourierJob {
        order_id: OrderId::from_uuid(row.try_get("order_id")?),
        state: CourierJobState::parse(&state)?,
        attempts: to_u32("attempts", i64::from(row.try_get::<i32, _>("attempts")?))?,
        last_error: row.try_get("last_error")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// A database transaction; rolled back by sqlx when dropped uncommitted.
struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl OrderTransaction for PostgresTransaction {
    async fn decrement_stock(&mut self, product_id: ProductId, quantity: u32) -> Result<Product> {
        let row = sqlx::query(
            r#"
            UPDATE products
            SET stock = stock - $2, updated_at = NOW()
            WHERE id = $1 AND stock >= $2
            RETURNING id, name, price, stock
            "#,
        )
        .bind(product_id.as_i64())
        .bind(i64::from(quantity))
        .fetch_optional(&mut *self.tx)
        .await?;

        if let Some(row) = row {
            return row_to_product(&row);
        }

        let available: Option<i64> = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
            .bind(product_id.as_i64())
            .fetch_optional(&mut *self.tx)
            .await?;

        match available {
            None => Err(StoreError::ProductNotFound(product_id)),
            Some(available) => Err(StoreError::InsufficientStock {
                product_id,
                requested: quantity,
                available: to_u32("stock", available)?,
            }),
        }
    }

    async fn insert_order(&mut self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, user_id, status, customer_name, customer_email, customer_phone,
                shipping_address, shipping_municipality, shipping_department, shipping_method,
                requires_courier, delivery_type, pickup_branch, delivery_notes,
                subtotal, shipping_fee, total, payment_session_id, payment_session_url,
                tracking_number, label_url, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21, $22, $23)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.map(|u| u.as_uuid()))
        .bind(order.status.as_str())
        .bind(&order.customer.name)
        .bind(&order.customer.email)
        .bind(&order.customer.phone)
        .bind(&order.shipping.address)
        .bind(&order.shipping.municipality)
        .bind(&order.shipping.department)
        .bind(order.shipping.method.as_str())
        .bind(order.shipping.requires_courier)
        .bind(order.shipping.delivery_type.as_str())
        .bind(&order.shipping.pickup_branch)
        .bind(&order.shipping.notes)
        .bind(order.subtotal.cents())
        .bind(order.shipping_fee.cents())
        .bind(order.total.cents())
        .bind(&order.payment_session_id)
        .bind(&order.payment_session_url)
        .bind(&order.tracking_number)
        .bind(&order.label_url)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;

        for (line_no, item) in order.items.iter().enumerate() {
            let line_no = to_i32("line_no", line_no)?;
            sqlx::query(
                r#"
                INSERT INTO order_items (
                    id, order_id, line_no, product_id, product_name_snapshot,
                    quantity, unit_price_snapshot, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(item.id)
            .bind(order.id.as_uuid())
            .bind(line_no)
            .bind(item.product_id.as_i64())
            .bind(&item.product_name)
            .bind(i64::from(item.quantity))
            .bind(item.unit_price.cents())
            .bind(item.created_at)
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn enqueue_courier_job(&mut self, order_id: OrderId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO courier_jobs (order_id, state, attempts, next_attempt_at, updated_at)
            VALUES ($1, 'pending', 0, $2, $2)
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let rows = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(order_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;

        Ok(self.rows_to_orders(rows).await?.pop())
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 ORDER BY created_at DESC, id"
        ))
        .bind(user_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        self.rows_to_orders(rows).await
    }

    async fn update_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order> {
        let result = sqlx::query(
            r#"
            UPDATE orders SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(expected.as_str())
        .bind(next.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let actual: Option<String> =
                sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
                    .bind(order_id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await?;

            return match actual {
                None => Err(StoreError::OrderNotFound(order_id)),
                Some(actual) => Err(StoreError::StatusConflict {
                    order_id,
                    expected,
                    actual: actual
                        .parse::<OrderStatus>()
                        .map_err(|_| corrupt("status", &actual))?,
                }),
            };
        }

        self.require_order(order_id).await
    }

    async fn attach_payment_session(
        &self,
        order_id: OrderId,
        session_id: &str,
        session_url: &str,
    ) -> Result<Order> {
        sqlx::query(
            r#"
            UPDATE orders
            SET payment_session_id = $2, payment_session_url = $3, updated_at = NOW()
            WHERE id = $1 AND payment_session_id IS NULL
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(session_id)
        .bind(session_url)
        .execute(&self.pool)
        .await?;

        self.require_order(order_id).await
    }

    async fn attach_courier_label(
        &self,
        order_id: OrderId,
        tracking_number: &str,
        label_url: &str,
        advance: Option<StatusChange>,
    ) -> Result<Order> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET tracking_number = $2,
                label_url = $3,
                status = CASE WHEN status = $4 THEN $5 ELSE status END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(tracking_number)
        .bind(label_url)
        .bind(advance.map(|c| c.from.as_str()))
        .bind(advance.map(|c| c.to.as_str()))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::OrderNotFound(order_id));
        }

        self.require_order(order_id).await
    }

    async fn order_stats(&self) -> Result<OrderStats> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count, COALESCE(SUM(total), 0)::BIGINT AS total
            FROM orders
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = OrderStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let status = status
                .parse::<OrderStatus>()
                .map_err(|_| corrupt("status", &status))?;
            let count: i64 = row.try_get("count")?;
            stats.record(
                status,
                u64::try_from(count).map_err(|_| corrupt("count", count))?,
                Money::from_cents(row.try_get("total")?),
            );
        }
        Ok(stats)
    }

    async fn claim_courier_jobs(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<CourierJob>> {
        let rows = sqlx::query(&format!(
            r#"
            UPDATE courier_jobs
            SET state = 'in_flight', attempts = attempts + 1,
                next_attempt_at = $2, updated_at = $1
            WHERE order_id IN (
                SELECT order_id FROM courier_jobs
                WHERE state IN ('pending', 'in_flight') AND next_attempt_at <= $1
                ORDER BY next_attempt_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {COURIER_JOB_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(lease_until)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        let jobs = rows.iter().map(row_to_job).collect::<Result<Vec<_>>>()?;
        if !jobs.is_empty() {
            tracing::debug!(claimed = jobs.len(), "claimed courier jobs");
        }
        Ok(jobs)
    }

    async fn complete_courier_job(&self, order_id: OrderId) -> Result<()> {
        self.update_job(
            sqlx::query(
                "UPDATE courier_jobs SET state = 'completed', updated_at = NOW() WHERE order_id = $1",
            )
            .bind(order_id.as_uuid()),
            order_id,
        )
        .await
    }

    async fn reschedule_courier_job(
        &self,
        order_id: OrderId,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        self.update_job(
            sqlx::query(
                r#"
                UPDATE courier_jobs
                SET state = 'pending', last_error = $2, next_attempt_at = $3, updated_at = NOW()
                WHERE order_id = $1
                "#,
            )
            .bind(order_id.as_uuid())
            .bind(error)
            .bind(next_attempt_at),
            order_id,
        )
        .await
    }

    async fn bury_courier_job(&self, order_id: OrderId, error: &str) -> Result<()> {
        self.update_job(
            sqlx::query(
                r#"
                UPDATE courier_jobs
                SET state = 'dead', last_error = $2, updated_at = NOW()
                WHERE order_id = $1
                "#,
            )
            .bind(order_id.as_uuid())
            .bind(error),
            order_id,
        )
        .await
    }

    async fn get_courier_job(&self, order_id: OrderId) -> Result<Option<CourierJob>> {
        let row = sqlx::query(&format!(
            "SELECT {COURIER_JOB_COLUMNS} FROM courier_jobs WHERE order_id = $1"
        ))
        .bind(order_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_job).transpose()
    }
}
