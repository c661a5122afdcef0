//! Order placement against PostgreSQL row locks.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p fulfillment --test postgres_placement
//! ```

use std::sync::Arc;

use domain::{
    CreateOrder, CustomerContact, DeliveryType, LineItemRequest, Money, Product, ProductId,
    ShippingClassifier, ShippingRequest,
};
use fulfillment::OrderService;
use order_store::{OrderStore, PostgresOrderStore};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;

async fn start_store() -> (ContainerAsync<Postgres>, PostgresOrderStore) {
    let container = Postgres::default().start().await.unwrap();
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&format!("postgres://postgres:postgres@{host}:{port}/postgres"))
        .await
        .unwrap();
    let store = PostgresOrderStore::new(pool);
    store.run_migrations().await.unwrap();

    for (id, name, cents) in [(1, "Huipil", 1000), (2, "Faja", 500)] {
        store
            .upsert_product(&Product {
                id: ProductId::new(id),
                name: name.to_string(),
                price: Money::from_cents(cents),
                stock: 100,
            })
            .await
            .unwrap();
    }

    (container, store)
}

fn command(lines: &[(i64, u32)]) -> CreateOrder {
    CreateOrder {
        user_id: None,
        customer: CustomerContact {
            name: "Luis García".to_string(),
            email: "luis@example.com".to_string(),
            phone: "5050-2020".to_string(),
        },
        shipping: ShippingRequest {
            address: "5a Avenida 3-15 Zona 1".to_string(),
            municipality: "Chiantla".to_string(),
            department: None,
            delivery_type: DeliveryType::HomeDelivery,
            pickup_branch: None,
            notes: None,
        },
        items: lines
            .iter()
            .map(|&(id, qty)| LineItemRequest::new(ProductId::new(id), qty))
            .collect(),
    }
}

async fn stock_of(store: &PostgresOrderStore, id: i64) -> i64 {
    sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
        .bind(id)
        .fetch_one(store.pool())
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reversed_item_orders_never_deadlock() {
    let (_container, store) = start_store().await;
    let orders = Arc::new(OrderService::new(
        store.clone(),
        Arc::new(ShippingClassifier::default()),
    ));

    let mut handles = Vec::new();
    for round in 0..25 {
        for lines in [[(1, 1), (2, 1)], [(2, 1), (1, 1)]] {
            let orders = orders.clone();
            handles.push(tokio::spawn(async move {
                let order = orders.create_order(command(&lines)).await;
                (round, lines, order)
            }));
        }
    }

    for handle in handles {
        let (round, lines, result) = handle.await.unwrap();
        let order = result.unwrap_or_else(|err| panic!("round {round} {lines:?} failed: {err}"));
        let stored = store.get_order(order.id).await.unwrap().unwrap();
        let placed: Vec<i64> = stored
            .items
            .iter()
            .map(|item| item.product_id.as_i64())
            .collect();
        assert_eq!(placed, vec![lines[0].0, lines[1].0]);
    }

    assert_eq!(stock_of(&store, 1).await, 50);
    assert_eq!(stock_of(&store, 2).await, 50);
}

#[tokio::test]
async fn repeated_product_lines_share_one_decrement() {
    let (_container, store) = start_store().await;
    let orders = OrderService::new(store.clone(), Arc::new(ShippingClassifier::default()));

    let order = orders
        .create_order(command(&[(1, 2), (2, 1), (1, 3)]))
        .await
        .unwrap();

    let stored = store.get_order(order.id).await.unwrap().unwrap();
    let quantities: Vec<u32> = stored.items.iter().map(|item| item.quantity).collect();
    assert_eq!(quantities, vec![2, 1, 3]);
    assert_eq!(stored.subtotal, Money::from_cents(5500));
    assert_eq!(stock_of(&store, 1).await, 95);
    assert_eq!(stock_of(&store, 2).await, 99);
}
