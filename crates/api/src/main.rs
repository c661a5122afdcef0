//! API server entry point.

use std::sync::Arc;

use api::AppState;
use api::config::Config;
use domain::{Money, Product, ProductId, ShippingClassifier};
use fulfillment::{CheckoutUrls, CourierOrchestrator, CourierWorker, RetryPolicy, WorkerConfig};
use order_store::{InMemoryOrderStore, OrderStore, PostgresOrderStore};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::{Notify, watch};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Products available when running without a database.
fn demo_catalog() -> Vec<Product> {
    [
        (1, "Huipil bordado", 45_000),
        (2, "Faja tejida", 12_500),
        (3, "Morral de lana", 18_000),
        (4, "Servilleta típica", 6_500),
    ]
    .into_iter()
    .map(|(id, name, cents)| Product {
        id: ProductId::new(id),
        name: name.to_string(),
        price: Money::from_cents(cents),
        stock: 10,
    })
    .collect()
}

/// Wires services and the courier worker over `store` and serves until shutdown.
async fn serve<S: OrderStore + Clone + 'static>(
    store: S,
    config: Config,
    metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
) -> Result<(), BoxError> {
    let gateway = config.payment_gateway()?;
    let courier = config.courier_service()?;
    if config.sender.validate().is_err() {
        tracing::warn!("courier sender details incomplete, courier jobs will be dead-lettered");
    }

    let classifier = Arc::new(ShippingClassifier::default());
    let courier_notify = Arc::new(Notify::new());

    let state = Arc::new(AppState::new(
        store.clone(),
        classifier,
        gateway,
        CheckoutUrls::from_frontend(&config.frontend_url),
        courier_notify.clone(),
    ));

    let orchestrator = CourierOrchestrator::new(
        store,
        courier,
        config.sender.clone(),
        RetryPolicy {
            max_attempts: config.courier_max_attempts,
            ..RetryPolicy::default()
        },
    );
    let worker = CourierWorker::new(
        orchestrator,
        courier_notify,
        WorkerConfig {
            poll_interval: config.courier_poll_interval,
            ..WorkerConfig::default()
        },
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = worker.spawn_supervised(shutdown_rx);

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let an in-progress courier call finish before exiting.
    let _ = shutdown_tx.send(true);
    let _ = worker_handle.await;

    tracing::info!("server shut down gracefully");
    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!("orders_created_total", "Orders committed");
    metrics::describe_counter!(
        "order_creation_failures_total",
        "Rejected or failed order creations, by reason"
    );
    metrics::describe_histogram!(
        "order_creation_duration_seconds",
        metrics::Unit::Seconds,
        "Time spent placing an order"
    );
    metrics::describe_counter!("checkout_sessions_created_total", "Checkout sessions opened");
    metrics::describe_counter!(
        "checkout_session_failures_total",
        "Payment gateway failures while opening checkout"
    );
    metrics::describe_counter!("courier_labels_created_total", "Courier labels attached");
    metrics::describe_counter!("courier_job_failures_total", "Failed courier calls");
    metrics::describe_counter!("courier_jobs_dead_total", "Courier jobs given up");
    metrics::describe_counter!("courier_worker_restarts_total", "Courier worker panics");
}

async fn run(config: Config) -> Result<(), BoxError> {
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()?;
    describe_metrics();

    match config.database_url.clone() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(&url)
                .await?;
            let store = PostgresOrderStore::new(pool);
            store.run_migrations().await?;
            tracing::info!("using PostgreSQL order store");
            serve(store, config, metrics_handle).await
        }
        None => {
            let store = InMemoryOrderStore::new();
            for product in demo_catalog() {
                store.insert_product(product).await;
            }
            tracing::warn!("DATABASE_URL not set, using in-memory order store with demo catalog");
            serve(store, config, metrics_handle).await
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    let log_level = config
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let result = match config {
        Ok(config) => run(config).await,
        Err(err) => Err(err.into()),
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "server failed");
        std::process::exit(1);
    }
}
