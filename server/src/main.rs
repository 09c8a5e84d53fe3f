//! Shipkafka server.
//!
//! Runs the booking authority and the capacity authority against
//! `PostgreSQL` and Redpanda until Ctrl+C or SIGTERM.

use anyhow::Context;
use shipkafka_core::environment::{Clock, SystemClock};
use shipkafka_core::event_bus::EventBus;
use shipkafka_core::saga::SagaLog;
use shipkafka_postgres::{DeadLetterQueue, PostgresSagaLog, PostgresStore};
use shipkafka_redpanda::RedpandaEventBus;
use shipkafka_runtime::metrics::MetricsServer;
use shipkafka_server::seed::seed_demo_data;
use shipkafka_server::{Application, Collaborators, Config, Faults, SagaSettings, ShippingApp};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "shipkafka=info,shipkafka_server=info,shipkafka_runtime=info,\
                 shipkafka_booking=info,shipkafka_capacity=info,shipkafka_redpanda=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting shipkafka");

    let config = Config::from_env()?;
    info!(
        redpanda_brokers = %config.redpanda.brokers,
        booking_group = %config.redpanda.booking_group,
        capacity_group = %config.redpanda.capacity_group,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.metrics_addr);
    metrics.start()?;

    info!("Connecting to database...");
    let store = PostgresStore::connect(&config.database.url, config.database.max_connections)
        .await
        .context("database unavailable")?;
    store.migrate().await?;
    info!("Database ready");

    info!("Connecting to Redpanda...");
    let bus = RedpandaEventBus::builder()
        .brokers(&config.redpanda.brokers)
        .build()?;
    bus.ensure_topics(config.redpanda.partitions)
        .await
        .context("topic provisioning failed")?;
    info!("Event bus ready");

    let store = Arc::new(store);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let booking_saga: Arc<dyn SagaLog> =
        Arc::new(PostgresSagaLog::new(store.pool().clone(), "booking"));
    let capacity_saga: Arc<dyn SagaLog> =
        Arc::new(PostgresSagaLog::new(store.pool().clone(), "capacity"));

    if config.seed_demo_data {
        seed_demo_data(store.as_ref(), store.as_ref(), clock.as_ref()).await?;
    }

    let event_bus: Arc<dyn EventBus> = Arc::new(bus);
    let collaborators = Collaborators {
        event_bus,
        bookings: store.clone(),
        booking_saga,
        ships: store.clone(),
        capacity_saga,
        dead_letters: Some(Arc::new(DeadLetterQueue::new(store.pool().clone()))),
        clock,
    };

    let (shutdown_tx, _) = broadcast::channel(1);
    let app = ShippingApp::assemble(
        &SagaSettings::from_config(&config),
        &collaborators,
        &Faults::default(),
        &shutdown_tx,
    )?;

    match app.booking.resume_requested().await {
        Ok(resumed) if !resumed.is_empty() => {
            info!(count = resumed.len(), "Unannounced bookings published");
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Could not resume unannounced bookings"),
    }
    let unfinished = app.booking.in_flight().await?;
    if !unfinished.is_empty() {
        info!(count = unfinished.len(), "Bookings waiting for a capacity outcome");
    }

    Application::new(app.consumers, shutdown_tx, config.shutdown_timeout())
        .run()
        .await;

    Ok(())
}
