//! Empuje federation node entry point.

use std::sync::Arc;

use empuje_api::bootstrap::{Node, NodeParts};
use empuje_api::config::{BusBackend, Config};
use empuje_api::error::AppError;
use empuje_api::workers;
use empuje_api::{app, telemetry};
use empuje_bus::{InMemoryBus, PgBus};
use empuje_core::bus::MessageBus;
use empuje_core::clock::SystemClock;
use empuje_store::schema::MIGRATOR;
use empuje_store::{PgFederationStore, PgHostedEventDirectory};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::load()?;
    let telemetry = telemetry::init(config.otlp_endpoint.as_deref())?;

    info!(
        organization_id = %config.organization_id,
        "Starting Empuje federation node"
    );

    let result = run(config).await;
    if let Err(err) = &result {
        error!(error = %err, "node stopped with an error");
    }
    telemetry.shutdown();
    result
}

async fn connect(url: &str) -> Result<PgPool, AppError> {
    Ok(PgPoolOptions::new().max_connections(10).connect(url).await?)
}

async fn build_bus(config: &Config, pool: &PgPool) -> Result<Arc<dyn MessageBus>, AppError> {
    match config.bus_backend {
        BusBackend::Memory => {
            warn!("using the in-memory bus; only this process takes part in the federation");
            Ok(Arc::new(InMemoryBus::new(config.bus_partitions)))
        }
        BusBackend::Postgres => {
            let bus_pool = if config.bus_database_url() == config.database_url {
                pool.clone()
            } else {
                connect(config.bus_database_url()).await?
            };
            let bus = PgBus::new(bus_pool, config.bus_partitions);
            bus.ensure_schema().await?;
            Ok(Arc::new(bus))
        }
    }
}

async fn run(config: Config) -> Result<(), AppError> {
    let pool = connect(&config.database_url).await?;
    MIGRATOR.run(&pool).await?;

    let bus = build_bus(&config, &pool).await?;
    let registry = config.registry();
    let node = Node::assemble(NodeParts {
        registry: registry.clone(),
        bus: Arc::clone(&bus),
        store: Arc::new(PgFederationStore::new(pool.clone())),
        directory: Arc::new(PgHostedEventDirectory::new(pool)),
        clock: Arc::new(SystemClock),
        retention: config.retention(),
        dispatcher: config.dispatcher_settings(),
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let group = config.consumer_group();
    let mut tasks = workers::spawn_consumers(
        &bus,
        &node.dispatcher,
        registry.own_organization_id(),
        &group,
        &shutdown_rx,
    )
    .await?;
    tasks.push(workers::spawn_retention_sweeper(
        node.guard.clone(),
        Arc::clone(&bus),
        config.bus_retention(),
        config.sweep_interval(),
        shutdown_rx,
    ));

    // TODO: Replace CorsLayer::permissive() with restricted origins for production.
    let router = app(node.state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = config.bind_address()?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_tx.send_replace(true);
    for task in tasks {
        if let Err(err) = task.await {
            warn!(error = %err, "background task did not stop cleanly");
        }
    }
    info!("Empuje federation node stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for the shutdown signal");
    }
    info!("shutdown signal received");
}
