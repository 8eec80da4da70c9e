//! Constructor composition for the two process kinds.
//!
//! Every dependency is built here explicitly and handed down: no container,
//! no globals besides the metrics recorder.

use anyhow::Context;
use axum::Router;
use axum::routing::get;
use microservices_core::aggregate::Aggregate;
use microservices_core::domain::{Product, Recommendation, Review};
use microservices_core::environment::SystemClock;
use microservices_core::event_bus::EventBus;
use microservices_core::health::HealthIndicator;
use microservices_postgres::PostgresRepository;
use microservices_redpanda::RedpandaEventBus;
use microservices_registry::{Registration, ServiceRegistry, spawn_sweeper};
use microservices_runtime::metrics::MetricsServer;
use microservices_runtime::{AggregateQueryService, EventConsumer, EventProcessor};
use microservices_web::routes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

use crate::config::{AggregateKind, Config};
use crate::lifecycle::Application;
use crate::registry_client::{self, RegistryClient};

/// Read routes for one aggregate kind.
type ReadRoutes<A> = fn(AggregateQueryService<A>) -> Router;

/// Build the registry server: registry, eviction sweeper, HTTP API.
///
/// # Errors
///
/// Returns error if a listener cannot be bound or metrics cannot be installed.
pub async fn registry_server(config: &Config) -> anyhow::Result<Application> {
    let (shutdown_tx, _) = broadcast::channel(1);

    let registry = Arc::new(ServiceRegistry::with_clock(config.lease(), SystemClock));
    let sweeper = spawn_sweeper(Arc::clone(&registry), shutdown_tx.subscribe());

    let app = routes::with_observability(
        routes::registry_routes(registry).merge(routes::health_routes(Vec::new())),
    );

    let listener = bind(&config.server.host, config.registry.port).await?;
    let app = Application::new(
        listener,
        app,
        shutdown_tx,
        Duration::from_secs(config.server.shutdown_timeout),
    )
    .with_task("registry-sweeper", sweeper);

    with_metrics(app, config).await
}

/// Build the aggregate service selected by `config.service.aggregate`.
///
/// # Errors
///
/// Returns error if storage, the event bus or a listener cannot be set up.
pub async fn aggregate_service(config: &Config) -> anyhow::Result<Application> {
    match config.service.aggregate {
        AggregateKind::Product => {
            build::<Product>(config, routes::single_record_routes::<Product>).await
        },
        AggregateKind::Recommendation => {
            build::<Recommendation>(config, routes::subject_routes::<Recommendation>).await
        },
        AggregateKind::Review => build::<Review>(config, routes::subject_routes::<Review>).await,
    }
}

async fn build<A: Aggregate>(
    config: &Config,
    read_routes: ReadRoutes<A>,
) -> anyhow::Result<Application> {
    let (shutdown_tx, _) = broadcast::channel(1);

    info!(url = %config.postgres.url, "Connecting to storage...");
    let pool = microservices_postgres::connect(&config.pool_settings())
        .await
        .context("connecting to PostgreSQL")?;
    let repository = Arc::new(PostgresRepository::<A>::new(pool));
    repository
        .ensure_schema()
        .await
        .context("creating the aggregate table")?;
    info!(table = repository.table_name(), "Storage ready");

    info!(brokers = %config.redpanda.brokers, "Connecting to event bus...");
    let event_bus = Arc::new(
        RedpandaEventBus::builder()
            .brokers(&config.redpanda.brokers)
            .consumer_group(config.consumer_group())
            .auto_offset_reset(&config.redpanda.auto_offset_reset)
            .timeout(Duration::from_millis(config.redpanda.timeout_ms))
            .build()
            .context("creating the event bus")?,
    );

    let bus: Arc<dyn EventBus> = event_bus.clone();
    let consumer = EventConsumer::builder()
        .name(A::NAME)
        .topics(vec![format!("{}s", A::NAME)])
        .event_bus(bus)
        .handler(Arc::new(EventProcessor::new(repository.clone())))
        .shutdown(shutdown_tx.subscribe())
        .workers(config.service.workers)
        .build()?;

    let queries = AggregateQueryService::new(repository.clone())
        .with_timeout(Duration::from_millis(config.service.query_timeout_ms))
        .with_service_address(config.service_address());

    let storage: Arc<dyn HealthIndicator> = repository;
    let broker: Arc<dyn HealthIndicator> = event_bus;
    let app = routes::with_observability(
        read_routes(queries).merge(routes::health_routes(vec![storage, broker])),
    );

    let listener = bind(&config.server.host, config.server.port).await?;
    let mut application = Application::new(
        listener,
        app,
        shutdown_tx.clone(),
        Duration::from_secs(config.server.shutdown_timeout),
    )
    .with_task("event-consumer", consumer.spawn());

    if let Some(url) = &config.registry.url {
        let registration = Registration::new(
            registry_client::instance_id(A::NAME, config.server.port),
            A::NAME,
            config.registry.instance_host.clone(),
            config.server.port,
        );
        let client = RegistryClient::new(url.clone(), registration);
        application = application.with_task(
            "registry-client",
            client.spawn(config.heartbeat_interval(), shutdown_tx.subscribe()),
        );
    }

    with_metrics(application, config).await
}

/// Install the Prometheus recorder and serve `/metrics` on the metrics port.
async fn with_metrics(app: Application, config: &Config) -> anyhow::Result<Application> {
    let listener = bind(&config.server.metrics_host, config.server.metrics_port).await?;
    let mut metrics = MetricsServer::new(listener.local_addr()?);
    metrics.start()?;

    let metrics = Arc::new(metrics);
    let router = Router::new().route(
        "/metrics",
        get(move || {
            let metrics = Arc::clone(&metrics);
            async move { metrics.render().unwrap_or_default() }
        }),
    );
    Ok(app.with_metrics(listener, router))
}

async fn bind(host: &str, port: u16) -> anyhow::Result<TcpListener> {
    let address: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;
    TcpListener::bind(address)
        .await
        .with_context(|| format!("binding {address}"))
}
