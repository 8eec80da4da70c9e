//! Aggregate service: event consumer, read API and registry client for one
//! aggregate.

use microservices_server::{Config, services};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    microservices_server::init_tracing();

    let config = Config::from_env();
    info!(
        aggregate = %config.service.aggregate,
        port = config.server.port,
        postgres_url = %config.postgres.url,
        redpanda_brokers = %config.redpanda.brokers,
        registry = config.registry.url.as_deref().unwrap_or("disabled"),
        "Configuration loaded"
    );

    services::aggregate_service(&config).await?.run().await?;
    Ok(())
}
