//! Service registry HTTP server.

use microservices_server::{Config, services};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    microservices_server::init_tracing();

    info!("Starting service registry");

    let config = Config::from_env();
    info!(
        port = config.registry.port,
        lease_secs = config.registry.lease_duration,
        eviction_interval_secs = config.registry.eviction_interval,
        "Configuration loaded"
    );

    services::registry_server(&config).await?.run().await?;
    Ok(())
}
