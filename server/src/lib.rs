//! # Microservices Server
//!
//! Process wiring for the two binaries:
//!
//! - `registry-server`: the service registry, its eviction sweeper and the
//!   Eureka-style HTTP API
//! - `aggregate-service`: one aggregate (`AGGREGATE=product|recommendation|review`)
//!   with its Postgres repository, Redpanda consumer, read API, health
//!   endpoint and registry self-registration
//!
//! Both expose Prometheus metrics on `METRICS_PORT` and shut down gracefully
//! on Ctrl+C or SIGTERM.

/// Environment configuration
pub mod config;

/// Graceful lifecycle of a process
pub mod lifecycle;

/// Registry self-registration client
pub mod registry_client;

/// Constructor composition of the processes
pub mod services;

pub use config::{AggregateKind, Config};
pub use lifecycle::{Application, shutdown_signal};
pub use registry_client::{RegistryClient, RegistryClientError, Renewal};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber: `RUST_LOG` filter (default
/// `microservices=info,tower_http=debug`) and the fmt layer.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "microservices=info,tower_http=debug".into()),
        )
        .with(fmt::layer())
        .init();
}
