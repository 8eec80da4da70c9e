//! # Microservices Runtime
//!
//! Event processing and read-side services on top of `microservices-core`.
//!
//! ## Core Components
//!
//! - **`EventProcessor`**: decodes wire events and applies them to a repository
//! - **`EventConsumer`**: subscribe-process-reconnect loop with keyed workers
//!   that acks or nacks every delivery
//! - **`AggregateQueryService`**: validated, time-bounded reads
//! - **`metrics`**: Prometheus recorder and metric recorders
//!
//! ## Example
//!
//! ```ignore
//! use microservices_runtime::{AggregateQueryService, EventConsumer, EventProcessor};
//!
//! let processor = Arc::new(EventProcessor::new(Arc::clone(&repository)));
//! let consumer = EventConsumer::builder()
//!     .name("recommendation")
//!     .topics(vec!["recommendations".to_string()])
//!     .event_bus(event_bus)
//!     .handler(processor)
//!     .shutdown(shutdown_tx.subscribe())
//!     .build()?;
//! let handle = consumer.spawn();
//!
//! let queries = AggregateQueryService::new(repository);
//! ```

/// Error types for processing and queries
pub mod error;

/// Decoding and applying events
pub mod dispatcher;

/// Event bus consumer
pub mod consumer;

/// Read-side query service
pub mod query;

/// Prometheus metrics for observability
pub mod metrics;

pub use consumer::{EventConsumer, EventConsumerBuilder};
pub use dispatcher::{Applied, EventHandler, EventProcessor};
pub use error::ServiceError;
pub use query::{AggregateQueryService, Window, parse_id};
