//! # Microservices Core
//!
//! Core traits and types shared by the aggregate services and the service registry.
//!
//! This crate provides the fundamental abstractions for an event-driven aggregate
//! store: domain events consumed from a message bus are applied to a versioned
//! collection under optimistic concurrency, and a read API serves the same
//! collection without going through the bus.
//!
//! ## Core Concepts
//!
//! - **Aggregate**: A domain record (product, recommendation, review) identified by a
//!   natural key such as `(productId, recommendationId)`
//! - **Record**: An aggregate as stored, with a storage-assigned id and a version
//! - **Event**: A `CREATE` or `DELETE` mutation addressed to a subject key
//! - **Repository**: Versioned persistence with duplicate-key detection
//! - **Event bus**: Ordered-per-partition delivery with explicit ack/nack
//!
//! ## Architecture
//!
//! ```text
//! producer ──► EventBus ──► consumer ──► AggregateRepository ◄── query API
//!                 ▲            │
//!                 └─ ack/nack ─┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use microservices_core::domain::Recommendation;
//! use microservices_core::event::Event;
//!
//! let recommendation = Recommendation::new(1, 1, "Author 1", 1, "Content 1");
//! let event = Event::create(1, recommendation);
//! let wire = event.to_serialized()?;
//! event_bus.publish("recommendations", &wire).await?;
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

/// Aggregate trait, natural keys, record identities.
pub mod aggregate;

/// Concrete aggregates of the product landscape.
pub mod domain;

/// Event envelope and wire format.
pub mod event;

/// Event bus abstraction with acknowledgements.
pub mod event_bus;

/// Health reporting shared by the services.
pub mod health;

/// Aggregate repository trait and error taxonomy.
pub mod repository;

/// Record versions for optimistic concurrency.
pub mod version;

/// Environment module - Dependency injection traits
///
/// All time-dependent logic (registry leases, event timestamps) reads time through
/// the [`Clock`](environment::Clock) trait so tests can control it.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// let clock = SystemClock;
    /// let now = clock.now();
    ///
    /// // Test - manual clock advanced by the test
    /// let clock = ManualClock::new(test_time());
    /// clock.advance(Duration::from_secs(91));
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// System clock backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use aggregate::{Aggregate, NaturalKey, Record, RecordId};
pub use event::{Event, EventKind, EventType, SerializedEvent};
pub use repository::{AggregateRepository, RepositoryError};
pub use version::Version;
