//! # Microservices Testing
//!
//! Testing utilities and helpers for the microservices core.
//!
//! This crate provides:
//! - [`InMemoryRepository`]: the repository contract over `HashMap`s
//! - [`InMemoryEventBus`]: a bus whose acknowledgements tests can observe
//! - Deterministic clocks for lease and timestamp logic
//! - Fixture builders for the product landscape
//!
//! ## Example
//!
//! ```ignore
//! use microservices_testing::{InMemoryEventBus, InMemoryRepository, fixtures};
//!
//! #[tokio::test]
//! async fn duplicate_create_is_rejected() {
//!     let bus = InMemoryEventBus::new();
//!     let repo = InMemoryRepository::new();
//!     // start a consumer over `bus` and `repo`, then:
//!     let outcome = bus.send("recommendations", fixtures::create_recommendation(1, 1)).await?;
//!     assert!(outcome.is_ack());
//! }
//! ```

use chrono::{DateTime, Utc};
use microservices_core::environment::Clock;

mod event_bus_mocks;
mod repository_mocks;

pub use event_bus_mocks::{InMemoryEventBus, PublishedEvent};
pub use repository_mocks::InMemoryRepository;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use microservices_testing::mocks::FixedClock;
    /// use microservices_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let now = Utc::now();
    /// let clock = FixedClock::new(now);
    /// assert_eq!(clock.now(), now);
    /// ```
    #[derive(Debug, Clone, Copy)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock at the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hold one handle and give
    /// another to the code under test.
    ///
    /// ```
    /// use microservices_testing::mocks::ManualClock;
    /// use microservices_testing::test_time;
    /// use microservices_core::environment::Clock;
    ///
    /// let clock = ManualClock::new(test_time());
    /// clock.advance(std::time::Duration::from_secs(91));
    /// assert_eq!((clock.now() - test_time()).num_seconds(), 91);
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock stopped at `start`.
        #[must_use]
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(start)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: std::time::Duration) {
            let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
            if let Ok(mut time) = self.time.write() {
                *time = time.checked_add_signed(by).unwrap_or(*time);
            }
        }

        /// Jump to an absolute time.
        pub fn set(&self, to: DateTime<Utc>) {
            if let Ok(mut time) = self.time.write() {
                *time = to;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
                .read()
                .map_or_else(|poisoned| *poisoned.into_inner(), |time| *time)
        }
    }

    /// Reference instant for tests: 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn test_time() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_time())
    }
}

/// Builders for the aggregates and events used throughout the test suites.
///
/// Field values follow one pattern so assertions can be derived from ids:
/// recommendation `i` is written by `"Author i"` with rate `i` and content
/// `"Content i"`.
pub mod fixtures {
    use microservices_core::domain::{Product, Recommendation, Review};
    use microservices_core::event::SerializedEvent;

    /// Product `id` named `"Product {id}"` weighing `id`.
    #[must_use]
    pub fn product(product_id: i32) -> Product {
        Product::new(product_id, format!("Product {product_id}"), product_id)
    }

    /// Recommendation `recommendation_id` of `product_id`.
    #[must_use]
    pub fn recommendation(product_id: i32, recommendation_id: i32) -> Recommendation {
        Recommendation::new(
            product_id,
            recommendation_id,
            format!("Author {recommendation_id}"),
            recommendation_id,
            format!("Content {recommendation_id}"),
        )
    }

    /// Review `review_id` of `product_id`.
    #[must_use]
    pub fn review(product_id: i32, review_id: i32) -> Review {
        Review::new(
            product_id,
            review_id,
            format!("Author {review_id}"),
            format!("Subject {review_id}"),
            format!("Content {review_id}"),
        )
    }

    /// Wire `CREATE` event keyed by the aggregate's subject id.
    #[must_use]
    pub fn create_event<A: microservices_core::Serialize>(key: i32, aggregate: &A) -> SerializedEvent {
        SerializedEvent::new(
            "CREATE",
            key.to_string(),
            serde_json::to_value(aggregate).ok(),
        )
    }

    /// Wire `CREATE` event for [`recommendation`].
    #[must_use]
    pub fn create_recommendation(product_id: i32, recommendation_id: i32) -> SerializedEvent {
        create_event(product_id, &recommendation(product_id, recommendation_id))
    }

    /// Wire `CREATE` event for [`product`].
    #[must_use]
    pub fn create_product(product_id: i32) -> SerializedEvent {
        create_event(product_id, &product(product_id))
    }

    /// Wire `CREATE` event for [`review`].
    #[must_use]
    pub fn create_review(product_id: i32, review_id: i32) -> SerializedEvent {
        create_event(product_id, &review(product_id, review_id))
    }

    /// Wire `DELETE` event for a subject.
    #[must_use]
    pub fn delete_event(key: i32) -> SerializedEvent {
        SerializedEvent::new("DELETE", key.to_string(), None)
    }
}

/// Install a test-writer tracing subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub use mocks::{FixedClock, ManualClock, test_clock, test_time};

#[cfg(test)]
mod tests {
    use super::*;
    use microservices_core::aggregate::Aggregate;
    use std::time::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
        assert_eq!(time1.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(test_time());
        let handle = clock.clone();

        handle.advance(Duration::from_secs(30));
        assert_eq!((clock.now() - test_time()).num_seconds(), 30);

        clock.set(test_time());
        assert_eq!(handle.now(), test_time());
    }

    #[test]
    fn recommendation_fixture_follows_id_pattern() {
        let recommendation = fixtures::recommendation(1, 3);
        assert_eq!(recommendation.author, "Author 3");
        assert_eq!(recommendation.rate, 3);
        assert_eq!(recommendation.content, "Content 3");
        assert_eq!(recommendation.describe_key(), "Product Id: 1, Recommendation Id: 3");
    }

    #[test]
    fn create_event_fixture_carries_data() {
        let event = fixtures::create_product(7);
        assert_eq!(event.event_type, "CREATE");
        assert_eq!(event.key, "7");
        assert_eq!(event.data.as_ref().map(|d| d["productId"].clone()), Some(7.into()));
    }
}
