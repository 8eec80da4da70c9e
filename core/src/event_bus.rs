//! Event bus abstraction with explicit acknowledgements.
//!
//! This module provides the [`EventBus`] trait for publishing domain events and
//! subscribing to them. Each received message is handed to the subscriber as a
//! [`Delivery`] that must be acknowledged ([`Delivery::ack`]) or rejected
//! ([`Delivery::nack`]). What happens after a rejection (redelivery, dead
//! lettering, skipping) is the transport's policy, not the subscriber's.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   publish    ┌──────────────┐   Delivery    ┌──────────────┐
//! │   Producer   │─────────────►│   EventBus   │──────────────►│   Consumer   │
//! └──────────────┘              └──────────────┘               └──────┬───────┘
//!                                      ▲                              │
//!                                      └──────── ack / nack ──────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Ordered within partition**: messages with the same key keep their order
//! - **At-least-once delivery**: a rejected or unacknowledged message may come back
//! - **Subscribers decide outcome, transport decides policy**
//!
//! # Topic Naming Convention
//!
//! Topics are the plural aggregate name: `products`, `recommendations`, `reviews`.
//!
//! # Implementations
//!
//! - `InMemoryEventBus` (in `microservices-testing`): for tests, records outcomes
//! - `RedpandaEventBus` (in `microservices-redpanda`): Kafka-compatible production bus

use crate::event::SerializedEvent;
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to deserialize a message
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Outcome reported by a subscriber for one delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Acknowledgement {
    /// The message was processed; the transport may forget it.
    Ack,
    /// The message was rejected with the given reason.
    Nack {
        /// Human-readable rejection reason (the typed error's message).
        reason: String,
    },
}

impl Acknowledgement {
    /// Whether this is a positive acknowledgement.
    #[must_use]
    pub const fn is_ack(&self) -> bool {
        matches!(self, Self::Ack)
    }
}

/// One message handed to a subscriber.
///
/// Dropping a delivery without calling [`ack`](Self::ack) or
/// [`nack`](Self::nack) closes its acknowledgement channel; transports treat
/// that like a rejection.
pub struct Delivery {
    topic: String,
    event: SerializedEvent,
    responder: Option<oneshot::Sender<Acknowledgement>>,
}

impl Delivery {
    /// Create a delivery and the receiver on which its outcome will arrive.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        event: SerializedEvent,
    ) -> (Self, oneshot::Receiver<Acknowledgement>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                topic: topic.into(),
                event,
                responder: Some(tx),
            },
            rx,
        )
    }

    /// Create a delivery whose outcome nobody observes.
    #[must_use]
    pub fn detached(topic: impl Into<String>, event: SerializedEvent) -> Self {
        Self {
            topic: topic.into(),
            event,
            responder: None,
        }
    }

    /// Topic the message was read from.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The wire event.
    #[must_use]
    pub const fn event(&self) -> &SerializedEvent {
        &self.event
    }

    /// Partitioning key of the message.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.event.key
    }

    /// Acknowledge successful processing.
    pub fn ack(self) {
        self.respond(Acknowledgement::Ack);
    }

    /// Reject the message.
    pub fn nack(self, reason: impl Into<String>) {
        self.respond(Acknowledgement::Nack {
            reason: reason.into(),
        });
    }

    fn respond(mut self, outcome: Acknowledgement) {
        if let Some(responder) = self.responder.take() {
            // The transport may have given up waiting; nothing left to tell it.
            let _ = responder.send(outcome);
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("event", &self.event)
            .field("acknowledgeable", &self.responder.is_some())
            .finish()
    }
}

/// Stream of deliveries from a subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync`; the bus is shared between the
/// consumer task, the health endpoint and any producers.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be used as `Arc<dyn EventBus>`.
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic.
    ///
    /// The event key is used as the message key, so all events for one subject
    /// land in the same partition and keep their order.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish operation fails.
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of deliveries.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;

    /// Check that the bus connection is live.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the bus is unreachable.
    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample_event() -> SerializedEvent {
        SerializedEvent::new("DELETE", "1", None)
    }

    #[tokio::test]
    async fn ack_reaches_receiver() {
        let (delivery, rx) = Delivery::new("products", sample_event());
        assert_eq!(delivery.topic(), "products");
        assert_eq!(delivery.key(), "1");

        delivery.ack();
        assert_eq!(rx.await.unwrap(), Acknowledgement::Ack);
    }

    #[tokio::test]
    async fn nack_carries_reason() {
        let (delivery, rx) = Delivery::new("products", sample_event());
        delivery.nack("Duplicate key, Product Id: 1");

        let outcome = rx.await.unwrap();
        assert!(!outcome.is_ack());
        assert_eq!(
            outcome,
            Acknowledgement::Nack {
                reason: "Duplicate key, Product Id: 1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn dropped_delivery_closes_channel() {
        let (delivery, rx) = Delivery::new("products", sample_event());
        drop(delivery);
        assert!(rx.await.is_err());
    }

    #[test]
    fn detached_delivery_can_be_acked() {
        let delivery = Delivery::detached("products", sample_event());
        delivery.ack();
    }

    #[test]
    fn publish_failed_display() {
        let error = EventBusError::PublishFailed {
            topic: "products".to_string(),
            reason: "broker down".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Publish failed for topic 'products': broker down"
        );
    }
}
