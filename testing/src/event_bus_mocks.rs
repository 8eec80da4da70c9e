//! In-memory event bus with observable acknowledgements.
//!
//! [`InMemoryEventBus`] fans published events out to every subscriber of the
//! topic. Tests that care about the consumer's verdict use
//! [`InMemoryEventBus::send`], which waits for the delivery to be acked or
//! nacked and returns the outcome.

use microservices_core::event::SerializedEvent;
use microservices_core::event_bus::{
    Acknowledgement, Delivery, EventBus, EventBusError, EventStream,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

type Subscribers = HashMap<String, Vec<mpsc::UnboundedSender<Delivery>>>;

/// Outcome of one published event, in publish order.
#[derive(Clone, Debug, PartialEq)]
pub struct PublishedEvent {
    /// Topic the event went to.
    pub topic: String,
    /// The event itself.
    pub event: SerializedEvent,
    /// Outcome reported by the subscriber, `None` while pending or when
    /// nobody was subscribed.
    pub outcome: Option<Acknowledgement>,
}

/// In-memory event bus for fast, deterministic testing.
///
/// # Example
///
/// ```
/// use futures::StreamExt;
/// use microservices_core::event::SerializedEvent;
/// use microservices_core::event_bus::{Acknowledgement, EventBus};
/// use microservices_testing::InMemoryEventBus;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// let mut stream = bus.subscribe(&["products"]).await?;
///
/// tokio::spawn(async move {
///     while let Some(Ok(delivery)) = stream.next().await {
///         delivery.ack();
///     }
/// });
///
/// let outcome = bus.send("products", SerializedEvent::new("DELETE", "1", None)).await?;
/// assert_eq!(outcome, Acknowledgement::Ack);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryEventBus {
    subscribers: Arc<RwLock<Subscribers>>,
    published: Arc<RwLock<Vec<PublishedEvent>>>,
    connected: Arc<AtomicBool>,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventBus {
    /// Create a new bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            published: Arc::new(RwLock::new(Vec::new())),
            connected: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Toggle the simulated broker connection. A disconnected bus fails
    /// `ping`, `publish`, `send` and `subscribe`.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Everything published so far, with outcomes where known.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedEvent> {
        self.published
            .read()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    /// Number of live subscriptions to `topic`.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.subscribers
            .read()
            .map(|subs| {
                subs.get(topic)
                    .map_or(0, |senders| senders.iter().filter(|tx| !tx.is_closed()).count())
            })
            .unwrap_or(0)
    }

    /// Publish `event` to `topic` and wait for the subscriber's verdict.
    ///
    /// With several subscribers on the topic, the first live one decides;
    /// the rest receive detached copies. A delivery dropped without an answer
    /// counts as a rejection.
    ///
    /// # Errors
    ///
    /// - [`EventBusError::ConnectionFailed`] when disconnected
    /// - [`EventBusError::PublishFailed`] when nobody subscribes to `topic`
    pub async fn send(
        &self,
        topic: &str,
        event: SerializedEvent,
    ) -> Result<Acknowledgement, EventBusError> {
        self.ensure_connected()?;

        let index = self.record(topic, &event);
        let (delivery, outcome) = Delivery::new(topic, event.clone());

        let delivered = self.dispatch(topic, delivery, &event)?;
        if !delivered {
            return Err(EventBusError::PublishFailed {
                topic: topic.to_string(),
                reason: "no subscribers".to_string(),
            });
        }

        let outcome = outcome.await.unwrap_or_else(|_| Acknowledgement::Nack {
            reason: "delivery dropped without acknowledgement".to_string(),
        });

        if let Ok(mut log) = self.published.write() {
            if let Some(entry) = log.get_mut(index) {
                entry.outcome = Some(outcome.clone());
            }
        }

        Ok(outcome)
    }

    fn ensure_connected(&self) -> Result<(), EventBusError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EventBusError::ConnectionFailed(
                "in-memory bus disconnected".to_string(),
            ))
        }
    }

    fn record(&self, topic: &str, event: &SerializedEvent) -> usize {
        match self.published.write() {
            Ok(mut log) => {
                log.push(PublishedEvent {
                    topic: topic.to_string(),
                    event: event.clone(),
                    outcome: None,
                });
                log.len() - 1
            },
            Err(_) => usize::MAX,
        }
    }

    /// Hand `delivery` to the first live subscriber and detached copies to
    /// the others. Returns whether anybody received it.
    fn dispatch(
        &self,
        topic: &str,
        delivery: Delivery,
        event: &SerializedEvent,
    ) -> Result<bool, EventBusError> {
        let mut subscribers = self
            .subscribers
            .write()
            .map_err(|_| EventBusError::TransportError("subscriber lock poisoned".to_string()))?;

        let Some(senders) = subscribers.get_mut(topic) else {
            return Ok(false);
        };
        senders.retain(|tx| !tx.is_closed());

        let mut primary = Some(delivery);
        for tx in senders.iter() {
            match primary.take() {
                Some(delivery) => {
                    if let Err(mpsc::error::SendError(returned)) = tx.send(delivery) {
                        primary = Some(returned);
                    }
                },
                None => {
                    let _ = tx.send(Delivery::detached(topic, event.clone()));
                },
            }
        }

        Ok(primary.is_none())
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();

        Box::pin(async move {
            self.ensure_connected()?;
            let index = self.record(&topic, &event);
            let (delivery, outcome) = Delivery::new(topic.clone(), event.clone());

            if self.dispatch(&topic, delivery, &event)? {
                let published = Arc::clone(&self.published);
                tokio::spawn(async move {
                    let Ok(outcome) = outcome.await else {
                        return;
                    };
                    if let Ok(mut log) = published.write() {
                        if let Some(entry) = log.get_mut(index) {
                            entry.outcome = Some(outcome);
                        }
                    }
                });
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();

        Box::pin(async move {
            self.ensure_connected()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: e.to_string(),
                })?;

            let (tx, mut rx) = mpsc::unbounded_channel();
            {
                let mut subscribers = self.subscribers.write().map_err(|_| {
                    EventBusError::SubscriptionFailed {
                        topics: topics.clone(),
                        reason: "subscriber lock poisoned".to_string(),
                    }
                })?;
                for topic in &topics {
                    subscribers.entry(topic.clone()).or_default().push(tx.clone());
                }
            }

            let stream = async_stream::stream! {
                while let Some(delivery) = rx.recv().await {
                    yield Ok(delivery);
                }
            };
            Ok(Box::pin(stream) as EventStream)
        })
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        Box::pin(async move { self.ensure_connected() })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn delete_event(key: &str) -> SerializedEvent {
        SerializedEvent::new("DELETE", key, None)
    }

    #[tokio::test]
    async fn send_without_subscribers_fails() {
        let bus = InMemoryEventBus::new();
        let result = bus.send("products", delete_event("1")).await;
        assert!(matches!(result, Err(EventBusError::PublishFailed { .. })));
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn send_returns_nack_reason() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["reviews"]).await.unwrap();
        tokio::spawn(async move {
            while let Some(Ok(delivery)) = stream.next().await {
                delivery.nack("bad");
            }
        });

        let outcome = bus.send("reviews", delete_event("1")).await.unwrap();
        assert_eq!(outcome, Acknowledgement::Nack { reason: "bad".to_string() });
        assert_eq!(bus.published()[0].outcome, Some(outcome));
    }

    #[tokio::test]
    async fn dropped_delivery_counts_as_nack() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["reviews"]).await.unwrap();
        tokio::spawn(async move {
            while let Some(Ok(delivery)) = stream.next().await {
                drop(delivery);
            }
        });

        let outcome = bus.send("reviews", delete_event("1")).await.unwrap();
        assert!(!outcome.is_ack());
    }

    #[tokio::test]
    async fn publish_preserves_order_per_subscriber() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["products"]).await.unwrap();

        for key in ["1", "2", "3"] {
            bus.publish("products", &delete_event(key)).await.unwrap();
        }

        let mut keys = Vec::new();
        for _ in 0..3 {
            let delivery = stream.next().await.unwrap().unwrap();
            keys.push(delivery.key().to_string());
            delivery.ack();
        }
        assert_eq!(keys, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn disconnected_bus_fails_ping_and_subscribe() {
        let bus = InMemoryEventBus::new();
        bus.set_connected(false);

        assert!(matches!(bus.ping().await, Err(EventBusError::ConnectionFailed(_))));
        assert!(matches!(
            bus.subscribe(&["products"]).await,
            Err(EventBusError::SubscriptionFailed { .. })
        ));

        bus.set_connected(true);
        assert!(bus.ping().await.is_ok());
    }

    #[tokio::test]
    async fn closed_subscription_is_pruned() {
        let bus = InMemoryEventBus::new();
        let stream = bus.subscribe(&["products"]).await.unwrap();
        assert_eq!(bus.subscriber_count("products"), 1);

        drop(stream);
        assert_eq!(bus.subscriber_count("products"), 0);
    }
}
