//! Redpanda event bus for the microservices core.
//!
//! Implements [`EventBus`] over the Kafka protocol with rdkafka, so any
//! Kafka-compatible broker (Redpanda, Apache Kafka, MSK) works.
//!
//! # Wire Format
//!
//! Each message carries one JSON-encoded [`SerializedEvent`]. The event key
//! (the subject id) is the Kafka message key, so every event for one subject
//! lands in the same partition and keeps its order.
//!
//! # Delivery Semantics
//!
//! **At-least-once** with manual offset commits:
//! - Every message becomes a [`Delivery`] whose outcome is awaited
//! - `Ack` and `Nack` settle the message; a nack is the consumer's final
//!   verdict and is logged, not retried
//! - A delivery dropped without a verdict stays unsettled
//! - The committed offset of a partition only moves forward, and only up to
//!   its oldest unsettled message, so work still in flight on a parallel
//!   worker (or abandoned) is redelivered after a restart or rebalance
//! - Messages that are not a valid envelope are reported as stream errors and
//!   settled, so one bad payload cannot block a partition
//!
//! # Example
//!
//! ```no_run
//! use microservices_core::event::SerializedEvent;
//! use microservices_core::event_bus::EventBus;
//! use microservices_redpanda::RedpandaEventBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_bus = RedpandaEventBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("product-service")
//!     .build()?;
//!
//! event_bus
//!     .publish("products", &SerializedEvent::new("DELETE", "1", None))
//!     .await?;
//!
//! let mut stream = event_bus.subscribe(&["products"]).await?;
//! while let Some(Ok(delivery)) = stream.next().await {
//!     println!("Received: {}", delivery.event());
//!     delivery.ack();
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use microservices_core::event::SerializedEvent;
use microservices_core::event_bus::{
    Acknowledgement, Delivery, EventBus, EventBusError, EventStream,
};
use microservices_core::health::{HealthCheck, HealthIndicator};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Deliveries buffered between the Kafka consumer task and the subscriber.
pub const DEFAULT_BUFFER_SIZE: usize = 1000;

/// Producer send and metadata timeout unless configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// [`EventBus`] over a Kafka-compatible broker.
///
/// One idempotent producer (`acks=all`) is shared by all publishers, so a
/// retried send never reorders or duplicates events of one key. Every
/// [`subscribe`](EventBus::subscribe) call opens its own consumer in the
/// configured group; instances of one service share the group and split the
/// partitions between them.
pub struct RedpandaEventBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    consumer_group: Option<String>,
    auto_offset_reset: String,
}

impl RedpandaEventBus {
    /// Bus with default settings for `brokers`.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be
    /// created from the broker list.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Start configuring a bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Bootstrap servers this bus talks to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// The configured group, or one named after the sorted topic list.
    fn group_for(&self, topics: &[String]) -> String {
        self.consumer_group.clone().unwrap_or_else(|| {
            let mut sorted = topics.to_vec();
            sorted.sort();
            format!("microservices-{}", sorted.join("-"))
        })
    }
}

/// Settings of a [`RedpandaEventBus`].
///
/// ```no_run
/// use microservices_redpanda::RedpandaEventBus;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_bus = RedpandaEventBus::builder()
///     .brokers("redpanda-0:9092,redpanda-1:9092")
///     .consumer_group("review-service")
///     .auto_offset_reset("latest")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
}

impl RedpandaEventBusBuilder {
    /// Comma-separated bootstrap servers. Required.
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer delivery and metadata timeout (default 5 s).
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Consumer group shared by every instance of one service, so each event
    /// is applied once per service.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Where a group without committed offsets starts: `earliest` (default)
    /// or `latest`.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Create the producer and the bus.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] without brokers or when
    /// rdkafka rejects the producer configuration.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let Some(brokers) = self.brokers else {
            return Err(EventBusError::ConnectionFailed(
                "no brokers configured".to_string(),
            ));
        };
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .create()
            .map_err(|e| EventBusError::ConnectionFailed(format!("producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            consumer_group = self.consumer_group.as_deref().unwrap_or("<per topic>"),
            auto_offset_reset = %auto_offset_reset,
            "Event bus ready"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout,
            consumer_group: self.consumer_group,
            auto_offset_reset,
        })
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();

        Box::pin(async move {
            let publish_failed = |reason: String| EventBusError::PublishFailed {
                topic: topic.clone(),
                reason,
            };
            let payload = event.to_json_bytes().map_err(|e| publish_failed(e.to_string()))?;
            let record = FutureRecord::to(&topic)
                .key(event.key.as_bytes())
                .payload(&payload);

            let (partition, offset) = self
                .producer
                .send(record, Timeout::After(self.timeout))
                .await
                .map_err(|(e, _)| {
                    tracing::error!(topic = %topic, key = %event.key, error = %e, "Publish failed");
                    publish_failed(e.to_string())
                })?;

            tracing::debug!(
                topic = %topic,
                key = %event.key,
                event_type = %event.event_type,
                partition,
                offset,
                "Event published"
            );
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(ToString::to_string).collect();
        let group = self.group_for(&topics);

        Box::pin(async move {
            let subscription_failed = |reason: String| EventBusError::SubscriptionFailed {
                topics: topics.clone(),
                reason,
            };

            // Offsets are committed per delivery once it is acked.
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("group.id", &group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &self.auto_offset_reset)
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| subscription_failed(format!("consumer: {e}")))?;

            let names: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&names)
                .map_err(|e| subscription_failed(e.to_string()))?;

            tracing::info!(topics = ?topics, consumer_group = %group, "Subscribed");

            let (tx, mut rx) = tokio::sync::mpsc::channel(DEFAULT_BUFFER_SIZE);
            tokio::spawn(forward_messages(Arc::new(consumer), tx));

            let stream = async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            };
            Ok(Box::pin(stream) as EventStream)
        })
    }

    fn ping(&self) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let producer = self.producer.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            // Metadata requests block the calling thread.
            tokio::task::spawn_blocking(move || {
                producer
                    .client()
                    .fetch_metadata(None, Timeout::After(timeout))
                    .map(|_| ())
                    .map_err(|e| EventBusError::ConnectionFailed(e.to_string()))
            })
            .await
            .map_err(|e| EventBusError::ConnectionFailed(e.to_string()))?
        })
    }
}

impl HealthIndicator for RedpandaEventBus {
    fn check(&self) -> Pin<Box<dyn Future<Output = HealthCheck> + Send + '_>> {
        Box::pin(async move {
            match EventBus::ping(self).await {
                Ok(()) => HealthCheck::up("redpanda"),
                Err(e) => HealthCheck::down("redpanda", e.to_string()),
            }
        })
    }
}

/// Position of one message, kept so its offset can be committed later.
#[derive(Clone, Debug, PartialEq, Eq)]
struct MessagePosition {
    topic: String,
    partition: i32,
    offset: i64,
}

/// Progress of one partition: offsets handed out but not yet settled.
#[derive(Debug, Default)]
struct PartitionProgress {
    in_flight: BTreeSet<i64>,
    highest_settled: Option<i64>,
    committed: Option<i64>,
}

impl PartitionProgress {
    fn start(&mut self, offset: i64) {
        // The partition was rewound (rebalance or seek): start over.
        if self.committed.is_some_and(|committed| offset < committed) {
            *self = Self::default();
        }
        self.in_flight.insert(offset);
    }

    /// Settle `offset`. Returns the next offset to read when the contiguous
    /// settled prefix grew past what was committed.
    fn settle(&mut self, offset: i64) -> Option<i64> {
        self.in_flight.remove(&offset);
        self.highest_settled = self.highest_settled.max(Some(offset));

        let next = match self.in_flight.first() {
            Some(&oldest) => oldest,
            None => self.highest_settled? + 1,
        };
        if self.committed.is_some_and(|committed| committed >= next) {
            return None;
        }
        self.committed = Some(next);
        Some(next)
    }
}

/// Commit watermarks of every partition one consumer reads.
struct OffsetTracker {
    consumer: Arc<StreamConsumer>,
    partitions: Mutex<HashMap<(String, i32), PartitionProgress>>,
}

impl OffsetTracker {
    fn new(consumer: Arc<StreamConsumer>) -> Self {
        Self {
            consumer,
            partitions: Mutex::new(HashMap::new()),
        }
    }

    fn start(&self, position: &MessagePosition) {
        if let Ok(mut partitions) = self.partitions.lock() {
            partitions
                .entry((position.topic.clone(), position.partition))
                .or_default()
                .start(position.offset);
        }
    }

    /// Settle the message and commit the partition's new watermark, if any.
    ///
    /// The commit is queued while the lock is held, so commits of one
    /// partition reach the broker in increasing order.
    fn settle(&self, position: &MessagePosition) {
        let Ok(mut partitions) = self.partitions.lock() else {
            return;
        };
        let Some(next) = partitions
            .get_mut(&(position.topic.clone(), position.partition))
            .and_then(|progress| progress.settle(position.offset))
        else {
            return;
        };

        let mut list = TopicPartitionList::new();
        let result = list
            .add_partition_offset(&position.topic, position.partition, Offset::Offset(next))
            .and_then(|()| self.consumer.commit(&list, CommitMode::Async));

        if let Err(e) = result {
            tracing::warn!(
                topic = %position.topic,
                partition = position.partition,
                offset = next,
                error = %e,
                "Offset commit failed, messages may be redelivered"
            );
        }
    }
}

/// Read messages from `consumer` and hand them to the subscriber until the
/// subscriber goes away.
async fn forward_messages(
    consumer: Arc<StreamConsumer>,
    tx: tokio::sync::mpsc::Sender<Result<Delivery, EventBusError>>,
) {
    use futures::StreamExt;

    let tracker = Arc::new(OffsetTracker::new(Arc::clone(&consumer)));
    let mut messages = consumer.stream();
    while let Some(received) = messages.next().await {
        let message = match received {
            Ok(message) => message,
            Err(e) => {
                let error = EventBusError::TransportError(e.to_string());
                if tx.send(Err(error)).await.is_err() {
                    break;
                }
                continue;
            },
        };

        let position = MessagePosition {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
        };
        tracker.start(&position);

        let decoded = match message.payload() {
            Some(payload) => SerializedEvent::from_json_bytes(payload)
                .map_err(|e| EventBusError::DeserializationFailed(e.to_string())),
            None => Err(EventBusError::DeserializationFailed(
                "Message has no payload".to_string(),
            )),
        };

        match decoded {
            Ok(event) => {
                tracing::trace!(
                    topic = %position.topic,
                    partition = position.partition,
                    offset = position.offset,
                    event_type = %event.event_type,
                    "Received event"
                );
                let (delivery, outcome) = Delivery::new(position.topic.clone(), event);
                if tx.send(Ok(delivery)).await.is_err() {
                    tracing::debug!("Subscriber dropped, exiting consumer task");
                    break;
                }
                tokio::spawn(settle_on_verdict(Arc::clone(&tracker), position, outcome));
            },
            Err(err) => {
                tracing::warn!(
                    topic = %position.topic,
                    partition = position.partition,
                    offset = position.offset,
                    error = %err,
                    "Skipping undecodable message"
                );
                tracker.settle(&position);
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
            },
        }
    }

    tracing::debug!("Message forwarding stopped");
}

/// Wait for the subscriber's verdict and settle the message once it arrives.
async fn settle_on_verdict(
    tracker: Arc<OffsetTracker>,
    position: MessagePosition,
    outcome: tokio::sync::oneshot::Receiver<Acknowledgement>,
) {
    match outcome.await {
        Ok(Acknowledgement::Ack) => tracker.settle(&position),
        Ok(Acknowledgement::Nack { reason }) => {
            tracing::warn!(
                topic = %position.topic,
                partition = position.partition,
                offset = position.offset,
                reason = %reason,
                "Event rejected"
            );
            tracker.settle(&position);
        },
        Err(_) => {
            tracing::warn!(
                topic = %position.topic,
                partition = position.partition,
                offset = position.offset,
                "Delivery dropped without acknowledgement, partition commits held back"
            );
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn bus_can_be_shared_across_tasks() {
        fn shared<T: Send + Sync + 'static>() {}
        shared::<RedpandaEventBus>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let result = RedpandaEventBus::builder().build();
        assert!(matches!(result, Err(EventBusError::ConnectionFailed(_))));
    }

    #[test]
    fn consumer_group_defaults_to_sorted_topics() {
        let bus = RedpandaEventBus::new("localhost:9092").unwrap();
        let topics = vec!["reviews".to_string(), "products".to_string()];
        assert_eq!(bus.group_for(&topics), "microservices-products-reviews");

        let bus = RedpandaEventBus::builder()
            .brokers("localhost:9092")
            .consumer_group("review-service")
            .build()
            .unwrap();
        assert_eq!(bus.group_for(&topics), "review-service");
    }

    #[test]
    fn watermark_points_past_the_settled_message() {
        let mut progress = PartitionProgress::default();
        progress.start(41);
        assert_eq!(progress.settle(41), Some(42));
    }

    #[test]
    fn later_ack_waits_for_earlier_in_flight_message() {
        let mut progress = PartitionProgress::default();
        for offset in 10..=12 {
            progress.start(offset);
        }

        // 11 and 12 finish first on other workers; 10 is still running.
        assert_eq!(progress.settle(12), Some(10));
        assert_eq!(progress.settle(11), None);
        assert_eq!(progress.settle(10), Some(13));
    }

    #[test]
    fn late_settle_never_moves_the_watermark_back() {
        let mut progress = PartitionProgress::default();
        progress.start(5);
        progress.start(6);
        assert_eq!(progress.settle(5), Some(6));
        assert_eq!(progress.settle(6), Some(7));
        assert_eq!(progress.settle(5), None);
    }

    #[test]
    fn abandoned_delivery_holds_the_partition() {
        let mut progress = PartitionProgress::default();
        for offset in 0..4 {
            progress.start(offset);
        }
        // Offset 1 never gets a verdict.
        assert_eq!(progress.settle(0), Some(1));
        assert_eq!(progress.settle(2), None);
        assert_eq!(progress.settle(3), None);
    }

    #[test]
    fn rewound_partition_starts_over() {
        let mut progress = PartitionProgress::default();
        progress.start(20);
        assert_eq!(progress.settle(20), Some(21));

        progress.start(3);
        assert_eq!(progress.settle(3), Some(4));
    }
}
