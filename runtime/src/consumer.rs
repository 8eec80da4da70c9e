//! Event bus consumer with keyed parallelism and automatic reconnection.
//!
//! `EventConsumer` owns the subscribe-process-reconnect loop for one
//! aggregate's topic and hands every delivery to an [`EventHandler`]. The
//! handler's verdict is reported back to the bus: `Ok` acks, `Err` nacks with
//! the error message.
//!
//! # Pattern: Subscribe-Process-Reconnect Loop
//!
//! ```text
//! loop {
//!     subscribe (retry after `retry_delay` on failure)
//!     loop {
//!         next delivery ──hash(key) % workers──► worker queue
//!     }
//!     stream ended: wait `retry_delay`, resubscribe
//! }
//! ```
//!
//! # Ordering
//!
//! Deliveries with the same key always land on the same worker, and each
//! worker applies one delivery at a time. Events for one subject are therefore
//! applied strictly in arrival order while distinct subjects proceed in
//! parallel.
//!
//! # Shutdown
//!
//! On shutdown the consumer stops reading, closes the worker queues and waits
//! for the workers to finish what they already hold. An apply that started is
//! never cancelled.
//!
//! # Example
//!
//! ```rust,ignore
//! let consumer = EventConsumer::builder()
//!     .name("recommendation")
//!     .topics(vec!["recommendations".to_string()])
//!     .event_bus(event_bus)
//!     .handler(Arc::new(EventProcessor::new(repository)))
//!     .shutdown(shutdown_rx)
//!     .workers(4)
//!     .build()?;
//!
//! let handle = consumer.spawn();
//! ```

use futures::StreamExt;
use microservices_core::event_bus::{Delivery, EventBus, EventStream};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatcher::EventHandler;
use crate::metrics::ConsumerMetrics;

/// Default number of parallel workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Default delay before resubscribing.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Capacity of each worker queue. A full queue applies backpressure to the
/// stream reader.
const WORKER_QUEUE_CAPACITY: usize = 64;

/// Error raised when a consumer is built without a required part.
#[derive(Debug, thiserror::Error)]
#[error("EventConsumer is missing required field: {0}")]
pub struct MissingField(&'static str);

/// Event bus consumer for one handler.
///
/// # Configuration
///
/// - `name`: Consumer name (for logging and metrics)
/// - `topics`: Topics to subscribe to
/// - `event_bus`: Bus to consume from
/// - `handler`: Processing step whose verdict becomes ack/nack
/// - `shutdown`: Broadcast receiver for graceful shutdown
/// - `workers`: Number of keyed workers (default: 4)
/// - `retry_delay`: Wait before resubscribing (default: 5s)
pub struct EventConsumer {
    name: String,
    topics: Vec<String>,
    event_bus: Arc<dyn EventBus>,
    handler: Arc<dyn EventHandler>,
    shutdown: broadcast::Receiver<()>,
    workers: usize,
    retry_delay: Duration,
}

impl EventConsumer {
    /// Create a new event consumer with default workers and retry delay.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        topics: Vec<String>,
        event_bus: Arc<dyn EventBus>,
        handler: Arc<dyn EventHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            topics,
            event_bus,
            handler,
            shutdown,
            workers: DEFAULT_WORKERS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Create a builder for configuring a consumer.
    #[must_use]
    pub fn builder() -> EventConsumerBuilder {
        EventConsumerBuilder::default()
    }

    /// Set custom retry delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the number of keyed workers (at least 1).
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Spawn the consumer as a background task.
    ///
    /// The returned handle completes after shutdown, once every worker has
    /// drained its queue.
    #[must_use]
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(consumer = %self.name, workers = self.workers, "Event consumer started");

        let (queues, workers) = self.start_workers();

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal");
                    break;
                }
                subscribe_result = self.event_bus.subscribe(&topics) => {
                    match subscribe_result {
                        Ok(mut stream) => {
                            info!(consumer = %self.name, topics = ?self.topics, "Subscribed to event bus");

                            if self.process_stream(&mut stream, &queues).await {
                                break;
                            }

                            warn!(consumer = %self.name, "Event stream ended, reconnecting in {:?}", self.retry_delay);
                        }
                        Err(e) => {
                            error!(
                                consumer = %self.name,
                                error = %e,
                                "Failed to subscribe to event bus, retrying in {:?}",
                                self.retry_delay
                            );
                        }
                    }

                    if self.wait_retry().await {
                        break;
                    }
                }
            }
        }

        // Closing the queues lets each worker finish what it holds and exit.
        drop(queues);
        for worker in workers {
            if let Err(e) = worker.await {
                error!(consumer = %self.name, error = %e, "Worker task failed");
            }
        }

        info!(consumer = %self.name, "Event consumer stopped");
    }

    /// Sleep for the retry delay. Returns `true` if shutdown arrived meanwhile.
    async fn wait_retry(&mut self) -> bool {
        tokio::select! {
            _ = self.shutdown.recv() => {
                info!(consumer = %self.name, "Event consumer received shutdown signal while waiting to reconnect");
                true
            }
            () = tokio::time::sleep(self.retry_delay) => false,
        }
    }

    /// Route deliveries to workers until the stream ends (`false`) or shutdown
    /// arrives (`true`).
    async fn process_stream(
        &mut self,
        stream: &mut EventStream,
        queues: &[mpsc::Sender<Delivery>],
    ) -> bool {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal during processing");
                    return true;
                }
                next = stream.next() => {
                    match next {
                        Some(Ok(delivery)) => {
                            let shard = shard_for(delivery.key(), queues.len());
                            debug!(consumer = %self.name, key = %delivery.key(), shard, "Dispatching delivery");
                            if queues[shard].send(delivery).await.is_err() {
                                error!(consumer = %self.name, shard, "Worker queue closed");
                                return false;
                            }
                        }
                        Some(Err(e)) => {
                            error!(consumer = %self.name, error = %e, "Error receiving event from stream");
                        }
                        None => {
                            warn!(consumer = %self.name, "Event stream ended");
                            return false;
                        }
                    }
                }
            }
        }
    }

    fn start_workers(&self) -> (Vec<mpsc::Sender<Delivery>>, Vec<JoinHandle<()>>) {
        (0..self.workers)
            .map(|index| {
                let (tx, rx) = mpsc::channel(WORKER_QUEUE_CAPACITY);
                let handle = tokio::spawn(run_worker(
                    self.name.clone(),
                    index,
                    Arc::clone(&self.handler),
                    rx,
                ));
                (tx, handle)
            })
            .unzip()
    }
}

async fn run_worker(
    consumer: String,
    index: usize,
    handler: Arc<dyn EventHandler>,
    mut queue: mpsc::Receiver<Delivery>,
) {
    debug!(consumer = %consumer, worker = index, "Worker started");

    while let Some(delivery) = queue.recv().await {
        match handler.handle(delivery.event()).await {
            Ok(()) => {
                ConsumerMetrics::record_delivery(&consumer, true);
                delivery.ack();
            },
            Err(e) => {
                ConsumerMetrics::record_delivery(&consumer, false);
                delivery.nack(e.to_string());
            },
        }
    }

    debug!(consumer = %consumer, worker = index, "Worker stopped");
}

/// Worker index for a partitioning key.
fn shard_for(key: &str, workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    // Remainder of a division by a usize always fits in usize.
    #[allow(clippy::cast_possible_truncation)]
    let shard = (hasher.finish() % workers as u64) as usize;
    shard
}

/// Builder for configuring an `EventConsumer`.
#[derive(Default)]
pub struct EventConsumerBuilder {
    name: Option<String>,
    topics: Option<Vec<String>>,
    event_bus: Option<Arc<dyn EventBus>>,
    handler: Option<Arc<dyn EventHandler>>,
    shutdown: Option<broadcast::Receiver<()>>,
    workers: Option<usize>,
    retry_delay: Option<Duration>,
}

impl EventConsumerBuilder {
    /// Set consumer name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set topics to subscribe to.
    #[must_use]
    pub fn topics(mut self, topics: Vec<String>) -> Self {
        self.topics = Some(topics);
        self
    }

    /// Set event bus instance.
    #[must_use]
    pub fn event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Set event handler.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Set shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Set the number of keyed workers (default: 4).
    #[must_use]
    pub const fn workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Set custom retry delay (default: 5 seconds).
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Build the `EventConsumer`.
    ///
    /// # Errors
    ///
    /// Returns [`MissingField`] if name, topics, event bus, handler or
    /// shutdown receiver is not set.
    pub fn build(self) -> Result<EventConsumer, MissingField> {
        Ok(EventConsumer {
            name: self.name.ok_or(MissingField("name"))?,
            topics: self.topics.ok_or(MissingField("topics"))?,
            event_bus: self.event_bus.ok_or(MissingField("event_bus"))?,
            handler: self.handler.ok_or(MissingField("handler"))?,
            shutdown: self.shutdown.ok_or(MissingField("shutdown"))?,
            workers: self.workers.unwrap_or(DEFAULT_WORKERS).max(1),
            retry_delay: self.retry_delay.unwrap_or(DEFAULT_RETRY_DELAY),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn same_key_always_same_shard() {
        for workers in 1..8 {
            let shard = shard_for("42", workers);
            assert!(shard < workers);
            assert_eq!(shard_for("42", workers), shard);
        }
    }

    #[test]
    fn builder_reports_missing_field() {
        let error = EventConsumer::builder().name("x").build().err().unwrap();
        assert_eq!(
            error.to_string(),
            "EventConsumer is missing required field: topics"
        );
    }
}
