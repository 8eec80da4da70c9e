//! Applying wire events to an aggregate repository.
//!
//! Every incoming event goes through the same states:
//!
//! ```text
//! RECEIVED ──decode──► VALIDATED ──apply──► APPLIED
//!     │                    │
//!     └──────────┬─────────┘
//!                ▼
//!            REJECTED (typed ServiceError)
//! ```
//!
//! Decoding turns the `{type, key, data}` envelope into an
//! [`EventKind`](microservices_core::event::EventKind) once; the apply step
//! only matches on that union.

use microservices_core::aggregate::{Aggregate, Record};
use microservices_core::event::{Event, EventError, EventKind, SerializedEvent};
use microservices_core::repository::{AggregateRepository, RepositoryError};
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::metrics::ConsumerMetrics;

/// Pluggable processing step of the [`EventConsumer`](crate::EventConsumer).
///
/// `Ok` acknowledges the message, `Err` rejects it with the error's message.
pub trait EventHandler: Send + Sync {
    /// Process one wire event.
    fn handle<'a>(
        &'a self,
        event: &'a SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + 'a>>;
}

/// What an applied event did.
#[derive(Clone, Debug, PartialEq)]
pub enum Applied<A> {
    /// A new record was stored.
    Created(Record<A>),
    /// All records of the subject were removed (possibly none).
    Deleted {
        /// Subject key of the event.
        subject_id: i32,
        /// Number of records removed.
        removed: u64,
    },
}

/// Applies `CREATE` / `DELETE` events for one aggregate type.
///
/// # Example
///
/// ```ignore
/// let processor = EventProcessor::new(Arc::new(repository) as Arc<dyn AggregateRepository<Recommendation>>);
/// let applied = processor.process(&wire_event).await?;
/// ```
pub struct EventProcessor<A> {
    repository: Arc<dyn AggregateRepository<A>>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> Clone for EventProcessor<A> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            _aggregate: PhantomData,
        }
    }
}

impl<A: Aggregate> EventProcessor<A> {
    /// Create a processor writing to `repository`.
    #[must_use]
    pub fn new(repository: Arc<dyn AggregateRepository<A>>) -> Self {
        Self {
            repository,
            _aggregate: PhantomData,
        }
    }

    /// Decode and apply one event.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::UnsupportedEventType`] for a type other than `CREATE`/`DELETE`
    /// - [`ServiceError::InvalidInput`] for an undecodable event, a `CREATE`
    ///   without data, a payload whose subject differs from the key, or a
    ///   duplicate natural key (`"Duplicate key, Product Id: 1, ..."`)
    /// - [`ServiceError::Repository`] for storage failures
    pub async fn process(&self, event: &SerializedEvent) -> Result<Applied<A>, ServiceError> {
        let started = Instant::now();
        let result = self.apply(event).await;

        ConsumerMetrics::record(A::NAME, outcome_label(&result), started.elapsed());
        match &result {
            Ok(Applied::Created(record)) => {
                info!(
                    aggregate = A::NAME,
                    key = %record.natural_key(),
                    id = %record.id,
                    "Created record"
                );
            },
            Ok(Applied::Deleted { subject_id, removed }) => {
                info!(aggregate = A::NAME, subject_id, removed, "Deleted records");
            },
            Err(e) => {
                warn!(aggregate = A::NAME, event = %event, error = %e, "Rejected event");
            },
        }
        result
    }

    async fn apply(&self, event: &SerializedEvent) -> Result<Applied<A>, ServiceError> {
        let decoded = Event::<A>::decode(event).map_err(|e| match e {
            EventError::UnknownEventType(event_type) => {
                ServiceError::UnsupportedEventType(event_type)
            },
            other => ServiceError::InvalidInput(other.to_string()),
        })?;
        debug!(aggregate = A::NAME, key = decoded.key, event_type = %decoded.event_type(), "Validated event");

        match decoded.kind {
            EventKind::Create(mut aggregate) => {
                if aggregate.subject_id() != decoded.key {
                    return Err(ServiceError::InvalidInput(format!(
                        "Event key {} does not match {}",
                        decoded.key,
                        aggregate.describe_key()
                    )));
                }

                // Serving address is filled in on reads, never stored.
                aggregate.set_service_address(None);
                let described = aggregate.describe_key();

                let record = self.repository.create(aggregate).await.map_err(|e| match e {
                    RepositoryError::DuplicateKey { .. } => {
                        ServiceError::InvalidInput(format!("Duplicate key, {described}"))
                    },
                    other => ServiceError::Repository(other),
                })?;
                Ok(Applied::Created(record))
            },
            EventKind::Delete => {
                let removed = self.repository.delete_by_subject(decoded.key).await?;
                Ok(Applied::Deleted {
                    subject_id: decoded.key,
                    removed,
                })
            },
        }
    }
}

impl<A: Aggregate> EventHandler for EventProcessor<A> {
    fn handle<'a>(
        &'a self,
        event: &'a SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + 'a>> {
        Box::pin(async move { self.process(event).await.map(|_| ()) })
    }
}

fn outcome_label<A>(result: &Result<Applied<A>, ServiceError>) -> &'static str {
    match result {
        Ok(Applied::Created(_)) => "created",
        Ok(Applied::Deleted { .. }) => "deleted",
        Err(ServiceError::Repository(_)) => "failed",
        Err(_) => "rejected",
    }
}
