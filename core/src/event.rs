//! Event envelope and wire format.
//!
//! Domain mutations travel over the bus as a small JSON envelope:
//!
//! ```json
//! { "type": "CREATE", "key": "1", "data": { "productId": 1, ... }, "timestamp": "..." }
//! ```
//!
//! [`SerializedEvent`] is that wire shape. [`Event`] is the typed form the consumer
//! works with: the `type` string and the untyped `data` are decoded once, up
//! front, into the tagged union [`EventKind`]. Nothing downstream inspects types
//! at runtime.
//!
//! # Example
//!
//! ```
//! use microservices_core::domain::Recommendation;
//! use microservices_core::event::{Event, EventKind};
//!
//! let event = Event::create(1, Recommendation::new(1, 2, "Author 2", 2, "Content 2"));
//! let wire = event.to_serialized().unwrap();
//! assert_eq!(wire.event_type, "CREATE");
//! assert_eq!(wire.key, "1");
//!
//! let decoded: Event<Recommendation> = Event::decode(&wire).unwrap();
//! assert!(matches!(decoded.kind, EventKind::Create(_)));
//! ```

use crate::aggregate::Aggregate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error types for event operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Failed to serialize event to the wire format.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize the event payload.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// Unknown event type encountered during decoding.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// The event key is not a valid subject id.
    #[error("Invalid event key: {0}")]
    InvalidKey(String),

    /// A `CREATE` event arrived without data.
    #[error("{0} event without data")]
    MissingPayload(EventType),
}

/// Kind of mutation carried by an event.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    /// Create a record from the event data.
    Create,
    /// Delete all records of the event key.
    Delete,
}

impl EventType {
    /// Wire name of the event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(Self::Create),
            "DELETE" => Ok(Self::Delete),
            other => Err(EventError::UnknownEventType(other.to_string())),
        }
    }
}

/// Typed event payload.
#[derive(Clone, Debug, PartialEq)]
pub enum EventKind<A> {
    /// Create the given aggregate.
    Create(A),
    /// Delete everything stored under the event key.
    Delete,
}

/// A decoded domain event addressed to a subject key.
#[derive(Clone, Debug, PartialEq)]
pub struct Event<A> {
    /// Subject id the event applies to (e.g. the product id).
    pub key: i32,
    /// What to do.
    pub kind: EventKind<A>,
    /// When the producer created the event.
    pub timestamp: DateTime<Utc>,
}

impl<A: Aggregate> Event<A> {
    /// Build a `CREATE` event stamped with the current time.
    #[must_use]
    pub fn create(key: i32, aggregate: A) -> Self {
        Self {
            key,
            kind: EventKind::Create(aggregate),
            timestamp: Utc::now(),
        }
    }

    /// Build a `DELETE` event stamped with the current time.
    #[must_use]
    pub fn delete(key: i32) -> Self {
        Self {
            key,
            kind: EventKind::Delete,
            timestamp: Utc::now(),
        }
    }

    /// The wire type of this event.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self.kind {
            EventKind::Create(_) => EventType::Create,
            EventKind::Delete => EventType::Delete,
        }
    }

    /// Encode this event into its wire envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if the aggregate cannot be
    /// represented as JSON.
    pub fn to_serialized(&self) -> Result<SerializedEvent, EventError> {
        let data = match &self.kind {
            EventKind::Create(aggregate) => Some(
                serde_json::to_value(aggregate)
                    .map_err(|e| EventError::SerializationError(e.to_string()))?,
            ),
            EventKind::Delete => None,
        };

        Ok(SerializedEvent {
            event_type: self.event_type().as_str().to_string(),
            key: self.key.to_string(),
            data,
            timestamp: self.timestamp,
        })
    }

    /// Decode a wire envelope into a typed event.
    ///
    /// Data attached to a `DELETE` is ignored.
    ///
    /// # Errors
    ///
    /// - [`EventError::UnknownEventType`] for anything but `CREATE`/`DELETE`
    /// - [`EventError::InvalidKey`] if the key is not an integer
    /// - [`EventError::MissingPayload`] for a `CREATE` without data
    /// - [`EventError::DeserializationError`] if the data does not match `A`
    pub fn decode(serialized: &SerializedEvent) -> Result<Self, EventError> {
        let event_type: EventType = serialized.event_type.parse()?;
        let key: i32 = serialized
            .key
            .trim()
            .parse()
            .map_err(|_| EventError::InvalidKey(serialized.key.clone()))?;

        let kind = match event_type {
            EventType::Create => {
                let data = serialized
                    .data
                    .clone()
                    .ok_or(EventError::MissingPayload(EventType::Create))?;
                let aggregate: A = serde_json::from_value(data)
                    .map_err(|e| EventError::DeserializationError(e.to_string()))?;
                EventKind::Create(aggregate)
            },
            EventType::Delete => EventKind::Delete,
        };

        Ok(Self {
            key,
            kind,
            timestamp: serialized.timestamp,
        })
    }
}

/// Wire envelope of an event.
///
/// `event_type` stays a string here so an unknown type can still be read off the
/// bus and rejected with a precise error instead of failing to parse.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// `CREATE` or `DELETE`.
    #[serde(rename = "type")]
    pub event_type: String,

    /// Subject key as a string (also used as the partitioning key).
    pub key: String,

    /// Aggregate JSON for `CREATE`, absent for `DELETE`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Producer timestamp.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl SerializedEvent {
    /// Create a new wire event.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        key: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            key: key.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    /// Encode as JSON bytes for the transport.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if encoding fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Decode from JSON bytes received from the transport.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::DeserializationError`] if the bytes are not an envelope.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, key: {} }}",
            self.event_type, self.key
        )
    }
}
