//! Error types for event processing and queries.

use microservices_core::repository::RepositoryError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the event processor and the query service.
///
/// Messages are part of the external contract: the consumer nacks with them
/// and the HTTP layer returns them verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// The event or request content is semantically invalid.
    #[error("{0}")]
    InvalidInput(String),

    /// An event type other than `CREATE` or `DELETE`.
    #[error("Unsupported event type: {0}")]
    UnsupportedEventType(String),

    /// A required query parameter is absent.
    #[error("Required int parameter '{name}' is not present")]
    MissingParameter {
        /// Parameter name.
        name: String,
    },

    /// A query parameter is not an integer.
    #[error("Type mismatch.")]
    TypeMismatch {
        /// Parameter name.
        name: String,
        /// The raw value received.
        value: String,
    },

    /// A query parameter is an integer outside its allowed range.
    #[error("Invalid {name}: {value}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// The value received.
        value: i64,
    },

    /// A single-record lookup found nothing.
    #[error("{0}")]
    NotFound(String),

    /// A read did not complete in time.
    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    /// Storage failure or conflict.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ServiceError {
    /// Whether the caller sent something unusable (as opposed to a
    /// storage-side failure).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        !matches!(self, Self::Repository(_) | Self::Timeout(_))
    }
}
