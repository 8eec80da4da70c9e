//! Aggregate repository trait and related types.
//!
//! This module defines the persistence abstraction for aggregates: a versioned
//! collection with a unique natural key.
//!
//! # Design
//!
//! The `AggregateRepository` trait provides exactly what the consumer and the
//! read API need:
//!
//! - Create records, rejecting duplicate natural keys
//! - Update records with optimistic concurrency (compare-and-swap on version)
//! - Look records up by id, natural key or subject
//! - Delete by subject, idempotently
//!
//! Write calls return `Result<Record<A>, RepositoryError>`. A lost race is an
//! ordinary value ([`RepositoryError::VersionConflict`]) that callers match on.
//!
//! # Implementations
//!
//! - `PostgresRepository` (in `microservices-postgres`): Production implementation
//! - `InMemoryRepository` (in `microservices-testing`): Fast, deterministic testing
//!
//! # Example
//!
//! ```no_run
//! use microservices_core::domain::Product;
//! use microservices_core::repository::{AggregateRepository, RepositoryError};
//!
//! async fn rename<R: AggregateRepository<Product>>(repo: &R) -> Result<(), RepositoryError> {
//!     let created = repo.create(Product::new(1, "n", 1)).await?;
//!
//!     let mut record = created.clone();
//!     record.data.name = "n2".to_string();
//!     let updated = repo.update(record).await?;
//!     assert_eq!(updated.version.value(), 1);
//!
//!     // A second writer still holding version 0 loses.
//!     let stale = created;
//!     assert!(repo.update(stale).await.unwrap_err().is_version_conflict());
//!     Ok(())
//! }
//! ```

use crate::aggregate::{Aggregate, NaturalKey, Record, RecordId};
use crate::version::Version;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during repository operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// A write collided with an existing record on the natural key.
    #[error("Duplicate key: {key}")]
    DuplicateKey {
        /// The colliding natural key.
        key: NaturalKey,
    },

    /// Optimistic concurrency conflict: the caller's version is stale.
    ///
    /// `actual` is `None` when the record no longer exists.
    #[error(
        "Version conflict on record {id}: expected version {expected}, found {}",
        .actual.map_or_else(|| "none".to_string(), |v| v.to_string())
    )]
    VersionConflict {
        /// The record the update targeted.
        id: RecordId,
        /// The version the caller read.
        expected: Version,
        /// The version currently stored.
        actual: Option<Version>,
    },

    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(String),

    /// Stored data could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RepositoryError {
    /// Whether this is a natural-key collision.
    #[must_use]
    pub const fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }

    /// Whether this is an optimistic-lock failure.
    #[must_use]
    pub const fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

/// A page request: zero-based page number and page size.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PageRequest {
    /// Zero-based page number.
    pub page: usize,
    /// Maximum number of records per page (at least 1).
    pub size: usize,
}

impl PageRequest {
    /// Create a page request. A size of 0 is raised to 1.
    #[must_use]
    pub const fn new(page: usize, size: usize) -> Self {
        Self {
            page,
            size: if size == 0 { 1 } else { size },
        }
    }

    /// Number of records to skip.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }

    /// The request for the following page.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self {
            page: self.page + 1,
            size: self.size,
        }
    }
}

/// One page of records ordered by natural key.
#[derive(Clone, Debug, PartialEq)]
pub struct Page<A> {
    /// Records on this page.
    pub content: Vec<Record<A>>,
    /// The request that produced this page.
    pub request: PageRequest,
    /// Whether another page follows.
    pub has_next: bool,
}

impl<A> Page<A> {
    /// Request for the next page, if there is one.
    #[must_use]
    pub const fn next_request(&self) -> Option<PageRequest> {
        if self.has_next {
            Some(self.request.next())
        } else {
            None
        }
    }
}

/// Boxed future returned by repository operations.
pub type RepositoryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Lazy sequence of records.
pub type RecordStream<'a, A> = Pin<Box<dyn Stream<Item = Result<Record<A>, RepositoryError>> + Send + 'a>>;

/// Persistence abstraction over a versioned aggregate collection.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to be shared between the event
/// consumer workers and the read API.
///
/// # Concurrency
///
/// No operation holds a lock across I/O. Correctness of concurrent updates rests
/// on comparing the caller's version with the stored one at write time; the
/// loser observes [`RepositoryError::VersionConflict`] and must re-read.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be shared as `Arc<dyn AggregateRepository<A>>`.
pub trait AggregateRepository<A: Aggregate>: Send + Sync {
    /// Store a new aggregate at version 0 with a fresh id.
    ///
    /// # Errors
    ///
    /// - `DuplicateKey`: a record with the same natural key exists; nothing is written
    /// - `Database`: storage failure
    fn create(&self, aggregate: A) -> RepositoryFuture<'_, Record<A>>;

    /// Persist new field values for an existing record.
    ///
    /// `record.version` must equal the stored version. On success the stored
    /// version is incremented by exactly 1 and the updated record returned.
    ///
    /// # Errors
    ///
    /// - `VersionConflict`: stale or missing record; nothing is written
    /// - `DuplicateKey`: the new natural key belongs to another record
    /// - `Database`: storage failure
    fn update(&self, record: Record<A>) -> RepositoryFuture<'_, Record<A>>;

    /// Look a record up by id. Absence is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `Database` on storage failure.
    fn find_by_id(&self, id: RecordId) -> RepositoryFuture<'_, Option<Record<A>>>;

    /// Look a record up by its full natural key. Absence is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns `Database` on storage failure.
    fn find_by_natural_key(&self, key: NaturalKey) -> RepositoryFuture<'_, Option<Record<A>>>;

    /// Stream all records of a subject in insertion order.
    ///
    /// An unknown subject yields an empty stream.
    fn find_by_subject(&self, subject_id: i32) -> RecordStream<'_, A>;

    /// Read one page of all records, ordered by natural key.
    ///
    /// # Errors
    ///
    /// Returns `Database` on storage failure.
    fn find_page(&self, request: PageRequest) -> RepositoryFuture<'_, Page<A>>;

    /// Delete one record by id. Returns whether a record was removed.
    ///
    /// # Errors
    ///
    /// Returns `Database` on storage failure.
    fn delete(&self, id: RecordId) -> RepositoryFuture<'_, bool>;

    /// Delete every record of a subject. Returns the number removed; removing
    /// nothing is success.
    ///
    /// # Errors
    ///
    /// Returns `Database` on storage failure.
    fn delete_by_subject(&self, subject_id: i32) -> RepositoryFuture<'_, u64>;

    /// Number of stored records.
    ///
    /// # Errors
    ///
    /// Returns `Database` on storage failure.
    fn count(&self) -> RepositoryFuture<'_, u64>;

    /// Remove every record.
    ///
    /// # Errors
    ///
    /// Returns `Database` on storage failure.
    fn delete_all(&self) -> RepositoryFuture<'_, ()>;

    /// Check that storage is reachable.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the storage connection is down.
    fn ping(&self) -> RepositoryFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_conflict_error_display() {
        let id = RecordId::new();
        let error = RepositoryError::VersionConflict {
            id,
            expected: Version::new(0),
            actual: Some(Version::new(1)),
        };

        let display = error.to_string();
        assert!(display.contains("expected version 0"));
        assert!(display.contains("found 1"));
        assert!(error.is_version_conflict());
        assert!(!error.is_duplicate_key());
    }

    #[test]
    fn version_conflict_on_missing_record_display() {
        let error = RepositoryError::VersionConflict {
            id: RecordId::new(),
            expected: Version::new(3),
            actual: None,
        };
        assert!(error.to_string().ends_with("found none"));
    }

    #[test]
    fn duplicate_key_error_display() {
        let error = RepositoryError::DuplicateKey {
            key: NaturalKey::member(1, 1),
        };
        assert_eq!(error.to_string(), "Duplicate key: 1:1");
        assert!(error.is_duplicate_key());
    }

    #[test]
    fn page_request_offsets() {
        let first = PageRequest::new(0, 4);
        assert_eq!(first.offset(), 0);
        assert_eq!(first.next().offset(), 4);
        assert_eq!(PageRequest::new(2, 0).size, 1);
    }

    #[test]
    fn last_page_has_no_next_request() {
        let page: Page<()> = Page {
            content: Vec::new(),
            request: PageRequest::new(2, 4),
            has_next: false,
        };
        assert_eq!(page.next_request(), None);
    }
}
