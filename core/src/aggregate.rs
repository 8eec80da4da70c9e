//! Aggregate abstraction and identity types.
//!
//! An aggregate is the domain record whose lifecycle the store manages. It is
//! identified two ways:
//!
//! - [`RecordId`]: opaque identity assigned by storage at creation, never reused
//! - [`NaturalKey`]: the domain-meaningful uniqueness constraint, e.g.
//!   `(productId, recommendationId)`
//!
//! The first component of the natural key, the *subject id*, addresses groups of
//! records: "all recommendations of product 1" is a read or delete by subject.

use crate::version::Version;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Storage-assigned identity of a record.
///
/// # Examples
///
/// ```
/// use microservices_core::aggregate::RecordId;
///
/// let a = RecordId::new();
/// let b = RecordId::new();
/// assert_ne!(a, b);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Generate a fresh random identity.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID (e.g. one loaded from storage).
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composite natural key `(subject_id, member_id)`.
///
/// Single-record aggregates (a product) only have a subject id. One-to-many
/// aggregates (recommendations of a product) add a member id.
///
/// Keys order by subject first, then member, with subject-only keys first.
///
/// # Examples
///
/// ```
/// use microservices_core::aggregate::NaturalKey;
///
/// let key = NaturalKey::member(1, 3);
/// assert_eq!(key.subject_id, 1);
/// assert_eq!(key.to_string(), "1:3");
/// assert_eq!(NaturalKey::subject(7).to_string(), "7");
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NaturalKey {
    /// Leading key component used for one-to-many reads and deletes.
    pub subject_id: i32,
    /// Second key component, if the aggregate has one.
    pub member_id: Option<i32>,
}

impl NaturalKey {
    /// Key of a single-record aggregate.
    #[must_use]
    pub const fn subject(subject_id: i32) -> Self {
        Self {
            subject_id,
            member_id: None,
        }
    }

    /// Key of a member of a one-to-many aggregate.
    #[must_use]
    pub const fn member(subject_id: i32, member_id: i32) -> Self {
        Self {
            subject_id,
            member_id: Some(member_id),
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.member_id {
            Some(member_id) => write!(f, "{}:{member_id}", self.subject_id),
            None => write!(f, "{}", self.subject_id),
        }
    }
}

/// A domain record managed by an [`AggregateRepository`](crate::repository::AggregateRepository).
///
/// Implementors are plain serde types. The repository wraps them in a
/// [`Record`] that carries identity and version, so domain types never deal
/// with storage concerns.
///
/// # Thread Safety
///
/// Aggregates cross task boundaries (bus → worker → storage), so they must be
/// `Send + Sync + 'static`.
pub trait Aggregate:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Lower-case aggregate name, used for table names, topics and log fields.
    const NAME: &'static str;

    /// Name of the query parameter carrying the subject id on the read API.
    const SUBJECT_PARAM: &'static str = "productId";

    /// The natural key of this aggregate.
    fn natural_key(&self) -> NaturalKey;

    /// The subject component of the natural key.
    fn subject_id(&self) -> i32 {
        self.natural_key().subject_id
    }

    /// Human-readable key description, e.g. `Product Id: 1, Recommendation Id: 1`.
    fn describe_key(&self) -> String;

    /// Set the transient address of the instance serving this aggregate.
    ///
    /// The address is filled in on the read path and cleared before writes.
    fn set_service_address(&mut self, address: Option<String>);
}

/// An aggregate as stored: identity, version and domain data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record<A> {
    /// Storage-assigned identity.
    pub id: RecordId,
    /// Version for optimistic concurrency.
    pub version: Version,
    /// Domain data.
    pub data: A,
}

impl<A: Aggregate> Record<A> {
    /// Create a record at the initial version with a fresh identity.
    #[must_use]
    pub fn new(data: A) -> Self {
        Self {
            id: RecordId::new(),
            version: Version::INITIAL,
            data,
        }
    }

    /// Natural key of the wrapped aggregate.
    #[must_use]
    pub fn natural_key(&self) -> NaturalKey {
        self.data.natural_key()
    }

    /// Consume the record, keeping only the domain data.
    #[must_use]
    pub fn into_data(self) -> A {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn natural_keys_order_by_subject_then_member() {
        let mut keys = vec![
            NaturalKey::member(2, 1),
            NaturalKey::member(1, 2),
            NaturalKey::subject(1),
            NaturalKey::member(1, 1),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                NaturalKey::subject(1),
                NaturalKey::member(1, 1),
                NaturalKey::member(1, 2),
                NaturalKey::member(2, 1),
            ]
        );
    }

    #[test]
    fn record_ids_are_unique() {
        assert_ne!(RecordId::new(), RecordId::new());
    }

    #[test]
    fn record_id_display_matches_uuid() {
        let uuid = Uuid::new_v4();
        assert_eq!(RecordId::from_uuid(uuid).to_string(), uuid.to_string());
    }
}
