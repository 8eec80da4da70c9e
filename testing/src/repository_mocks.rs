//! In-memory aggregate repository.
//!
//! [`InMemoryRepository`] implements the full
//! [`AggregateRepository`] contract with `HashMap`s behind a lock. The lock is
//! only held for the synchronous bookkeeping of one call, never across an
//! `.await`, so it follows the same compare-and-swap discipline as the
//! Postgres implementation.

use microservices_core::aggregate::{Aggregate, NaturalKey, Record, RecordId};
use microservices_core::repository::{
    AggregateRepository, Page, PageRequest, RecordStream, RepositoryError, RepositoryFuture,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug)]
struct Stored<A> {
    /// Insertion sequence, for "ordered by insertion" reads.
    seq: u64,
    record: Record<A>,
}

#[derive(Debug)]
struct State<A> {
    records: HashMap<RecordId, Stored<A>>,
    by_key: HashMap<NaturalKey, RecordId>,
    next_seq: u64,
}

impl<A> Default for State<A> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            by_key: HashMap::new(),
            next_seq: 0,
        }
    }
}

/// In-memory repository for fast, deterministic testing.
///
/// # Example
///
/// ```
/// use microservices_core::domain::Product;
/// use microservices_core::repository::AggregateRepository;
/// use microservices_testing::InMemoryRepository;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let repo = InMemoryRepository::<Product>::new();
/// let saved = repo.create(Product::new(1, "n", 1)).await?;
/// assert_eq!(saved.version.value(), 0);
/// assert!(repo.create(Product::new(1, "other", 2)).await.is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct InMemoryRepository<A> {
    state: Arc<RwLock<State<A>>>,
    unavailable: Arc<AtomicBool>,
}

impl<A> Clone for InMemoryRepository<A> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            unavailable: Arc::clone(&self.unavailable),
        }
    }
}

impl<A> Default for InMemoryRepository<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> InMemoryRepository<A> {
    /// Create a new empty repository
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulate a storage outage: every subsequent call fails with
    /// [`RepositoryError::Database`] until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored records (synchronous, for assertions).
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().map_or(0, |state| state.records.len())
    }

    /// Check if the repository is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(
                "in-memory repository marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State<A>>, RepositoryError> {
        self.check_available()?;
        self.state
            .read()
            .map_err(|_| RepositoryError::Database("repository lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State<A>>, RepositoryError> {
        self.check_available()?;
        self.state
            .write()
            .map_err(|_| RepositoryError::Database("repository lock poisoned".to_string()))
    }
}

impl<A: Aggregate> InMemoryRepository<A> {
    fn create_now(&self, aggregate: A) -> Result<Record<A>, RepositoryError> {
        let key = aggregate.natural_key();
        let mut state = self.write()?;

        if state.by_key.contains_key(&key) {
            return Err(RepositoryError::DuplicateKey { key });
        }

        let record = Record::new(aggregate);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.by_key.insert(key, record.id);
        state.records.insert(
            record.id,
            Stored {
                seq,
                record: record.clone(),
            },
        );
        Ok(record)
    }

    fn update_now(&self, record: Record<A>) -> Result<Record<A>, RepositoryError> {
        let mut state = self.write()?;

        let Some(current) = state.records.get(&record.id) else {
            return Err(RepositoryError::VersionConflict {
                id: record.id,
                expected: record.version,
                actual: None,
            });
        };

        if current.record.version != record.version {
            return Err(RepositoryError::VersionConflict {
                id: record.id,
                expected: record.version,
                actual: Some(current.record.version),
            });
        }

        let old_key = current.record.natural_key();
        let new_key = record.natural_key();
        let seq = current.seq;

        if old_key != new_key {
            if state.by_key.contains_key(&new_key) {
                return Err(RepositoryError::DuplicateKey { key: new_key });
            }
            state.by_key.remove(&old_key);
            state.by_key.insert(new_key, record.id);
        }

        let updated = Record {
            id: record.id,
            version: record.version.next(),
            data: record.data,
        };
        state.records.insert(
            updated.id,
            Stored {
                seq,
                record: updated.clone(),
            },
        );
        Ok(updated)
    }

    fn subject_snapshot(&self, subject_id: i32) -> Result<Vec<Record<A>>, RepositoryError> {
        let state = self.read()?;
        let mut matching: Vec<&Stored<A>> = state
            .records
            .values()
            .filter(|stored| stored.record.natural_key().subject_id == subject_id)
            .collect();
        matching.sort_by_key(|stored| stored.seq);
        Ok(matching.into_iter().map(|stored| stored.record.clone()).collect())
    }

    fn page_now(&self, request: PageRequest) -> Result<Page<A>, RepositoryError> {
        let state = self.read()?;
        let mut all: Vec<&Record<A>> = state.records.values().map(|stored| &stored.record).collect();
        all.sort_by_key(|record| record.natural_key());

        let mut content: Vec<Record<A>> = all
            .into_iter()
            .skip(request.offset())
            .take(request.size + 1)
            .cloned()
            .collect();
        let has_next = content.len() > request.size;
        content.truncate(request.size);

        Ok(Page {
            content,
            request,
            has_next,
        })
    }

    fn delete_subject_now(&self, subject_id: i32) -> Result<u64, RepositoryError> {
        let mut state = self.write()?;
        let ids: Vec<RecordId> = state
            .records
            .values()
            .filter(|stored| stored.record.natural_key().subject_id == subject_id)
            .map(|stored| stored.record.id)
            .collect();

        for id in &ids {
            if let Some(stored) = state.records.remove(id) {
                state.by_key.remove(&stored.record.natural_key());
            }
        }
        Ok(ids.len() as u64)
    }

    fn delete_now(&self, id: RecordId) -> Result<bool, RepositoryError> {
        let mut state = self.write()?;
        Ok(match state.records.remove(&id) {
            Some(stored) => {
                state.by_key.remove(&stored.record.natural_key());
                true
            },
            None => false,
        })
    }
}

impl<A: Aggregate> AggregateRepository<A> for InMemoryRepository<A> {
    fn create(&self, aggregate: A) -> RepositoryFuture<'_, Record<A>> {
        Box::pin(async move { self.create_now(aggregate) })
    }

    fn update(&self, record: Record<A>) -> RepositoryFuture<'_, Record<A>> {
        Box::pin(async move { self.update_now(record) })
    }

    fn find_by_id(&self, id: RecordId) -> RepositoryFuture<'_, Option<Record<A>>> {
        Box::pin(async move {
            let state = self.read()?;
            Ok(state.records.get(&id).map(|stored| stored.record.clone()))
        })
    }

    fn find_by_natural_key(&self, key: NaturalKey) -> RepositoryFuture<'_, Option<Record<A>>> {
        Box::pin(async move {
            let state = self.read()?;
            Ok(state
                .by_key
                .get(&key)
                .and_then(|id| state.records.get(id))
                .map(|stored| stored.record.clone()))
        })
    }

    fn find_by_subject(&self, subject_id: i32) -> RecordStream<'_, A> {
        let snapshot = self.subject_snapshot(subject_id);
        Box::pin(async_stream::stream! {
            match snapshot {
                Ok(records) => {
                    for record in records {
                        yield Ok(record);
                    }
                },
                Err(e) => yield Err(e),
            }
        })
    }

    fn find_page(&self, request: PageRequest) -> RepositoryFuture<'_, Page<A>> {
        Box::pin(async move { self.page_now(request) })
    }

    fn delete(&self, id: RecordId) -> RepositoryFuture<'_, bool> {
        Box::pin(async move { self.delete_now(id) })
    }

    fn delete_by_subject(&self, subject_id: i32) -> RepositoryFuture<'_, u64> {
        Box::pin(async move { self.delete_subject_now(subject_id) })
    }

    fn count(&self) -> RepositoryFuture<'_, u64> {
        Box::pin(async move {
            let state = self.read()?;
            Ok(state.records.len() as u64)
        })
    }

    fn delete_all(&self) -> RepositoryFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.write()?;
            *state = State::default();
            Ok(())
        })
    }

    fn ping(&self) -> RepositoryFuture<'_, ()> {
        Box::pin(async move { self.check_available() })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use microservices_core::domain::{Product, Recommendation};
    use microservices_core::version::Version;

    #[tokio::test]
    async fn create_assigns_initial_version() {
        let repo = InMemoryRepository::new();
        let record = repo.create(Product::new(1, "n", 1)).await.unwrap();

        assert_eq!(record.version, Version::INITIAL);
        assert_eq!(repo.count().await.unwrap(), 1);
        assert_eq!(
            repo.find_by_id(record.id).await.unwrap(),
            Some(record.clone())
        );
    }

    #[tokio::test]
    async fn update_can_move_natural_key() {
        let repo = InMemoryRepository::new();
        let mut record = repo.create(Product::new(1, "n", 1)).await.unwrap();
        record.data.product_id = 2;

        let moved = repo.update(record).await.unwrap();
        assert_eq!(moved.version, Version::new(1));
        assert!(repo.find_by_natural_key(NaturalKey::subject(1)).await.unwrap().is_none());
        assert!(repo.find_by_natural_key(NaturalKey::subject(2)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_into_taken_key_is_duplicate() {
        let repo = InMemoryRepository::new();
        repo.create(Product::new(1, "n", 1)).await.unwrap();
        let mut second = repo.create(Product::new(2, "n", 1)).await.unwrap();
        second.data.product_id = 1;

        let error = repo.update(second.clone()).await.unwrap_err();
        assert_eq!(error, RepositoryError::DuplicateKey { key: NaturalKey::subject(1) });

        let stored = repo.find_by_id(second.id).await.unwrap().unwrap();
        assert_eq!(stored.data.product_id, 2);
        assert_eq!(stored.version, Version::INITIAL);
    }

    #[tokio::test]
    async fn update_of_deleted_record_conflicts() {
        let repo = InMemoryRepository::new();
        let record = repo.create(Product::new(1, "n", 1)).await.unwrap();
        assert!(repo.delete(record.id).await.unwrap());

        let error = repo.update(record).await.unwrap_err();
        assert!(matches!(
            error,
            RepositoryError::VersionConflict { actual: None, .. }
        ));
    }

    #[tokio::test]
    async fn subject_stream_keeps_insertion_order() {
        let repo = InMemoryRepository::new();
        for id in [3, 1, 2] {
            repo.create(Recommendation::new(1, id, "a", id, "c")).await.unwrap();
        }
        repo.create(Recommendation::new(2, 1, "a", 1, "c")).await.unwrap();

        let ids: Vec<i32> = repo
            .find_by_subject(1)
            .map_ok(|record| record.data.recommendation_id)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[tokio::test]
    async fn unavailable_repository_reports_database_error() {
        let repo = InMemoryRepository::<Product>::new();
        repo.set_unavailable(true);

        assert!(matches!(repo.ping().await, Err(RepositoryError::Database(_))));
        assert!(matches!(
            repo.create(Product::new(1, "n", 1)).await,
            Err(RepositoryError::Database(_))
        ));

        let first = repo.find_by_subject(1).try_collect::<Vec<_>>().await;
        assert!(first.is_err());

        repo.set_unavailable(false);
        assert!(repo.ping().await.is_ok());
    }

    #[tokio::test]
    async fn delete_all_resets_state() {
        let repo = InMemoryRepository::new();
        repo.create(Product::new(1, "n", 1)).await.unwrap();
        repo.delete_all().await.unwrap();

        assert!(repo.is_empty());
        repo.create(Product::new(1, "n", 1)).await.unwrap();
    }
}
