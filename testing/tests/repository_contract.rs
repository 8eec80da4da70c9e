//! Contract tests for `InMemoryRepository`.
//!
//! These mirror the persistence scenarios the Postgres repository is held to:
//! optimistic locking, natural-key uniqueness, idempotent deletes and paging.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use futures::TryStreamExt;
use microservices_core::aggregate::{NaturalKey, Record};
use microservices_core::domain::{Product, Recommendation};
use microservices_core::repository::{AggregateRepository, PageRequest, RepositoryError};
use microservices_core::version::Version;
use microservices_testing::{InMemoryRepository, fixtures};
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_test::block_on;

#[tokio::test]
async fn update_increments_version_and_stale_update_fails() {
    let repo = InMemoryRepository::new();
    let created = repo.create(Product::new(1, "n", 1)).await.unwrap();
    assert_eq!(created.version, Version::new(0));

    let mut first = created.clone();
    first.data.name = "n1".to_string();
    let updated = repo.update(first).await.unwrap();
    assert_eq!(updated.version, Version::new(1));

    let mut stale = created;
    stale.data.name = "n2".to_string();
    let error = repo.update(stale).await.unwrap_err();
    assert_eq!(
        error,
        RepositoryError::VersionConflict {
            id: updated.id,
            expected: Version::new(0),
            actual: Some(Version::new(1)),
        }
    );

    let stored = repo.find_by_id(updated.id).await.unwrap().unwrap();
    assert_eq!(stored.version, Version::new(1));
    assert_eq!(stored.data.name, "n1");
}

#[tokio::test]
async fn duplicate_natural_key_is_rejected_without_writing() {
    let repo = InMemoryRepository::new();
    let original = repo.create(fixtures::recommendation(1, 1)).await.unwrap();

    let mut clash = fixtures::recommendation(1, 1);
    clash.author = "Someone else".to_string();
    let error = repo.create(clash).await.unwrap_err();

    assert_eq!(error, RepositoryError::DuplicateKey { key: NaturalKey::member(1, 1) });
    assert_eq!(repo.count().await.unwrap(), 1);
    assert_eq!(
        repo.find_by_natural_key(NaturalKey::member(1, 1)).await.unwrap(),
        Some(original)
    );
}

#[tokio::test]
async fn delete_by_subject_is_idempotent() {
    let repo = InMemoryRepository::new();
    for id in 1..=3 {
        repo.create(fixtures::recommendation(1, id)).await.unwrap();
    }
    repo.create(fixtures::recommendation(2, 1)).await.unwrap();

    assert_eq!(repo.delete_by_subject(1).await.unwrap(), 3);
    assert_eq!(repo.delete_by_subject(1).await.unwrap(), 0);
    assert_eq!(repo.count().await.unwrap(), 1);

    // Keys become free again.
    repo.create(fixtures::recommendation(1, 1)).await.unwrap();
}

#[tokio::test]
async fn paging_walks_products_in_key_order() {
    let repo = InMemoryRepository::new();
    for id in (1001..=1010).rev() {
        repo.create(fixtures::product(id)).await.unwrap();
    }

    let mut request = Some(PageRequest::new(0, 4));
    let mut pages: Vec<Vec<i32>> = Vec::new();
    while let Some(next) = request {
        let page = repo.find_page(next).await.unwrap();
        pages.push(page.content.iter().map(|r| r.data.product_id).collect());
        request = page.next_request();
    }

    assert_eq!(
        pages,
        vec![
            vec![1001, 1002, 1003, 1004],
            vec![1005, 1006, 1007, 1008],
            vec![1009, 1010],
        ]
    );
}

#[tokio::test]
async fn concurrent_updates_of_one_version_have_one_winner() {
    let repo = Arc::new(InMemoryRepository::new());
    let created = repo.create(Product::new(1, "n", 1)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let repo = Arc::clone(&repo);
        let mut record: Record<Product> = created.clone();
        record.data.name = format!("writer {i}");
        handles.push(tokio::spawn(async move { repo.update(record).await }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(record) => {
                winners += 1;
                assert_eq!(record.version, Version::new(1));
            },
            Err(error) => assert!(error.is_version_conflict()),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn unknown_subject_streams_nothing() {
    let repo = InMemoryRepository::<Recommendation>::new();
    let records: Vec<_> = repo.find_by_subject(113).try_collect().await.unwrap();
    assert!(records.is_empty());
}

proptest! {
    /// Whatever sequence of creates arrives, at most one record exists per
    /// natural key and every rejection is a duplicate-key error.
    #[test]
    fn natural_keys_stay_unique(keys in prop::collection::vec((1i32..4, 1i32..4), 1..40)) {
        let repo = InMemoryRepository::new();
        let mut seen = HashSet::new();

        for (product_id, recommendation_id) in keys {
            let result = block_on(repo.create(fixtures::recommendation(product_id, recommendation_id)));
            if seen.insert((product_id, recommendation_id)) {
                prop_assert!(result.is_ok());
            } else {
                prop_assert!(result.unwrap_err().is_duplicate_key());
            }
        }

        prop_assert_eq!(block_on(repo.count()).unwrap(), seen.len() as u64);
    }

    /// Subject streams return exactly the subject's records, in creation order.
    #[test]
    fn subject_stream_matches_creation_order(ids in prop::collection::hash_set(1i32..1000, 0..20)) {
        let repo = InMemoryRepository::new();
        let ids: Vec<i32> = ids.into_iter().collect();
        for id in &ids {
            block_on(repo.create(fixtures::review(7, *id))).unwrap();
            block_on(repo.create(fixtures::review(8, *id))).unwrap();
        }

        let streamed: Vec<i32> = block_on(
            repo.find_by_subject(7)
                .map_ok(|record| record.data.review_id)
                .try_collect::<Vec<_>>(),
        )
        .unwrap();
        prop_assert_eq!(streamed, ids);
    }

    /// Each successful update bumps the version by exactly one.
    #[test]
    fn versions_increase_by_one(updates in 1usize..20) {
        let repo = InMemoryRepository::new();
        let mut record = block_on(repo.create(fixtures::product(1))).unwrap();

        for expected in 1..=updates {
            record.data.weight += 1;
            record = block_on(repo.update(record)).unwrap();
            prop_assert_eq!(record.version.value(), expected as u64);
        }
    }
}
