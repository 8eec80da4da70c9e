//! Read side: validated, time-bounded queries against a repository.
//!
//! Reads go straight to the repository, never through the bus. Every read
//! runs under a timeout; dropping the returned future abandons the read
//! without side effects.

use futures::{StreamExt, TryStreamExt};
use microservices_core::aggregate::{Aggregate, NaturalKey};
use microservices_core::repository::AggregateRepository;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::ServiceError;
use crate::metrics::QueryMetrics;

/// Default read timeout.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest accepted `size` parameter.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Parse a required positive integer parameter.
///
/// # Errors
///
/// - [`ServiceError::MissingParameter`] when `raw` is `None`
/// - [`ServiceError::TypeMismatch`] when `raw` is not an integer
/// - [`ServiceError::InvalidParameter`] when the value is below 1
pub fn parse_id(name: &str, raw: Option<&str>) -> Result<i32, ServiceError> {
    let raw = raw.ok_or_else(|| ServiceError::MissingParameter {
        name: name.to_string(),
    })?;
    let value = parse_int(name, raw)?;
    if value < 1 {
        return Err(ServiceError::InvalidParameter {
            name: name.to_string(),
            value,
        });
    }
    i32::try_from(value).map_err(|_| ServiceError::TypeMismatch {
        name: name.to_string(),
        value: raw.to_string(),
    })
}

fn parse_int(name: &str, raw: &str) -> Result<i64, ServiceError> {
    raw.trim().parse::<i64>().map_err(|_| ServiceError::TypeMismatch {
        name: name.to_string(),
        value: raw.to_string(),
    })
}

/// Optional `page` / `size` window over a subject's records.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Window {
    /// Zero-based page number.
    pub page: usize,
    /// Records per page, 1..=100.
    pub size: usize,
}

impl Window {
    /// Read `page` and `size` from query parameters. Both absent means no
    /// window; `page` alone uses the maximum size, `size` alone page 0.
    ///
    /// # Errors
    ///
    /// [`ServiceError::TypeMismatch`] for non-integers,
    /// [`ServiceError::InvalidParameter`] for a negative page or a size
    /// outside 1..=100.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Option<Self>, ServiceError> {
        let page = params.get("page").map(|raw| parse_int("page", raw)).transpose()?;
        let size = params.get("size").map(|raw| parse_int("size", raw)).transpose()?;

        if page.is_none() && size.is_none() {
            return Ok(None);
        }

        let page = page.unwrap_or(0);
        if page < 0 {
            return Err(ServiceError::InvalidParameter {
                name: "page".to_string(),
                value: page,
            });
        }
        let size = size.unwrap_or(MAX_PAGE_SIZE);
        if !(1..=MAX_PAGE_SIZE).contains(&size) {
            return Err(ServiceError::InvalidParameter {
                name: "size".to_string(),
                value: size,
            });
        }

        Ok(Some(Self {
            page: usize::try_from(page).unwrap_or(usize::MAX),
            size: usize::try_from(size).unwrap_or(1),
        }))
    }

    const fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }
}

/// Query service for one aggregate type.
///
/// # Example
///
/// ```ignore
/// let service = AggregateQueryService::new(repository).with_service_address("host/10.0.0.1:7002");
/// let params = HashMap::from([("productId".to_string(), "1".to_string())]);
/// let recommendations = service.list_by_subject(&params).await?;
/// ```
pub struct AggregateQueryService<A> {
    repository: Arc<dyn AggregateRepository<A>>,
    timeout: Duration,
    service_address: Option<String>,
}

impl<A> Clone for AggregateQueryService<A> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            timeout: self.timeout,
            service_address: self.service_address.clone(),
        }
    }
}

impl<A: Aggregate> AggregateQueryService<A> {
    /// Create a query service with the default timeout.
    #[must_use]
    pub fn new(repository: Arc<dyn AggregateRepository<A>>) -> Self {
        Self {
            repository,
            timeout: DEFAULT_QUERY_TIMEOUT,
            service_address: None,
        }
    }

    /// Set the read timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Address stamped into every returned aggregate's `serviceAddress`.
    #[must_use]
    pub fn with_service_address(mut self, address: impl Into<String>) -> Self {
        self.service_address = Some(address.into());
        self
    }

    /// All aggregates of the subject named by the aggregate's subject
    /// parameter (`productId`), in insertion order. An unknown subject is an
    /// empty list, not an error.
    ///
    /// # Errors
    ///
    /// Parameter validation errors (see [`parse_id`] and
    /// [`Window::from_params`]), [`ServiceError::Timeout`], or
    /// [`ServiceError::Repository`].
    pub async fn list_by_subject(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<Vec<A>, ServiceError> {
        let subject_id = parse_id(A::SUBJECT_PARAM, params.get(A::SUBJECT_PARAM).map(String::as_str))?;
        let window = Window::from_params(params)?;

        let records = self
            .timed(async {
                let stream = self.repository.find_by_subject(subject_id);
                match window {
                    Some(window) => {
                        stream
                            .skip(window.offset())
                            .take(window.size)
                            .try_collect::<Vec<_>>()
                            .await
                    },
                    None => stream.try_collect::<Vec<_>>().await,
                }
            })
            .await?;

        debug!(aggregate = A::NAME, subject_id, count = records.len(), "Listed by subject");
        Ok(records
            .into_iter()
            .map(|record| self.stamp(record.into_data()))
            .collect())
    }

    /// The single aggregate stored under a subject-only natural key.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::InvalidParameter`] for an id below 1
    /// - [`ServiceError::NotFound`] (`"No product found for productId: 13"`)
    /// - [`ServiceError::Timeout`] or [`ServiceError::Repository`]
    pub async fn get_by_subject(&self, subject_id: i32) -> Result<A, ServiceError> {
        if subject_id < 1 {
            return Err(ServiceError::InvalidParameter {
                name: A::SUBJECT_PARAM.to_string(),
                value: i64::from(subject_id),
            });
        }

        let record = self
            .timed(self.repository.find_by_natural_key(NaturalKey::subject(subject_id)))
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No {} found for {}: {subject_id}",
                    A::NAME,
                    A::SUBJECT_PARAM
                ))
            })?;

        Ok(self.stamp(record.into_data()))
    }

    async fn timed<T, F>(&self, read: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, microservices_core::repository::RepositoryError>>,
    {
        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, read)
            .await
            .map_err(|_| ServiceError::Timeout(self.timeout))?;
        QueryMetrics::record(A::NAME, started.elapsed());
        Ok(result?)
    }

    fn stamp(&self, mut aggregate: A) -> A {
        if self.service_address.is_some() {
            aggregate.set_service_address(self.service_address.clone());
        }
        aggregate
    }
}
