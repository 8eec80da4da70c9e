//! Read API for aggregates.
//!
//! Handlers are generic over the aggregate; the router mounts them under the
//! aggregate's name (`/product/1`, `/recommendation?productId=1`).

use axum::{
    Json,
    extract::{OriginalUri, Path, Query, State},
};
use microservices_core::aggregate::Aggregate;
use microservices_runtime::{AggregateQueryService, parse_id};
use std::collections::HashMap;

use crate::error::AppError;

/// All aggregates of one subject.
///
/// # Endpoint
///
/// ```text
/// GET /recommendation?productId=1[&page=0&size=10]
/// ```
///
/// An unknown subject yields `[]`.
///
/// # Errors
///
/// 400 for a missing or non-integer `productId`, 422 for out-of-range values,
/// 408 on timeout, 503 when storage is down.
pub async fn list_by_subject<A: Aggregate>(
    State(queries): State<AggregateQueryService<A>>,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<A>>, AppError> {
    queries
        .list_by_subject(&params)
        .await
        .map(Json)
        .map_err(|e| AppError::from(e).at(uri.path()))
}

/// The single aggregate stored under a subject id.
///
/// # Endpoint
///
/// ```text
/// GET /product/{productId}
/// ```
///
/// # Errors
///
/// 400 for a non-integer id, 422 for an id below 1, 404 when absent.
pub async fn get_by_subject<A: Aggregate>(
    State(queries): State<AggregateQueryService<A>>,
    OriginalUri(uri): OriginalUri,
    Path(raw_id): Path<String>,
) -> Result<Json<A>, AppError> {
    let result = match parse_id(A::SUBJECT_PARAM, Some(&raw_id)) {
        Ok(id) => queries.get_by_subject(id).await,
        Err(e) => Err(e),
    };

    result
        .map(Json)
        .map_err(|e| AppError::from(e).at(uri.path()))
}
