//! HTTP surface of the microservices core, built on axum.
//!
//! Handlers are thin: they extract parameters, call the query service or the
//! registry, and turn typed errors into [`AppError`] responses.
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives at an axum handler
//! 2. **Extract** path, query parameters or JSON body
//! 3. **Call** `AggregateQueryService` or `ServiceRegistry`
//! 4. **Map** the result or the typed error to an HTTP response
//!
//! # Example
//!
//! ```ignore
//! use microservices_web::routes;
//!
//! let app = routes::with_observability(
//!     routes::subject_routes(recommendation_queries)
//!         .merge(routes::health_routes(indicators)),
//! );
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod routes;

pub use error::{AppError, ErrorResponse};
pub use handlers::health::{ComponentHealth, HealthResponse};
pub use handlers::registry::RegisterRequest;
