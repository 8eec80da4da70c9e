//! `PostgreSQL` aggregate repository for the microservices core.
//!
//! [`PostgresRepository`] implements
//! [`AggregateRepository`](microservices_core::repository::AggregateRepository)
//! on top of an sqlx connection pool. Each aggregate type gets its own table,
//! created by [`PostgresRepository::ensure_schema`]:
//!
//! - Natural-key uniqueness is enforced by a unique index
//! - Updates compare-and-swap on the stored version
//! - Subject reads stream rows in insertion order
//!
//! # Example
//!
//! ```ignore
//! use microservices_core::domain::Product;
//! use microservices_postgres::{PoolSettings, PostgresRepository, connect};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = connect(&PoolSettings::new("postgres://localhost/products")).await?;
//!     let repo = PostgresRepository::<Product>::new(pool);
//!     repo.ensure_schema().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod repository;

pub use repository::{PoolSettings, PostgresRepository, connect};
pub use sqlx::PgPool;
