//! # Microservices Registry
//!
//! Single-node service registry. Instances register, send heartbeats to keep
//! their lease alive, change status, and disappear when they deregister or
//! stop heartbeating for longer than the lease.
//!
//! ## Lifecycle
//!
//! ```text
//! register ──► STARTING ──set_status──► UP ◄──heartbeat──┐
//!                                        │                │
//!                                        └────────────────┘
//!                        DOWN ──heartbeat──► RegistrationRequired
//!              (no heartbeat for lease) ──► evicted
//! ```
//!
//! The catalog is rendered in the Eureka JSON layout so existing discovery
//! clients can read it unchanged.

mod catalog;
mod error;
mod instance;
mod registry;

pub use catalog::{Application, ApplicationView, Applications, Catalog, CatalogMode};
pub use error::RegistryError;
pub use instance::{InstanceInfo, InstanceStatus, Registration};
pub use registry::{LeaseConfig, MIN_EVICTION_INTERVAL, ServiceRegistry, spawn_sweeper};
