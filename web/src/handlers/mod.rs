//! HTTP request handlers.
//!
//! This module contains all HTTP handlers organized by domain.

pub mod aggregates;
pub mod health;
pub mod registry;

pub use health::health_check;
