//! Registry error types.

use thiserror::Error;

/// Errors returned by [`ServiceRegistry`](crate::ServiceRegistry) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No live instance with this id.
    #[error("Unknown instance: {0}")]
    UnknownInstance(String),

    /// No application with this name has live instances.
    #[error("Unknown application: {0}")]
    UnknownApplication(String),

    /// The instance is `DOWN` and must register again before heartbeating.
    #[error("Instance {0} is DOWN and must re-register")]
    RegistrationRequired(String),

    /// The registration payload is unusable.
    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),

    /// A status value that is not one of the known statuses.
    #[error("Invalid status: {0}")]
    InvalidStatus(String),
}
