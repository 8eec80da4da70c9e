//! Error types for web handlers.
//!
//! Every failure leaves the service in the same JSON shape:
//!
//! ```json
//! {
//!   "timestamp": "2025-01-01T00:00:00Z",
//!   "path": "/recommendation",
//!   "status": 400,
//!   "error": "Bad Request",
//!   "message": "Required int parameter 'productId' is not present"
//! }
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use microservices_core::repository::RepositoryError;
use microservices_registry::RegistryError;
use microservices_runtime::ServiceError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Application error type for web handlers.
///
/// Built from the typed errors of the lower layers (`ServiceError`,
/// `RepositoryError`, `RegistryError`); the status code follows from the
/// variant. Handlers attach the request path with [`AppError::at`].
///
/// # Examples
///
/// ```ignore
/// async fn handler(OriginalUri(uri): OriginalUri) -> Result<Json<Product>, AppError> {
///     let product = queries.get_by_subject(id).await.map_err(|e| AppError::from(e).at(uri.path()))?;
///     Ok(Json(product))
/// }
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Request path the error belongs to
    path: String,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            path: String::new(),
            source: None,
        }
    }

    /// Create a new error with a source error.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach the request path reported in the body.
    #[must_use]
    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Create a 409 Conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    /// Create a 422 Unprocessable Entity error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    /// Create a 408 Request Timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::REQUEST_TIMEOUT, message)
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Create a 503 Service Unavailable error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// User-facing message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.status.as_u16(), self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// When the error was produced.
    pub timestamp: DateTime<Utc>,
    /// Request path.
    pub path: String,
    /// HTTP status code.
    pub status: u16,
    /// Canonical reason phrase of the status.
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    path = %self.path,
                    message = %self.message,
                    error = %source,
                    "Internal server error"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    path = %self.path,
                    message = %self.message,
                    "Internal server error"
                );
            }
        } else {
            tracing::debug!(status = %self.status, path = %self.path, message = %self.message, "Request rejected");
        }

        let body = ErrorResponse {
            timestamp: Utc::now(),
            path: self.path,
            status: self.status.as_u16(),
            error: self
                .status
                .canonical_reason()
                .unwrap_or("Unknown")
                .to_string(),
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::MissingParameter { .. } | ServiceError::TypeMismatch { .. } => {
                Self::bad_request(message)
            },
            ServiceError::InvalidParameter { .. }
            | ServiceError::InvalidInput(_)
            | ServiceError::UnsupportedEventType(_) => Self::validation(message),
            ServiceError::NotFound(_) => Self::not_found(message),
            ServiceError::Timeout(_) => Self::timeout(message),
            ServiceError::Repository(e) => Self::from(e),
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        let message = err.to_string();
        match err {
            RepositoryError::DuplicateKey { .. } | RepositoryError::VersionConflict { .. } => {
                Self::conflict(message)
            },
            RepositoryError::Database(_) => Self::unavailable("Storage is unavailable")
                .with_source(anyhow::anyhow!(message)),
            RepositoryError::Serialization(_) => Self::internal("An internal error occurred")
                .with_source(anyhow::anyhow!(message)),
        }
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        let message = err.to_string();
        match err {
            RegistryError::UnknownInstance(_)
            | RegistryError::UnknownApplication(_)
            | RegistryError::RegistrationRequired(_) => Self::not_found(message),
            RegistryError::InvalidRegistration(_) | RegistryError::InvalidStatus(_) => {
                Self::bad_request(message)
            },
        }
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}
