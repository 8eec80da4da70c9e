//! Registry endpoints in the Eureka REST layout.
//!
//! | Method   | Path                                  | Effect       |
//! |----------|---------------------------------------|--------------|
//! | `GET`    | `/eureka/apps`                        | catalog      |
//! | `GET`    | `/eureka/apps/{app}`                  | one app      |
//! | `POST`   | `/eureka/apps/{app}`                  | register     |
//! | `PUT`    | `/eureka/apps/{app}/{id}`             | heartbeat    |
//! | `PUT`    | `/eureka/apps/{app}/{id}/status?value=UP` | set status |
//! | `DELETE` | `/eureka/apps/{app}/{id}`             | deregister   |

use axum::{
    Json,
    extract::{OriginalUri, Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use microservices_core::environment::Clock;
use microservices_registry::{
    ApplicationView, Catalog, CatalogMode, InstanceInfo, InstanceStatus, Registration,
    RegistryError, ServiceRegistry,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AppError;

/// Registration payload: the instance wrapped in an `instance` field.
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// The registering instance.
    pub instance: Registration,
}

/// Query parameters of the catalog endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct CatalogParams {
    /// `all` to include instances that are not `UP`.
    pub mode: Option<String>,
}

/// Query parameters of the status endpoint.
#[derive(Debug, Deserialize)]
pub struct StatusParams {
    /// New status, e.g. `UP`.
    pub value: Option<String>,
}

/// Full catalog. Only `UP` instances unless `?mode=all`.
pub async fn catalog<C: Clock + 'static>(
    State(registry): State<Arc<ServiceRegistry<C>>>,
    Query(params): Query<CatalogParams>,
) -> Json<Catalog> {
    let mode = match params.mode.as_deref() {
        Some(mode) if mode.eq_ignore_ascii_case("all") => CatalogMode::All,
        _ => CatalogMode::UpOnly,
    };
    Json(registry.catalog(mode))
}

/// One application with all of its live instances.
///
/// # Errors
///
/// 404 when the application has no live instance.
pub async fn application<C: Clock + 'static>(
    State(registry): State<Arc<ServiceRegistry<C>>>,
    OriginalUri(uri): OriginalUri,
    Path(app): Path<String>,
) -> Result<Json<ApplicationView>, AppError> {
    registry
        .application(&app)
        .map(Json)
        .map_err(|e| AppError::from(e).at(uri.path()))
}

/// Register an instance of `app`. Answers `204 No Content`.
///
/// The application name comes from the path; a body naming a different
/// application is rejected.
///
/// # Errors
///
/// 400 for an unreadable body, a blank instance id or an application
/// mismatch.
pub async fn register<C: Clock + 'static>(
    State(registry): State<Arc<ServiceRegistry<C>>>,
    OriginalUri(uri): OriginalUri,
    Path(app): Path<String>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Json(RegisterRequest { mut instance }) =
        body.map_err(|e| AppError::bad_request(e.body_text()).at(uri.path()))?;

    if instance.app.is_empty() {
        instance.app.clone_from(&app);
    } else if !instance.app.eq_ignore_ascii_case(&app) {
        let error = RegistryError::InvalidRegistration(format!(
            "application {} does not match path {app}",
            instance.app
        ));
        return Err(AppError::from(error).at(uri.path()));
    }

    registry
        .register(instance)
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| AppError::from(e).at(uri.path()))
}

/// Renew the lease of an instance.
///
/// # Errors
///
/// 404 when the instance is unknown, expired, `DOWN`, or registered under a
/// different application. The client answers a 404 by registering again.
pub async fn heartbeat<C: Clock + 'static>(
    State(registry): State<Arc<ServiceRegistry<C>>>,
    OriginalUri(uri): OriginalUri,
    Path((app, id)): Path<(String, String)>,
) -> Result<Json<InstanceInfo>, AppError> {
    owned_by(&registry, &app, &id)
        .and_then(|()| registry.heartbeat(&id))
        .map(Json)
        .map_err(|e| AppError::from(e).at(uri.path()))
}

/// Change the status of an instance.
///
/// # Errors
///
/// 400 for a missing or unknown status, 404 for an unknown instance.
pub async fn set_status<C: Clock + 'static>(
    State(registry): State<Arc<ServiceRegistry<C>>>,
    OriginalUri(uri): OriginalUri,
    Path((app, id)): Path<(String, String)>,
    Query(params): Query<StatusParams>,
) -> Result<Json<InstanceInfo>, AppError> {
    let status = params
        .value
        .as_deref()
        .ok_or_else(|| RegistryError::InvalidStatus(String::new()))
        .and_then(str::parse::<InstanceStatus>);

    status
        .and_then(|status| owned_by(&registry, &app, &id).map(|()| status))
        .and_then(|status| registry.set_status(&id, status))
        .map(Json)
        .map_err(|e| AppError::from(e).at(uri.path()))
}

/// Remove an instance. Answers `200 OK`.
///
/// # Errors
///
/// 404 for an unknown instance.
pub async fn deregister<C: Clock + 'static>(
    State(registry): State<Arc<ServiceRegistry<C>>>,
    OriginalUri(uri): OriginalUri,
    Path((app, id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    owned_by(&registry, &app, &id)
        .and_then(|()| registry.deregister(&id))
        .map(|_| StatusCode::OK)
        .map_err(|e| AppError::from(e).at(uri.path()))
}

/// The registry is keyed by instance id; the path also names the application.
/// A live instance registered under another application is unknown here.
/// Absent ids pass through so the registry reports them itself.
fn owned_by<C: Clock>(
    registry: &ServiceRegistry<C>,
    app: &str,
    id: &str,
) -> Result<(), RegistryError> {
    match registry.instance(id) {
        Some(info) if !info.app.eq_ignore_ascii_case(app) => {
            Err(RegistryError::UnknownInstance(id.to_string()))
        },
        _ => Ok(()),
    }
}
