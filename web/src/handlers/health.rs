//! Health check endpoint.
//!
//! Used by load balancers, the registry client and monitoring systems to
//! verify the service and its dependencies.

use axum::{Json, extract::State, http::StatusCode};
use microservices_core::health::{HealthIndicator, HealthStatus, check_all};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Indicators consulted by [`health_check`].
pub type HealthIndicators = Arc<Vec<Arc<dyn HealthIndicator>>>;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status: the worst of all components.
    pub status: HealthStatus,
    /// Per-component status.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, ComponentHealth>,
}

/// One component of a [`HealthResponse`].
#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component status.
    pub status: HealthStatus,
    /// Failure details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Health check endpoint.
///
/// # Endpoint
///
/// ```text
/// GET /actuator/health
/// ```
///
/// # Status Codes
///
/// - 200 OK: every dependency is up
/// - 503 Service Unavailable: at least one dependency is down
///
/// # Example
///
/// ```bash
/// curl http://localhost:7001/actuator/health
/// # {"status":"UP","components":{"postgres":{"status":"UP"}}}
/// ```
pub async fn health_check(
    State(indicators): State<HealthIndicators>,
) -> (StatusCode, Json<HealthResponse>) {
    let report = check_all(&indicators).await;

    let status = if report.is_up() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let components = report
        .checks
        .into_iter()
        .map(|check| {
            (
                check.component,
                ComponentHealth {
                    status: check.status,
                    message: check.message,
                },
            )
        })
        .collect();

    (
        status,
        Json(HealthResponse {
            status: report.status,
            components,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use microservices_core::health::HealthCheck;
    use std::future::Future;
    use std::pin::Pin;

    struct Fixed(HealthCheck);

    impl HealthIndicator for Fixed {
        fn check(&self) -> Pin<Box<dyn Future<Output = HealthCheck> + Send + '_>> {
            let check = self.0.clone();
            Box::pin(async move { check })
        }
    }

    #[tokio::test]
    async fn no_indicators_is_up() {
        let (status, Json(body)) = health_check(State(Arc::new(Vec::new()))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, HealthStatus::Up);
        assert!(body.components.is_empty());
    }

    #[tokio::test]
    async fn one_down_component_fails_the_check() {
        let indicators: Vec<Arc<dyn HealthIndicator>> = vec![
            Arc::new(Fixed(HealthCheck::up("postgres"))),
            Arc::new(Fixed(HealthCheck::down("redpanda", "broker unreachable"))),
        ];

        let (status, Json(body)) = health_check(State(Arc::new(indicators))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, HealthStatus::Down);
        assert_eq!(body.components["postgres"].status, HealthStatus::Up);
        assert_eq!(
            body.components["redpanda"].message.as_deref(),
            Some("broker unreachable")
        );
    }
}
