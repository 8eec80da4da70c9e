//! Health reporting.
//!
//! Each live dependency (storage, bus) is a [`HealthIndicator`]. The health
//! endpoint runs all indicators and reports the worst status:
//!
//! ```json
//! { "status": "UP" }
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Health status of a component or the whole service.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthStatus {
    /// Component is working.
    Up,
    /// Component is unreachable or failing.
    Down,
}

impl HealthStatus {
    /// Check if status is up
    #[must_use]
    pub const fn is_up(self) -> bool {
        matches!(self, Self::Up)
    }

    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Down, _) | (_, Self::Down) => Self::Down,
            _ => Self::Up,
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    pub message: Option<String>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn up(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Up,
            message: None,
        }
    }

    /// Create an unhealthy check result
    #[must_use]
    pub fn down(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Down,
            message: Some(message.into()),
        }
    }
}

/// Aggregated health report
///
/// Combines multiple health checks into an overall status.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Overall status (worst of all checks)
    pub status: HealthStatus,

    /// Individual component checks
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    /// Create a new health report from checks. No checks means `UP`.
    #[must_use]
    pub fn new(checks: Vec<HealthCheck>) -> Self {
        let status = checks
            .iter()
            .map(|c| c.status)
            .fold(HealthStatus::Up, HealthStatus::worst);

        Self { status, checks }
    }

    /// Check if overall status is up
    #[must_use]
    pub const fn is_up(&self) -> bool {
        self.status.is_up()
    }
}

/// A dependency whose liveness feeds the health endpoint.
pub trait HealthIndicator: Send + Sync {
    /// Run the check.
    fn check(&self) -> Pin<Box<dyn Future<Output = HealthCheck> + Send + '_>>;
}

/// Run every indicator and fold the results into one report.
pub async fn check_all(indicators: &[std::sync::Arc<dyn HealthIndicator>]) -> HealthReport {
    let checks = futures::future::join_all(indicators.iter().map(|i| i.check())).await;
    HealthReport::new(checks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Fixed(HealthCheck);

    impl HealthIndicator for Fixed {
        fn check(&self) -> Pin<Box<dyn Future<Output = HealthCheck> + Send + '_>> {
            let check = self.0.clone();
            Box::pin(async move { check })
        }
    }

    #[test]
    fn worst_status_wins() {
        assert_eq!(HealthStatus::Up.worst(HealthStatus::Down), HealthStatus::Down);
        assert_eq!(HealthStatus::Up.worst(HealthStatus::Up), HealthStatus::Up);
    }

    #[test]
    fn empty_report_is_up() {
        assert!(HealthReport::new(Vec::new()).is_up());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn status_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&HealthStatus::Up).unwrap(), "\"UP\"");
        assert_eq!(serde_json::to_string(&HealthStatus::Down).unwrap(), "\"DOWN\"");
    }

    #[tokio::test]
    async fn one_down_indicator_takes_report_down() {
        let indicators: Vec<Arc<dyn HealthIndicator>> = vec![
            Arc::new(Fixed(HealthCheck::up("storage"))),
            Arc::new(Fixed(HealthCheck::down("bus", "no brokers"))),
        ];

        let report = check_all(&indicators).await;
        assert_eq!(report.status, HealthStatus::Down);
        assert_eq!(report.checks.len(), 2);
    }
}
