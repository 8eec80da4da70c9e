//! Registered service instances.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::RegistryError;

/// Lifecycle status of an instance, as reported by the instance itself.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    /// Ready to receive traffic.
    Up,
    /// Not serving; must re-register before heartbeats are accepted again.
    Down,
    /// Registered but still initialising.
    Starting,
    /// Deliberately taken out of rotation.
    OutOfService,
    /// Status not known.
    Unknown,
}

impl InstanceStatus {
    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Starting => "STARTING",
            Self::OutOfService => "OUT_OF_SERVICE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UP" => Ok(Self::Up),
            "DOWN" => Ok(Self::Down),
            "STARTING" => Ok(Self::Starting),
            "OUT_OF_SERVICE" => Ok(Self::OutOfService),
            "UNKNOWN" => Ok(Self::Unknown),
            _ => Err(RegistryError::InvalidStatus(s.to_string())),
        }
    }
}

/// What an instance sends when it registers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// Unique id of the instance, e.g. `recommendation:7002:3f2a`.
    pub instance_id: String,
    /// Application name; upper-cased on registration. May be left out when
    /// the application is named by the request path.
    #[serde(default)]
    pub app: String,
    /// Host the instance listens on.
    pub host_name: String,
    /// Port the instance listens on.
    pub port: u16,
    /// Initial status; `STARTING` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InstanceStatus>,
    /// Free-form key/value pairs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Registration {
    /// Registration for `app` at `host_name:port`.
    #[must_use]
    pub fn new(
        instance_id: impl Into<String>,
        app: impl Into<String>,
        host_name: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            app: app.into(),
            host_name: host_name.into(),
            port,
            status: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Register directly with the given status.
    #[must_use]
    pub const fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A service instance as held by the registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    /// Unique id of the instance.
    pub instance_id: String,
    /// Upper-cased application name.
    pub app: String,
    /// Host the instance listens on.
    pub host_name: String,
    /// Port the instance listens on.
    pub port: u16,
    /// Current status.
    pub status: InstanceStatus,
    /// Free-form key/value pairs.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// When the instance (last) registered.
    pub registered_at: DateTime<Utc>,
    /// Last accepted heartbeat.
    pub last_heartbeat: DateTime<Utc>,
    /// Last status or registration change.
    pub last_updated: DateTime<Utc>,
}

impl InstanceInfo {
    /// Build the stored record for a registration received at `now`.
    #[must_use]
    pub fn from_registration(registration: Registration, now: DateTime<Utc>) -> Self {
        Self {
            instance_id: registration.instance_id,
            app: registration.app.to_ascii_uppercase(),
            host_name: registration.host_name,
            port: registration.port,
            status: registration.status.unwrap_or(InstanceStatus::Starting),
            metadata: registration.metadata,
            registered_at: now,
            last_heartbeat: now,
            last_updated: now,
        }
    }

    /// `host:port` of the instance.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host_name, self.port)
    }

    /// Whether the lease ran out: no heartbeat within `lease` before `now`.
    ///
    /// A lease whose deadline lies past the representable range never expires.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        self.last_heartbeat
            .checked_add_signed(lease)
            .is_some_and(|deadline| deadline < now)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_wire_names() {
        for status in [
            InstanceStatus::Up,
            InstanceStatus::Down,
            InstanceStatus::Starting,
            InstanceStatus::OutOfService,
            InstanceStatus::Unknown,
        ] {
            assert_eq!(status.as_str().parse::<InstanceStatus>().unwrap(), status);
            assert_eq!(
                serde_json::to_string(&status).unwrap(),
                format!("\"{}\"", status.as_str())
            );
        }
    }

    #[test]
    fn status_parse_is_case_insensitive() {
        assert_eq!("up".parse::<InstanceStatus>().unwrap(), InstanceStatus::Up);
        assert!(matches!(
            "SLEEPING".parse::<InstanceStatus>(),
            Err(RegistryError::InvalidStatus(_))
        ));
    }

    #[test]
    fn registration_defaults_to_starting_and_uppercases_app() {
        let now = Utc::now();
        let info = InstanceInfo::from_registration(
            Registration::new("r-1", "recommendation", "localhost", 7002),
            now,
        );

        assert_eq!(info.app, "RECOMMENDATION");
        assert_eq!(info.status, InstanceStatus::Starting);
        assert_eq!(info.address(), "localhost:7002");
        assert_eq!(info.last_heartbeat, now);
    }

    #[test]
    fn lease_boundary_is_not_expired() {
        let now = Utc::now();
        let info = InstanceInfo::from_registration(Registration::new("r-1", "a", "h", 1), now);
        let lease = Duration::seconds(90);

        assert!(!info.is_expired(now + lease, lease));
        assert!(info.is_expired(now + lease + Duration::seconds(1), lease));
    }

    #[test]
    fn unbounded_lease_never_expires() {
        let now = Utc::now();
        let info = InstanceInfo::from_registration(Registration::new("r-1", "a", "h", 1), now);

        assert!(!info.is_expired(now + Duration::days(365 * 1000), Duration::MAX));
    }
}
