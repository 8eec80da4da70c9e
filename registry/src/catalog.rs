//! Catalog views in the Eureka JSON layout.
//!
//! An empty registry renders as:
//!
//! ```json
//! {"applications":{"versions__delta":"1","apps__hashcode":"","application":[]}}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::instance::{InstanceInfo, InstanceStatus};

/// Which instances a catalog read includes.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum CatalogMode {
    /// Only instances whose status is `UP`.
    #[default]
    UpOnly,
    /// Every live instance regardless of status.
    All,
}

impl CatalogMode {
    pub(crate) fn includes(self, status: InstanceStatus) -> bool {
        match self {
            Self::UpOnly => status == InstanceStatus::Up,
            Self::All => true,
        }
    }
}

/// Top-level catalog document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// The applications block.
    pub applications: Applications,
}

/// All applications with at least one matching instance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Applications {
    /// Catalog delta version; always `"1"` on a single node.
    #[serde(rename = "versions__delta")]
    pub versions_delta: String,
    /// Instance counts per status, e.g. `DOWN_1_UP_2_`.
    #[serde(rename = "apps__hashcode")]
    pub apps_hashcode: String,
    /// Applications sorted by name.
    pub application: Vec<Application>,
}

/// One application and its instances.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    /// Upper-cased application name.
    pub name: String,
    /// Instances sorted by id.
    pub instance: Vec<InstanceInfo>,
}

/// Single-application document served by `GET /eureka/apps/{app}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationView {
    /// The application.
    pub application: Application,
}

impl Catalog {
    /// Group instances into applications. Input order does not matter.
    #[must_use]
    pub fn from_instances(instances: impl IntoIterator<Item = InstanceInfo>) -> Self {
        let mut grouped: BTreeMap<String, Vec<InstanceInfo>> = BTreeMap::new();
        let mut counts: BTreeMap<InstanceStatus, usize> = BTreeMap::new();

        for instance in instances {
            *counts.entry(instance.status).or_default() += 1;
            grouped.entry(instance.app.clone()).or_default().push(instance);
        }

        let mut by_name: Vec<(&'static str, usize)> =
            counts.into_iter().map(|(s, n)| (s.as_str(), n)).collect();
        by_name.sort_unstable();
        let apps_hashcode = by_name
            .into_iter()
            .map(|(status, count)| format!("{status}_{count}_"))
            .collect();

        let application = grouped
            .into_iter()
            .map(|(name, mut instance)| {
                instance.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
                Application { name, instance }
            })
            .collect();

        Self {
            applications: Applications {
                versions_delta: "1".to_string(),
                apps_hashcode,
                application,
            },
        }
    }

    /// Total number of instances in the catalog.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.applications
            .application
            .iter()
            .map(|app| app.instance.len())
            .sum()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::instance::Registration;
    use chrono::Utc;

    fn instance(id: &str, app: &str, status: InstanceStatus) -> InstanceInfo {
        InstanceInfo::from_registration(
            Registration::new(id, app, "localhost", 8080).with_status(status),
            Utc::now(),
        )
    }

    #[test]
    fn empty_catalog_has_exact_shape() {
        let json = serde_json::to_string(&Catalog::from_instances(Vec::new())).unwrap();
        assert_eq!(
            json,
            r#"{"applications":{"versions__delta":"1","apps__hashcode":"","application":[]}}"#
        );
    }

    #[test]
    fn applications_are_sorted_and_hashcode_counts_statuses() {
        let catalog = Catalog::from_instances(vec![
            instance("r-2", "review", InstanceStatus::Up),
            instance("p-1", "product", InstanceStatus::Down),
            instance("r-1", "review", InstanceStatus::Up),
        ]);

        let names: Vec<&str> = catalog
            .applications
            .application
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(names, vec!["PRODUCT", "REVIEW"]);
        assert_eq!(catalog.applications.apps_hashcode, "DOWN_1_UP_2_");
        assert_eq!(catalog.instance_count(), 3);

        let review_ids: Vec<&str> = catalog.applications.application[1]
            .instance
            .iter()
            .map(|i| i.instance_id.as_str())
            .collect();
        assert_eq!(review_ids, vec!["r-1", "r-2"]);
    }

    #[test]
    fn up_only_mode_filters_statuses() {
        assert!(CatalogMode::UpOnly.includes(InstanceStatus::Up));
        assert!(!CatalogMode::UpOnly.includes(InstanceStatus::Starting));
        assert!(CatalogMode::All.includes(InstanceStatus::OutOfService));
    }
}
