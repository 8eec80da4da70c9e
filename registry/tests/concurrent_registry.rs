//! Concurrency and lease properties of the registry.

#![allow(clippy::unwrap_used)]

use microservices_registry::{
    CatalogMode, InstanceStatus, LeaseConfig, Registration, RegistryError, ServiceRegistry,
};
use microservices_testing::{ManualClock, test_time};
use microservices_core::environment::Clock;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_heartbeats_on_distinct_instances_all_succeed() {
    let registry = Arc::new(ServiceRegistry::new());
    for i in 0..32 {
        registry
            .register(
                Registration::new(format!("review-{i}"), "review", "localhost", 7000 + i)
                    .with_status(InstanceStatus::Up),
            )
            .unwrap();
    }

    let mut handles = Vec::new();
    for i in 0..32 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            for _ in 0..50 {
                registry.heartbeat(&format!("review-{i}")).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(registry.catalog(CatalogMode::UpOnly).instance_count(), 32);
}

#[test]
fn reregistration_replaces_previous_record() {
    let clock = ManualClock::new(test_time());
    let registry = ServiceRegistry::with_clock(LeaseConfig::default(), clock.clone());

    registry
        .register(Registration::new("p-1", "product", "old-host", 7001))
        .unwrap();
    clock.advance(Duration::from_secs(10));
    registry
        .register(Registration::new("p-1", "product", "new-host", 7001).with_status(InstanceStatus::Up))
        .unwrap();

    let info = registry.instance("p-1").unwrap();
    assert_eq!(info.host_name, "new-host");
    assert_eq!(info.registered_at, clock.now());
    assert_eq!(registry.len(), 1);
}

#[test]
fn catalog_json_lists_instances_under_application() {
    let clock = ManualClock::new(test_time());
    let registry = ServiceRegistry::with_clock(LeaseConfig::default(), clock);
    registry
        .register(
            Registration::new("p-1", "product", "localhost", 7001)
                .with_status(InstanceStatus::Up)
                .with_metadata("zone", "a"),
        )
        .unwrap();

    let json = serde_json::to_value(registry.catalog(CatalogMode::UpOnly)).unwrap();
    let instance = &json["applications"]["application"][0]["instance"][0];

    assert_eq!(json["applications"]["apps__hashcode"], "UP_1_");
    assert_eq!(json["applications"]["application"][0]["name"], "PRODUCT");
    assert_eq!(instance["instanceId"], "p-1");
    assert_eq!(instance["status"], "UP");
    assert_eq!(instance["metadata"]["zone"], "a");
}

proptest! {
    /// Whatever heartbeat schedule an instance follows, it is visible exactly
    /// when its last heartbeat lies within the lease.
    #[test]
    fn visibility_follows_lease(gaps in prop::collection::vec(0u64..200, 1..10)) {
        let clock = ManualClock::new(test_time());
        let registry = ServiceRegistry::with_clock(LeaseConfig::default(), clock.clone());
        registry
            .register(Registration::new("p-1", "product", "localhost", 7001).with_status(InstanceStatus::Up))
            .unwrap();

        let mut alive = true;
        for gap in gaps {
            clock.advance(Duration::from_secs(gap));
            let visible = registry.catalog(CatalogMode::UpOnly).instance_count() == 1;
            prop_assert_eq!(visible, alive && gap <= 90);

            match registry.heartbeat("p-1") {
                Ok(_) => prop_assert!(alive && gap <= 90),
                Err(RegistryError::UnknownInstance(_)) => alive = false,
                Err(other) => prop_assert!(false, "unexpected error {other}"),
            }
        }
    }
}
