//! The registry client against a registry served on an ephemeral port.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use microservices_registry::{CatalogMode, InstanceStatus, Registration, ServiceRegistry};
use microservices_server::{RegistryClient, Renewal};
use microservices_web::routes;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

async fn serve_registry() -> (Arc<ServiceRegistry>, String) {
    let registry = Arc::new(ServiceRegistry::new());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let app = routes::registry_routes(Arc::clone(&registry));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (registry, format!("http://{address}"))
}

fn client(base_url: &str) -> RegistryClient {
    RegistryClient::new(
        base_url,
        Registration::new("rec-1", "recommendation", "localhost", 7002),
    )
}

#[tokio::test]
async fn announce_renew_deregister() {
    let (registry, url) = serve_registry().await;
    let client = client(&url);

    client.announce().await.unwrap();
    let catalog = registry.catalog(CatalogMode::UpOnly);
    assert_eq!(catalog.applications.application[0].name, "RECOMMENDATION");
    assert_eq!(
        registry.instance("rec-1").unwrap().status,
        InstanceStatus::Up
    );

    assert_eq!(client.renew().await.unwrap(), Renewal::Renewed);

    client.deregister().await.unwrap();
    assert!(registry.is_empty());
    assert_eq!(client.renew().await.unwrap(), Renewal::NotRegistered);

    // Deregistering twice is harmless.
    client.deregister().await.unwrap();
}

#[tokio::test]
async fn down_instance_must_register_again() {
    let (registry, url) = serve_registry().await;
    let client = client(&url);

    client.announce().await.unwrap();
    registry.set_status("rec-1", InstanceStatus::Down).unwrap();

    assert_eq!(client.renew().await.unwrap(), Renewal::NotRegistered);
}

#[tokio::test]
async fn background_task_registers_and_deregisters_on_shutdown() {
    let (registry, url) = serve_registry().await;
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = client(&url).spawn(Duration::from_millis(20), shutdown_rx);

    tokio::time::timeout(Duration::from_secs(5), async {
        while registry.instance("rec-1").map(|i| i.status) != Some(InstanceStatus::Up) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("instance never came up");

    // A registry restart forgets the instance; the next tick registers again.
    registry.deregister("rec-1").unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while registry.instance("rec-1").is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("instance never re-registered");

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("client did not stop")
        .unwrap();
    assert!(registry.is_empty());
}

#[tokio::test]
async fn unreachable_registry_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    assert!(client(&url).announce().await.is_err());
}
