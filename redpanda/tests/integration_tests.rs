//! Integration tests for [`RedpandaEventBus`] against a real Kafka broker.
//!
//! Marked `#[ignore]`: they need Docker and take a while to start the broker.
//!
//! ```bash
//! cargo test -p microservices-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use futures::StreamExt;
use microservices_core::event::SerializedEvent;
use microservices_core::event_bus::{EventBus, EventStream};
use microservices_redpanda::RedpandaEventBus;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

fn create_event(key: i32) -> SerializedEvent {
    SerializedEvent::new(
        "CREATE",
        key.to_string(),
        Some(serde_json::json!({ "productId": key, "name": format!("Product {key}"), "weight": key })),
    )
}

/// Start a broker and return it with its bootstrap address once it accepts writes.
async fn start_broker() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");

    let max_attempts = 60;
    for attempt in 1..=max_attempts {
        if let Ok(bus) = RedpandaEventBus::new(&brokers) {
            if bus.publish("warmup", &create_event(0)).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(500)).await;
                return (kafka, brokers);
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            attempt != max_attempts,
            "Kafka failed to become ready after {max_attempts} attempts"
        );
    }
    unreachable!("readiness loop either returns or panics")
}

async fn receive(stream: &mut EventStream, count: usize) -> Vec<SerializedEvent> {
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(15), async {
        while received.len() < count {
            if let Some(result) = stream.next().await {
                let delivery = result.expect("Failed to receive delivery");
                received.push(delivery.event().clone());
                delivery.ack();
            }
        }
    })
    .await
    .expect("Timeout waiting for events");
    received
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn published_events_arrive_as_deliveries() {
    let (_kafka, brokers) = start_broker().await;
    let event_bus = RedpandaEventBus::builder()
        .brokers(&brokers)
        .consumer_group("round-trip")
        .build()
        .expect("Failed to create event bus");

    event_bus.publish("products", &create_event(1)).await.expect("publish");
    event_bus
        .publish("products", &SerializedEvent::new("DELETE", "1", None))
        .await
        .expect("publish");

    let mut stream = event_bus.subscribe(&["products"]).await.expect("subscribe");
    let received = receive(&mut stream, 2).await;

    assert_eq!(received[0].event_type, "CREATE");
    assert_eq!(received[0].key, "1");
    assert_eq!(received[1].event_type, "DELETE");
    assert!(received[1].data.is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn events_with_one_key_keep_their_order() {
    let (_kafka, brokers) = start_broker().await;
    let event_bus = RedpandaEventBus::builder()
        .brokers(&brokers)
        .consumer_group("ordering")
        .build()
        .expect("Failed to create event bus");

    for weight in 0..5 {
        let event = SerializedEvent::new(
            "CREATE",
            "7",
            Some(serde_json::json!({ "productId": 7, "name": "p", "weight": weight })),
        );
        event_bus.publish("ordering", &event).await.expect("publish");
    }

    let mut stream = event_bus.subscribe(&["ordering"]).await.expect("subscribe");
    let received = receive(&mut stream, 5).await;

    for (weight, event) in received.iter().enumerate() {
        let data = event.data.as_ref().expect("CREATE carries data");
        assert_eq!(data["weight"], serde_json::json!(weight));
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn ping_reaches_broker() {
    let (_kafka, brokers) = start_broker().await;
    let event_bus = RedpandaEventBus::new(&brokers).expect("Failed to create event bus");

    event_bus.ping().await.expect("ping");
    assert_eq!(event_bus.brokers(), brokers);
}
