//! Integration tests for [`RedpandaEventBus`] against a real Kafka broker.
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` because they need Docker and take
//! a while to start the broker:
//!
//! ```bash
//! cargo test -p shipkafka-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use chrono::Utc;
use futures::StreamExt;
use shipkafka_core::event::SerializedEvent;
use shipkafka_core::event_bus::{Delivery, EventBus, EventStream};
use shipkafka_core::{Booking, BookingStatus, ShipDamaged, ShipId, ShippingEvent, Topic};
use shipkafka_redpanda::RedpandaEventBus;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "false")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

/// Provision the saga topics, retrying until the broker accepts admin calls.
async fn provisioned_bus(brokers: &str) -> RedpandaEventBus {
    let bus = RedpandaEventBus::builder()
        .brokers(brokers)
        .build()
        .expect("Failed to create event bus");

    for attempt in 1..=60 {
        if bus.ensure_topics(3).await.is_ok() {
            // Let topic metadata propagate before producing.
            tokio::time::sleep(Duration::from_secs(2)).await;
            return bus;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(attempt != 60, "Kafka failed to accept topic creation");
    }
    bus
}

fn envelope(event: &ShippingEvent) -> SerializedEvent {
    event.to_envelope().expect("encodes")
}

async fn next_delivery(stream: &mut EventStream) -> Delivery {
    tokio::time::timeout(Duration::from_secs(20), stream.next())
        .await
        .expect("Timeout waiting for event")
        .expect("Stream ended")
        .expect("Failed to receive event")
}

/// Receive, decode and settle the next message.
async fn next_event(stream: &mut EventStream) -> ShippingEvent {
    let delivery = next_delivery(stream).await;
    let event = ShippingEvent::from_envelope(&delivery.event).expect("decodes");
    delivery.settle();
    event
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn ensure_topics_is_idempotent() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = provisioned_bus(&brokers).await;

    bus.ensure_topics(3)
        .await
        .expect("Existing topics are not an error");
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn messages_for_one_booking_arrive_in_order() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = provisioned_bus(&brokers).await;

    let mut booking = Booking::new(ShipId::new(), 2, Utc::now());
    let created = ShippingEvent::BookingCreated(booking.clone());
    booking
        .update_status(BookingStatus::Confirmed, Utc::now())
        .expect("legal transition");
    let outcome = ShippingEvent::BookingOutcome(booking.clone());

    let created_topic = Topic::BookingCreated.name();
    bus.publish(created_topic, &envelope(&created))
        .await
        .expect("publish created");
    bus.publish(created_topic, &envelope(&outcome))
        .await
        .expect("publish second");

    let mut stream = bus
        .subscribe(&[created_topic], "ship")
        .await
        .expect("Failed to subscribe");

    assert_eq!(next_event(&mut stream).await, created);
    assert_eq!(next_event(&mut stream).await, outcome);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn each_group_sees_every_broadcast() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = provisioned_bus(&brokers).await;

    let damaged = ShippingEvent::ShipDamaged(ShipDamaged {
        ship_id: ShipId::new(),
    });
    let topic = Topic::ShipDamaged.name();
    bus.publish(topic, &envelope(&damaged))
        .await
        .expect("publish damage");

    let mut booking_side = bus.subscribe(&[topic], "booking").await.expect("subscribe");
    let mut audit_side = bus.subscribe(&[topic], "audit").await.expect("subscribe");

    assert_eq!(next_event(&mut booking_side).await, damaged);
    assert_eq!(next_event(&mut audit_side).await, damaged);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn group_resumes_after_committed_offset() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = provisioned_bus(&brokers).await;
    let topic = Topic::BookingOutcome.name();

    let first = ShippingEvent::BookingOutcome(Booking::new(ShipId::new(), 1, Utc::now()));
    bus.publish(topic, &envelope(&first)).await.expect("publish");

    {
        let mut stream = bus.subscribe(&[topic], "booking").await.expect("subscribe");
        assert_eq!(next_event(&mut stream).await, first);
        // Give the async commit time to land before leaving the group.
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    let second = ShippingEvent::BookingOutcome(Booking::new(ShipId::new(), 4, Utc::now()));
    bus.publish(topic, &envelope(&second)).await.expect("publish");

    let mut stream = bus.subscribe(&[topic], "booking").await.expect("resubscribe");
    assert_eq!(next_event(&mut stream).await, second);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn unsettled_message_is_read_again() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = provisioned_bus(&brokers).await;
    let topic = Topic::BookingCreated.name();

    let booking = ShippingEvent::BookingCreated(Booking::new(ShipId::new(), 2, Utc::now()));
    bus.publish(topic, &envelope(&booking)).await.expect("publish");

    {
        let mut stream = bus.subscribe(&[topic], "ship").await.expect("subscribe");
        let delivery = next_delivery(&mut stream).await;
        assert_eq!(ShippingEvent::from_envelope(&delivery.event).expect("decodes"), booking);
        // Left unsettled, as when the process stops before handling it.
        drop(delivery);
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    let mut stream = bus.subscribe(&[topic], "ship").await.expect("resubscribe");
    assert_eq!(next_event(&mut stream).await, booking);
}
