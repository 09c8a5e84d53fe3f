//! Booking authority behaviour against in-memory collaborators.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code

use shipkafka_booking::{
    BookingError, BookingOutcomeDeadLetter, BookingOutcomeListener, BookingService,
    ShipDamagedDeadLetter, ShipDamagedListener,
};
use shipkafka_core::dead_letter::DeadLetterStatus;
use shipkafka_core::fault::NoFaults;
use shipkafka_core::saga::SagaStep;
use shipkafka_core::{Booking, BookingStatus, CustomerId, ShipDamaged, ShipId, ShippingEvent, Topic};
use shipkafka_runtime::{DeliveryOutcome, HandlerError, Publisher, Redelivery, RetryPolicy};
use shipkafka_testing::mocks::{
    AlwaysFail, FailFirst, InMemoryBookingRepository, InMemoryDeadLetterStore, InMemoryEventBus,
    InMemorySagaLog, test_clock,
};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    service: BookingService,
    repository: Arc<InMemoryBookingRepository>,
    saga: Arc<InMemorySagaLog>,
    bus: InMemoryEventBus,
}

fn harness() -> Harness {
    let repository = Arc::new(InMemoryBookingRepository::new());
    let saga = Arc::new(InMemorySagaLog::new());
    let bus = InMemoryEventBus::new();
    let service = BookingService::new(
        repository.clone(),
        saga.clone(),
        Publisher::new(Arc::new(bus.clone())),
        Arc::new(test_clock()),
    );
    Harness {
        service,
        repository,
        saga,
        bus,
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy::builder()
        .max_attempts(3)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(4))
        .build()
}

fn decided(booking: &Booking, status: BookingStatus) -> Booking {
    let mut snapshot = booking.clone();
    snapshot.update_status(status, chrono::Utc::now()).unwrap();
    snapshot
}

#[tokio::test]
async fn add_booking_stores_and_announces_the_booking() {
    let h = harness();
    let customer = h.service.add_customer("Jane", "Doe").await.unwrap();
    let ship = ShipId::new();

    let booking = h.service.add_booking(customer.id, ship, 3).await.unwrap();

    assert_eq!(booking.status(), BookingStatus::Requested);
    assert_eq!(booking.version, 1);
    let customer = h.service.get_customer(customer.id).await.unwrap();
    assert_eq!(customer.bookings, vec![booking.id]);

    let published = h.bus.published(Topic::BookingCreated.name());
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].key, Some(booking.id.key()));
    assert_eq!(
        h.bus.published_events(Topic::BookingCreated.name()),
        vec![ShippingEvent::BookingCreated(booking.clone())]
    );

    let steps: Vec<SagaStep> = h.saga.entries().await.into_iter().map(|e| e.step).collect();
    assert_eq!(steps, vec![SagaStep::Requested, SagaStep::Announced]);
}

#[tokio::test]
async fn unknown_customer_writes_nothing() {
    let h = harness();
    let missing = CustomerId::new();

    let result = h.service.add_booking(missing, ShipId::new(), 2).await;

    assert!(matches!(result, Err(BookingError::CustomerNotFound(id)) if id == missing));
    assert_eq!(h.repository.booking_count().await, 0);
    assert!(h.bus.published(Topic::BookingCreated.name()).is_empty());
    assert!(h.saga.entries().await.is_empty());
}

#[tokio::test]
async fn outcome_is_applied_once() {
    let h = harness();
    let customer = h.service.add_customer("Jane", "Smith").await.unwrap();
    let booking = h
        .service
        .add_booking(customer.id, ShipId::new(), 2)
        .await
        .unwrap();
    let outcome = decided(&booking, BookingStatus::Confirmed);

    let applied = h.service.process_booking(&outcome).await.unwrap();
    assert_eq!(applied.status(), BookingStatus::Confirmed);
    assert_eq!(applied.version, 2);

    let again = h.service.process_booking(&outcome).await;
    assert!(matches!(again, Err(BookingError::IllegalTransition(_))));
    assert_eq!(
        h.service.get_booking(booking.id).await.unwrap().version,
        2
    );
}

#[tokio::test]
async fn outcome_for_unknown_booking_is_not_found() {
    let h = harness();
    let stray = Booking::new(ShipId::new(), 1, chrono::Utc::now());

    let result = h.service.process_booking(&stray).await;
    assert!(matches!(result, Err(BookingError::BookingNotFound(id)) if id == stray.id));
}

#[tokio::test]
async fn cancel_bookings_without_bookings_is_a_no_op() {
    let h = harness();
    let canceled = h.service.cancel_bookings(ShipId::new()).await.unwrap();
    assert!(canceled.is_empty());
    assert!(h.saga.entries().await.is_empty());
}

#[tokio::test]
async fn cancel_bookings_cancels_requested_and_confirmed() {
    let h = harness();
    let customer = h.service.add_customer("Max", "Muster").await.unwrap();
    let ship = ShipId::new();
    let requested = h.service.add_booking(customer.id, ship, 1).await.unwrap();
    let confirmed = h.service.add_booking(customer.id, ship, 2).await.unwrap();
    h.service
        .process_booking(&decided(&confirmed, BookingStatus::Confirmed))
        .await
        .unwrap();
    let elsewhere = h
        .service
        .add_booking(customer.id, ShipId::new(), 1)
        .await
        .unwrap();

    let canceled = h.service.cancel_bookings(ship).await.unwrap();
    assert_eq!(canceled.len(), 2);

    for id in [requested.id, confirmed.id] {
        assert_eq!(
            h.service.get_booking(id).await.unwrap().status(),
            BookingStatus::Canceled
        );
    }
    assert_eq!(
        h.service.get_booking(elsewhere.id).await.unwrap().status(),
        BookingStatus::Requested
    );

    // Already canceled bookings are skipped on a second run.
    assert!(h.service.cancel_bookings(ship).await.unwrap().is_empty());
}

#[tokio::test]
async fn confirmed_filter_uses_status() {
    let h = harness();
    let customer = h.service.add_customer("Jane", "Miller").await.unwrap();
    let first = h
        .service
        .add_booking(customer.id, ShipId::new(), 1)
        .await
        .unwrap();
    h.service
        .add_booking(customer.id, ShipId::new(), 2)
        .await
        .unwrap();
    h.service
        .process_booking(&decided(&first, BookingStatus::Confirmed))
        .await
        .unwrap();

    let all = h.service.get_bookings(customer.id, false).await.unwrap();
    assert_eq!(all.len(), 2);

    let confirmed = h.service.get_bookings(customer.id, true).await.unwrap();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].id, first.id);

    assert!(matches!(
        h.service.get_bookings(CustomerId::new(), true).await,
        Err(BookingError::CustomerNotFound(_))
    ));
}

#[tokio::test]
async fn deleting_a_customer_removes_its_bookings() {
    let h = harness();
    let customer = h.service.add_customer("Jane", "Doe").await.unwrap();
    let booking = h
        .service
        .add_booking(customer.id, ShipId::new(), 1)
        .await
        .unwrap();

    h.service.delete_customer(customer.id).await.unwrap();

    assert!(matches!(
        h.service.get_booking(booking.id).await,
        Err(BookingError::BookingNotFound(_))
    ));
    assert!(h.service.get_customers().await.unwrap().is_empty());
}

#[tokio::test]
async fn damage_listener_recovers_after_injected_faults() {
    let h = harness();
    let customer = h.service.add_customer("Max", "Muster").await.unwrap();
    let ship = ShipId::new();
    let booking = h.service.add_booking(customer.id, ship, 1).await.unwrap();

    let faults = Arc::new(FailFirst::new(2));
    let redelivery = Redelivery::new(
        Topic::ShipDamaged.name(),
        "booking",
        fast_policy(),
        Arc::new(ShipDamagedListener::new(h.service.clone(), faults.clone())),
        Arc::new(ShipDamagedDeadLetter::new(h.service.clone())),
    );
    let event = ShippingEvent::ShipDamaged(ShipDamaged { ship_id: ship })
        .to_envelope()
        .unwrap();

    let outcome = redelivery.deliver(&event).await;

    assert_eq!(outcome, DeliveryOutcome::Handled { attempts: 3 });
    assert_eq!(faults.calls(), 3);
    assert_eq!(
        h.service.get_booking(booking.id).await.unwrap().status(),
        BookingStatus::Canceled
    );
}

#[tokio::test]
async fn damage_dead_letter_still_cancels() {
    let h = harness();
    let customer = h.service.add_customer("Max", "Muster").await.unwrap();
    let ship = ShipId::new();
    let booking = h.service.add_booking(customer.id, ship, 1).await.unwrap();

    let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
    let redelivery = Redelivery::new(
        Topic::ShipDamaged.name(),
        "booking",
        fast_policy(),
        Arc::new(ShipDamagedListener::new(
            h.service.clone(),
            Arc::new(AlwaysFail::new()),
        )),
        Arc::new(ShipDamagedDeadLetter::new(h.service.clone())),
    )
    .with_dead_letter_store(dead_letters.clone());
    let event = ShippingEvent::ShipDamaged(ShipDamaged { ship_id: ship })
        .to_envelope()
        .unwrap();

    let outcome = redelivery.deliver(&event).await;

    let DeliveryOutcome::DeadLettered {
        attempts,
        compensated,
        ..
    } = outcome
    else {
        panic!("expected dead letter, got {outcome:?}");
    };
    assert_eq!(attempts, 3);
    assert!(compensated);
    assert_eq!(
        h.service.get_booking(booking.id).await.unwrap().status(),
        BookingStatus::Canceled
    );

    let entries = dead_letters.all().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, DeadLetterStatus::Resolved);
}

#[tokio::test]
async fn damage_dead_letter_retries_a_conflicting_cancel() {
    let h = harness();
    let customer = h.service.add_customer("Max", "Muster").await.unwrap();
    let ship = ShipId::new();
    let requested = h.service.add_booking(customer.id, ship, 1).await.unwrap();
    let confirmed = h.service.add_booking(customer.id, ship, 2).await.unwrap();
    h.service
        .process_booking(&decided(&confirmed, BookingStatus::Confirmed))
        .await
        .unwrap();

    let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
    let redelivery = Redelivery::new(
        Topic::ShipDamaged.name(),
        "booking",
        fast_policy(),
        Arc::new(ShipDamagedListener::new(
            h.service.clone(),
            Arc::new(AlwaysFail::new()),
        )),
        Arc::new(ShipDamagedDeadLetter::new(h.service.clone())),
    )
    .with_dead_letter_store(dead_letters.clone());
    let event = ShippingEvent::ShipDamaged(ShipDamaged { ship_id: ship })
        .to_envelope()
        .unwrap();

    // The first cancel inside the dead-letter handler hits a concurrent write.
    h.repository.inject_conflicts(1);
    let outcome = redelivery.deliver(&event).await;

    let DeliveryOutcome::DeadLettered { compensated, .. } = outcome else {
        panic!("expected dead letter, got {outcome:?}");
    };
    assert!(compensated);
    for id in [requested.id, confirmed.id] {
        assert_eq!(
            h.service.get_booking(id).await.unwrap().status(),
            BookingStatus::Canceled
        );
    }

    let entries = dead_letters.all().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, DeadLetterStatus::Resolved);
}

#[tokio::test]
async fn duplicate_outcome_is_dead_lettered_without_retries() {
    let h = harness();
    let customer = h.service.add_customer("Jane", "Doe").await.unwrap();
    let booking = h
        .service
        .add_booking(customer.id, ShipId::new(), 2)
        .await
        .unwrap();
    let outcome = ShippingEvent::BookingOutcome(decided(&booking, BookingStatus::Confirmed))
        .to_envelope()
        .unwrap();

    let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
    let redelivery = Redelivery::new(
        Topic::BookingOutcome.name(),
        "booking",
        fast_policy(),
        Arc::new(BookingOutcomeListener::new(
            h.service.clone(),
            Arc::new(NoFaults),
        )),
        Arc::new(BookingOutcomeDeadLetter::new(h.service.clone())),
    )
    .with_dead_letter_store(dead_letters.clone());

    assert_eq!(
        redelivery.deliver(&outcome).await,
        DeliveryOutcome::Handled { attempts: 1 }
    );

    let duplicate = redelivery.deliver(&outcome).await;
    let DeliveryOutcome::DeadLettered {
        attempts,
        error,
        compensated,
        ..
    } = duplicate
    else {
        panic!("expected dead letter, got {duplicate:?}");
    };
    assert_eq!(attempts, 1);
    assert!(matches!(error, HandlerError::Permanent(_)));
    assert!(compensated);

    let booking = h.service.get_booking(booking.id).await.unwrap();
    assert_eq!(booking.status(), BookingStatus::Confirmed);
    assert_eq!(booking.version, 2);
    assert_eq!(dead_letters.all().await[0].status, DeadLetterStatus::Resolved);
}

#[tokio::test]
async fn contradicting_outcome_stays_pending() {
    let h = harness();
    let customer = h.service.add_customer("Jane", "Doe").await.unwrap();
    let booking = h
        .service
        .add_booking(customer.id, ShipId::new(), 2)
        .await
        .unwrap();
    h.service.cancel_bookings(booking.ship_id).await.unwrap();

    let late_confirm = ShippingEvent::BookingOutcome(decided(&booking, BookingStatus::Confirmed))
        .to_envelope()
        .unwrap();
    let dead_letters = Arc::new(InMemoryDeadLetterStore::new());
    let redelivery = Redelivery::new(
        Topic::BookingOutcome.name(),
        "booking",
        fast_policy(),
        Arc::new(BookingOutcomeListener::new(
            h.service.clone(),
            Arc::new(NoFaults),
        )),
        Arc::new(BookingOutcomeDeadLetter::new(h.service.clone())),
    )
    .with_dead_letter_store(dead_letters.clone());

    let outcome = redelivery.deliver(&late_confirm).await;
    assert!(matches!(
        outcome,
        DeliveryOutcome::DeadLettered {
            compensated: false,
            ..
        }
    ));
    assert_eq!(dead_letters.all().await[0].status, DeadLetterStatus::Pending);
}

#[tokio::test]
async fn outcome_conflict_is_retried() {
    let h = harness();
    let customer = h.service.add_customer("Jane", "Doe").await.unwrap();
    let booking = h
        .service
        .add_booking(customer.id, ShipId::new(), 2)
        .await
        .unwrap();
    h.repository.inject_conflicts(1);

    let redelivery = Redelivery::new(
        Topic::BookingOutcome.name(),
        "booking",
        fast_policy(),
        Arc::new(BookingOutcomeListener::new(
            h.service.clone(),
            Arc::new(NoFaults),
        )),
        Arc::new(BookingOutcomeDeadLetter::new(h.service.clone())),
    );
    let outcome = ShippingEvent::BookingOutcome(decided(&booking, BookingStatus::Canceled))
        .to_envelope()
        .unwrap();

    assert_eq!(
        redelivery.deliver(&outcome).await,
        DeliveryOutcome::Handled { attempts: 2 }
    );
    assert_eq!(
        h.service.get_booking(booking.id).await.unwrap().status(),
        BookingStatus::Canceled
    );
}
