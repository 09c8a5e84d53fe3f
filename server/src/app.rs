//! Wiring of both authorities onto one event bus.
//!
//! | Consumer group | Topic | Listener |
//! |---|---|---|
//! | capacity (`ship`) | `booking-created` | [`BookingCreatedListener`] |
//! | booking | `booking-outcome` | [`BookingOutcomeListener`] |
//! | booking | `ship-damaged` | [`ShipDamagedListener`] |

use crate::config::Config;
use shipkafka_booking::{
    BookingOutcomeDeadLetter, BookingOutcomeListener, BookingService, ShipDamagedDeadLetter,
    ShipDamagedListener,
};
use shipkafka_capacity::{BookingCreatedDeadLetter, BookingCreatedListener, CapacityService};
use shipkafka_core::Topic;
use shipkafka_core::dead_letter::DeadLetterStore;
use shipkafka_core::environment::Clock;
use shipkafka_core::event_bus::EventBus;
use shipkafka_core::fault::{FaultInjector, NoFaults};
use shipkafka_core::saga::SagaLog;
use shipkafka_core::store::{BookingRepository, ShipRepository};
use shipkafka_runtime::{
    ConsumerError, DeadLetterHandler, EventConsumer, MessageHandler, Publisher, Redelivery,
    RetryPolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Stores, ledgers and bus the authorities run on.
#[derive(Clone)]
pub struct Collaborators {
    /// Event bus shared by both authorities
    pub event_bus: Arc<dyn EventBus>,
    /// Booking authority store
    pub bookings: Arc<dyn BookingRepository>,
    /// Booking authority saga ledger
    pub booking_saga: Arc<dyn SagaLog>,
    /// Capacity authority store
    pub ships: Arc<dyn ShipRepository>,
    /// Capacity authority saga ledger
    pub capacity_saga: Arc<dyn SagaLog>,
    /// Where dead letters are recorded, if anywhere
    pub dead_letters: Option<Arc<dyn DeadLetterStore>>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// Fault injectors, one per listener.
#[derive(Clone)]
pub struct Faults {
    /// Consulted by the `booking-created` listener
    pub booking_created: Arc<dyn FaultInjector>,
    /// Consulted by the `booking-outcome` listener
    pub booking_outcome: Arc<dyn FaultInjector>,
    /// Consulted by the `ship-damaged` listener
    pub ship_damaged: Arc<dyn FaultInjector>,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            booking_created: Arc::new(NoFaults),
            booking_outcome: Arc::new(NoFaults),
            ship_damaged: Arc::new(NoFaults),
        }
    }
}

/// Consumer groups and redelivery schedules.
#[derive(Debug, Clone)]
pub struct SagaSettings {
    /// Booking authority consumer group
    pub booking_group: String,
    /// Capacity authority consumer group
    pub capacity_group: String,
    /// Redelivery of the booking authority's listeners
    pub booking_retry: RetryPolicy,
    /// Redelivery of the capacity authority's listener
    pub capacity_retry: RetryPolicy,
    /// Per-key lanes per consumer
    pub lanes: usize,
    /// Pause before resubscribing after a lost stream
    pub reconnect_delay: Duration,
}

impl SagaSettings {
    /// Settings taken from `config`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            booking_group: config.redpanda.booking_group.clone(),
            capacity_group: config.redpanda.capacity_group.clone(),
            booking_retry: config.booking_retry.policy(),
            capacity_retry: config.capacity_retry.policy(),
            lanes: config.consumer_lanes,
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Both authorities and the consumers feeding them.
pub struct ShippingApp {
    /// Booking authority
    pub booking: BookingService,
    /// Capacity authority
    pub capacity: CapacityService,
    /// One consumer per listener, not yet started
    pub consumers: Vec<EventConsumer>,
}

impl ShippingApp {
    /// Build both authorities and their consumers.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError`] if a consumer cannot be built.
    pub fn assemble(
        settings: &SagaSettings,
        collaborators: &Collaborators,
        faults: &Faults,
        shutdown: &broadcast::Sender<()>,
    ) -> Result<Self, ConsumerError> {
        let publisher = Publisher::new(Arc::clone(&collaborators.event_bus));
        let booking = BookingService::new(
            Arc::clone(&collaborators.bookings),
            Arc::clone(&collaborators.booking_saga),
            publisher.clone(),
            Arc::clone(&collaborators.clock),
        );
        let capacity = CapacityService::new(
            Arc::clone(&collaborators.ships),
            Arc::clone(&collaborators.capacity_saga),
            publisher,
            Arc::clone(&collaborators.clock),
        );

        let consumer = |topic: Topic,
                        group: &str,
                        policy: &RetryPolicy,
                        handler: Arc<dyn MessageHandler>,
                        dead_letter: Arc<dyn DeadLetterHandler>| {
            let mut redelivery =
                Redelivery::new(topic.name(), group, policy.clone(), handler, dead_letter)
                    .with_clock(Arc::clone(&collaborators.clock));
            if let Some(store) = &collaborators.dead_letters {
                redelivery = redelivery.with_dead_letter_store(Arc::clone(store));
            }
            EventConsumer::builder()
                .event_bus(Arc::clone(&collaborators.event_bus))
                .redelivery(Arc::new(redelivery))
                .shutdown(shutdown.subscribe())
                .lanes(settings.lanes)
                .retry_delay(settings.reconnect_delay)
                .build()
        };

        let consumers = vec![
            consumer(
                Topic::BookingCreated,
                &settings.capacity_group,
                &settings.capacity_retry,
                Arc::new(BookingCreatedListener::new(
                    capacity.clone(),
                    Arc::clone(&faults.booking_created),
                )),
                Arc::new(BookingCreatedDeadLetter::new(capacity.clone())),
            )?,
            consumer(
                Topic::BookingOutcome,
                &settings.booking_group,
                &settings.booking_retry,
                Arc::new(BookingOutcomeListener::new(
                    booking.clone(),
                    Arc::clone(&faults.booking_outcome),
                )),
                Arc::new(BookingOutcomeDeadLetter::new(booking.clone())),
            )?,
            consumer(
                Topic::ShipDamaged,
                &settings.booking_group,
                &settings.booking_retry,
                Arc::new(ShipDamagedListener::new(
                    booking.clone(),
                    Arc::clone(&faults.ship_damaged),
                )),
                Arc::new(ShipDamagedDeadLetter::new(booking.clone())),
            )?,
        ];

        Ok(Self {
            booking,
            capacity,
            consumers,
        })
    }
}
