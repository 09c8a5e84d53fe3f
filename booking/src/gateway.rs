//! Listeners the booking authority runs behind [`shipkafka_runtime::Redelivery`].
//!
//! | Topic | Listener | Dead-letter handler |
//! |---|---|---|
//! | `ship-damaged` | [`ShipDamagedListener`] | [`ShipDamagedDeadLetter`]: cancel the ship's bookings again |
//! | `booking-outcome` | [`BookingOutcomeListener`] | [`BookingOutcomeDeadLetter`]: resolve duplicates, park the rest |

use crate::error::BookingError;
use crate::service::BookingService;
use async_trait::async_trait;
use shipkafka_core::event::SerializedEvent;
use shipkafka_core::fault::FaultInjector;
use shipkafka_core::{Booking, ShipDamaged, ShippingEvent, Topic};
use shipkafka_runtime::{DeadLetterHandler, HandlerError, MessageHandler};
use std::sync::Arc;
use tracing::{info, warn};

fn decode_damage(event: &SerializedEvent) -> Result<ShipDamaged, HandlerError> {
    match ShippingEvent::from_envelope(event).map_err(HandlerError::malformed)? {
        ShippingEvent::ShipDamaged(damaged) => Ok(damaged),
        other => Err(HandlerError::malformed(format!(
            "expected ShipDamaged on {}, got {other:?}",
            Topic::ShipDamaged
        ))),
    }
}

fn decode_outcome(event: &SerializedEvent) -> Result<Booking, HandlerError> {
    match ShippingEvent::from_envelope(event).map_err(HandlerError::malformed)? {
        ShippingEvent::BookingOutcome(booking) => Ok(booking),
        other => Err(HandlerError::malformed(format!(
            "expected BookingOutcome on {}, got {other:?}",
            Topic::BookingOutcome
        ))),
    }
}

fn classify(error: BookingError) -> HandlerError {
    if error.is_transient() {
        HandlerError::transient(error)
    } else {
        HandlerError::permanent(error)
    }
}

/// Cancels the bookings of a damaged ship. Every failure is retried.
pub struct ShipDamagedListener {
    service: BookingService,
    faults: Arc<dyn FaultInjector>,
}

impl ShipDamagedListener {
    /// Listener consulting `faults` before each delivery.
    #[must_use]
    pub fn new(service: BookingService, faults: Arc<dyn FaultInjector>) -> Self {
        Self { service, faults }
    }
}

#[async_trait]
impl MessageHandler for ShipDamagedListener {
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError> {
        let damaged = decode_damage(event)?;
        info!(ship_id = %damaged.ship_id, "Received ship-damaged");

        self.faults
            .check(Topic::ShipDamaged.name(), event.key.as_deref())
            .map_err(HandlerError::transient)?;
        self.service
            .cancel_bookings(damaged.ship_id)
            .await
            .map_err(HandlerError::transient)?;
        Ok(())
    }
}

/// Runs the bulk cancel once more after the listener gave up.
pub struct ShipDamagedDeadLetter {
    service: BookingService,
}

impl ShipDamagedDeadLetter {
    /// Compensate through `service`.
    #[must_use]
    pub const fn new(service: BookingService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl DeadLetterHandler for ShipDamagedDeadLetter {
    async fn handle_dead_letter(
        &self,
        event: &SerializedEvent,
        error: &HandlerError,
    ) -> Result<(), HandlerError> {
        let damaged = decode_damage(event)?;
        warn!(ship_id = %damaged.ship_id, %error, "Received DLT ship-damaged, canceling bookings");
        self.service
            .cancel_bookings(damaged.ship_id)
            .await
            .map_err(HandlerError::transient)?;
        Ok(())
    }
}

/// Applies capacity decisions to local bookings.
pub struct BookingOutcomeListener {
    service: BookingService,
    faults: Arc<dyn FaultInjector>,
}

impl BookingOutcomeListener {
    /// Listener consulting `faults` before each delivery.
    #[must_use]
    pub fn new(service: BookingService, faults: Arc<dyn FaultInjector>) -> Self {
        Self { service, faults }
    }
}

#[async_trait]
impl MessageHandler for BookingOutcomeListener {
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError> {
        let booking = decode_outcome(event)?;
        info!(booking_id = %booking.id, status = %booking.status(), "Received booking-outcome");

        self.faults
            .check(Topic::BookingOutcome.name(), event.key.as_deref())
            .map_err(HandlerError::transient)?;
        self.service
            .process_booking(&booking)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

/// Dead-letter handler for outcomes that could not be applied.
///
/// A duplicate outcome the local booking already holds needs nothing done
/// and resolves its entry. Anything else stays pending for an operator.
pub struct BookingOutcomeDeadLetter {
    service: BookingService,
}

impl BookingOutcomeDeadLetter {
    /// Inspect local state through `service`.
    #[must_use]
    pub const fn new(service: BookingService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl DeadLetterHandler for BookingOutcomeDeadLetter {
    async fn handle_dead_letter(
        &self,
        event: &SerializedEvent,
        error: &HandlerError,
    ) -> Result<(), HandlerError> {
        let incoming = decode_outcome(event)?;
        let local = self
            .service
            .get_booking(incoming.id)
            .await
            .map_err(HandlerError::transient)?;

        if local.status() == incoming.status() {
            info!(
                booking_id = %incoming.id,
                status = %incoming.status(),
                "Duplicate outcome already applied"
            );
            return Ok(());
        }

        warn!(
            booking_id = %incoming.id,
            local = %local.status(),
            incoming = %incoming.status(),
            %error,
            "Outcome parked for review"
        );
        Err(HandlerError::permanent(format!(
            "booking {} is {}, outcome says {}",
            incoming.id,
            local.status(),
            incoming.status()
        )))
    }
}
