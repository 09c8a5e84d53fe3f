//! Listener the capacity authority runs on `booking-created`.

use crate::error::CapacityError;
use crate::service::CapacityService;
use async_trait::async_trait;
use shipkafka_core::event::SerializedEvent;
use shipkafka_core::fault::FaultInjector;
use shipkafka_core::{Booking, ShippingEvent, Topic};
use shipkafka_runtime::{DeadLetterHandler, HandlerError, MessageHandler};
use std::sync::Arc;
use tracing::{info, warn};

fn decode_booking(event: &SerializedEvent) -> Result<Booking, HandlerError> {
    match ShippingEvent::from_envelope(event).map_err(HandlerError::malformed)? {
        ShippingEvent::BookingCreated(booking) => Ok(booking),
        other => Err(HandlerError::malformed(format!(
            "expected BookingCreated on {}, got {other:?}",
            Topic::BookingCreated
        ))),
    }
}

fn classify(error: CapacityError) -> HandlerError {
    if error.is_transient() {
        HandlerError::transient(error)
    } else {
        HandlerError::permanent(error)
    }
}

/// Decides each requested booking.
pub struct BookingCreatedListener {
    service: CapacityService,
    faults: Arc<dyn FaultInjector>,
}

impl BookingCreatedListener {
    /// Listener consulting `faults` before each delivery.
    #[must_use]
    pub fn new(service: CapacityService, faults: Arc<dyn FaultInjector>) -> Self {
        Self { service, faults }
    }
}

#[async_trait]
impl MessageHandler for BookingCreatedListener {
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError> {
        let booking = decode_booking(event)?;
        info!(
            booking_id = %booking.id,
            ship_id = %booking.ship_id,
            containers = booking.container_count,
            "Received booking-created"
        );

        self.faults
            .check(Topic::BookingCreated.name(), event.key.as_deref())
            .map_err(HandlerError::transient)?;
        self.service
            .confirm_booking(booking)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

/// Cancels a booking that could not be decided and tells the booking
/// authority.
pub struct BookingCreatedDeadLetter {
    service: CapacityService,
}

impl BookingCreatedDeadLetter {
    /// Compensate through `service`.
    #[must_use]
    pub const fn new(service: CapacityService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl DeadLetterHandler for BookingCreatedDeadLetter {
    async fn handle_dead_letter(
        &self,
        event: &SerializedEvent,
        error: &HandlerError,
    ) -> Result<(), HandlerError> {
        let booking = decode_booking(event)?;
        warn!(booking_id = %booking.id, %error, "Received DLT booking-created, canceling");
        self.service
            .cancel_booking_and_send(booking)
            .await
            .map_err(HandlerError::transient)?;
        Ok(())
    }
}
