//! Capacity authority logic.
//!
//! Decides every booking it receives on `booking-created`: a booking that
//! fits takes its containers off the ship and is confirmed, one that does
//! not fit is canceled. Either way the decision goes back on
//! `booking-outcome`, keyed by booking id.
//!
//! The ship store holds each booking's reservation in the same write as
//! the ship, and the authority keeps its own saga ledger. A
//! `booking-created` that is delivered again after the decision was made
//! (for example because the ledger append or the outcome publish failed)
//! gets the recorded decision republished instead of a second reservation.

use crate::error::CapacityError;
use metrics::counter;
use shipkafka_core::environment::Clock;
use shipkafka_core::saga::{
    SagaEntry, SagaLog, SagaStep, outstanding_reservation, published_outcome,
};
use shipkafka_core::store::{Reservation, ShipRepository};
use shipkafka_core::{Booking, BookingId, BookingStatus, Ship, ShipDamaged, ShipId, ShippingEvent};
use shipkafka_runtime::Publisher;
use std::sync::Arc;
use tracing::{info, warn};

/// Partial update of a ship; `None` leaves the field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShipUpdate {
    /// New free capacity
    pub available_containers: Option<u32>,
    /// New damaged flag
    pub damaged: Option<bool>,
}

/// The capacity authority.
#[derive(Clone)]
pub struct CapacityService {
    ships: Arc<dyn ShipRepository>,
    saga: Arc<dyn SagaLog>,
    publisher: Publisher,
    clock: Arc<dyn Clock>,
}

impl CapacityService {
    /// Create the authority over its own store and ledger.
    #[must_use]
    pub fn new(
        ships: Arc<dyn ShipRepository>,
        saga: Arc<dyn SagaLog>,
        publisher: Publisher,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ships,
            saga,
            publisher,
            clock,
        }
    }

    async fn load_ship(&self, id: ShipId) -> Result<Ship, CapacityError> {
        self.ships
            .find_ship(id)
            .await?
            .ok_or(CapacityError::ShipNotFound(id))
    }

    async fn record(&self, booking_id: BookingId, step: SagaStep) -> Result<(), CapacityError> {
        self.saga
            .append(SagaEntry::new(booking_id, step, self.clock.now()))
            .await?;
        Ok(())
    }

    async fn record_reserved(&self, reservation: &Reservation) -> Result<(), CapacityError> {
        self.record(
            reservation.booking_id,
            SagaStep::CapacityReserved {
                ship_id: reservation.ship_id,
                containers: reservation.containers,
            },
        )
        .await
    }

    async fn record_released(&self, reservation: &Reservation) -> Result<(), CapacityError> {
        self.record(
            reservation.booking_id,
            SagaStep::CapacityReleased {
                ship_id: reservation.ship_id,
                containers: reservation.containers,
            },
        )
        .await
    }

    async fn publish_outcome(&self, booking: &Booking) -> Result<(), CapacityError> {
        self.publisher
            .publish(&ShippingEvent::BookingOutcome(booking.clone()))
            .await?;
        self.record(
            booking.id,
            SagaStep::OutcomePublished {
                status: booking.status(),
            },
        )
        .await
    }

    /// Decide `booking` and publish the outcome.
    ///
    /// A booking for fewer containers than the ship has free is confirmed
    /// and its containers are taken off the ship. Otherwise it is canceled;
    /// a shortfall is not an error. Returns the decided snapshot.
    ///
    /// # Errors
    ///
    /// - [`CapacityError::ShipNotFound`] if the ship is unknown
    /// - [`CapacityError::BookingAlreadyConfirmed`] if the snapshot is
    ///   already confirmed
    /// - [`CapacityError::ShipDamaged`] if the ship is out of service
    /// - [`CapacityError::IllegalTransition`] if the snapshot is canceled
    /// - [`CapacityError::Store`] if the ship write conflicts or fails
    /// - [`CapacityError::Bus`] if the outcome cannot be published; the
    ///   reservation stands and is reused on redelivery
    pub async fn confirm_booking(&self, mut booking: Booking) -> Result<Booking, CapacityError> {
        let mut ship = self.load_ship(booking.ship_id).await?;
        if booking.status() == BookingStatus::Confirmed {
            return Err(CapacityError::BookingAlreadyConfirmed(booking.id));
        }

        let history = self.saga.history(booking.id).await?;
        let held = self.ships.find_reservation(booking.id).await?;
        if let Some(reservation) = held.filter(|_| outstanding_reservation(&history).is_none()) {
            self.record_reserved(&reservation).await?;
        }
        let recorded =
            published_outcome(&history).or_else(|| held.map(|_| BookingStatus::Confirmed));
        if let Some(status) = recorded {
            if booking.status() != status {
                booking.update_status(status, self.clock.now())?;
            }
            info!(booking_id = %booking.id, %status, "Booking already decided, republishing outcome");
            self.publish_outcome(&booking).await?;
            return Ok(booking);
        }

        if ship.damaged {
            return Err(CapacityError::ShipDamaged(ship.id));
        }

        let decision = if ship.has_room_for(booking.container_count) {
            BookingStatus::Confirmed
        } else {
            BookingStatus::Canceled
        };
        booking.update_status(decision, self.clock.now())?;

        if decision == BookingStatus::Confirmed {
            let reservation = Reservation {
                booking_id: booking.id,
                ship_id: ship.id,
                containers: booking.container_count,
            };
            ship.reserve(booking.container_count);
            let ship = self.ships.reserve(ship, reservation).await?;
            self.record_reserved(&reservation).await?;
            info!(
                booking_id = %booking.id,
                ship_id = %ship.id,
                containers = booking.container_count,
                remaining = ship.available_containers,
                "Capacity reserved"
            );
        } else {
            info!(
                booking_id = %booking.id,
                ship_id = %ship.id,
                containers = booking.container_count,
                available = ship.available_containers,
                "Capacity shortfall, booking canceled"
            );
        }
        counter!("shipkafka_capacity_decisions_total", "status" => decision.as_str()).increment(1);

        self.publish_outcome(&booking).await?;
        Ok(booking)
    }

    /// Compensate a booking whose decision could not be made.
    ///
    /// Releases the booking's reservation if the ship store holds one,
    /// cancels the snapshot and publishes a `CANCELED` outcome.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError::Store`] or [`CapacityError::Bus`]; the
    /// compensation can be run again.
    pub async fn cancel_booking_and_send(&self, mut booking: Booking) -> Result<Booking, CapacityError> {
        let history = self.saga.history(booking.id).await?;
        let logged = outstanding_reservation(&history);

        match self.ships.find_reservation(booking.id).await? {
            Some(reservation) => {
                let mut ship = self.load_ship(reservation.ship_id).await?;
                ship.release(reservation.containers);
                self.ships.release(ship, booking.id).await?;
                self.record_released(&reservation).await?;
                info!(
                    booking_id = %booking.id,
                    ship_id = %reservation.ship_id,
                    containers = reservation.containers,
                    "Capacity released"
                );
            }
            // Released on an earlier run whose ledger append failed.
            None => {
                if let Some((ship_id, containers)) = logged {
                    self.record_released(&Reservation {
                        booking_id: booking.id,
                        ship_id,
                        containers,
                    })
                    .await?;
                }
            }
        }

        if booking.status() != BookingStatus::Canceled {
            booking.update_status(BookingStatus::Canceled, self.clock.now())?;
        }
        self.record(
            booking.id,
            SagaStep::Compensated {
                status: BookingStatus::Canceled,
                reason: "booking-created dead-lettered".to_string(),
            },
        )
        .await?;
        self.publish_outcome(&booking).await?;

        counter!("shipkafka_bookings_canceled_total", "reason" => "dead_letter").increment(1);
        warn!(booking_id = %booking.id, "Booking canceled by compensation");
        Ok(booking)
    }

    /// Publish an operator-triggered message.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError::Bus`] or [`CapacityError::Event`].
    pub async fn send_message(&self, event: &ShippingEvent) -> Result<(), CapacityError> {
        info!(topic = %event.topic(), "Sending message");
        self.publisher.publish(event).await?;
        Ok(())
    }

    /// Register a ship.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError::Store`].
    pub async fn add_ship(
        &self,
        name: impl Into<String>,
        available_containers: u32,
        damaged: bool,
    ) -> Result<Ship, CapacityError> {
        let ship = self
            .ships
            .save_ship(Ship::new(name, available_containers, damaged))
            .await?;
        info!(ship_id = %ship.id, name = %ship.name, available_containers, "Ship added");
        Ok(ship)
    }

    /// A single ship.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError::ShipNotFound`] or [`CapacityError::Store`].
    pub async fn get_ship(&self, id: ShipId) -> Result<Ship, CapacityError> {
        self.load_ship(id).await
    }

    /// Every ship.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError::Store`].
    pub async fn get_ships(&self) -> Result<Vec<Ship>, CapacityError> {
        Ok(self.ships.find_all_ships().await?)
    }

    /// Apply `update` to a ship.
    ///
    /// Marking an intact ship damaged publishes `ship-damaged`.
    ///
    /// # Errors
    ///
    /// - [`CapacityError::ShipNotFound`] if the ship is unknown
    /// - [`CapacityError::Store`] if the write conflicts or fails
    /// - [`CapacityError::Bus`] if the damage could not be announced; the
    ///   ship is stored as damaged
    pub async fn update_ship(&self, id: ShipId, update: ShipUpdate) -> Result<Ship, CapacityError> {
        let mut ship = self.load_ship(id).await?;
        let was_damaged = ship.damaged;

        if let Some(available) = update.available_containers {
            ship.available_containers = available;
        }
        if let Some(damaged) = update.damaged {
            ship.damaged = damaged;
        }
        let ship = self.ships.save_ship(ship).await?;

        if !was_damaged && ship.damaged {
            self.send_message(&ShippingEvent::ShipDamaged(ShipDamaged { ship_id: ship.id }))
                .await?;
            warn!(ship_id = %ship.id, "Ship marked damaged");
        }
        Ok(ship)
    }

    /// Announce damage to a ship without touching its stored flag.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError::ShipNotFound`], [`CapacityError::Store`] or
    /// [`CapacityError::Bus`].
    pub async fn report_damage(&self, id: ShipId) -> Result<ShipDamaged, CapacityError> {
        let ship = self.load_ship(id).await?;
        let damaged = ShipDamaged { ship_id: ship.id };
        self.send_message(&ShippingEvent::ShipDamaged(damaged)).await?;
        Ok(damaged)
    }

    /// Remove a ship.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityError::ShipNotFound`] or [`CapacityError::Store`].
    pub async fn delete_ship(&self, id: ShipId) -> Result<(), CapacityError> {
        if !self.ships.delete_ship(id).await? {
            return Err(CapacityError::ShipNotFound(id));
        }
        info!(ship_id = %id, "Ship deleted");
        Ok(())
    }
}
