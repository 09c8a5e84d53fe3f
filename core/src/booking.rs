//! The booking record.
//!
//! Both authorities hold a copy: the booking authority persists it, the
//! capacity authority receives it as a snapshot on `booking-created` and
//! returns it, with its decided status, on `booking-outcome`.

use crate::ids::{BookingId, ShipId};
use crate::status::{BookingStatus, IllegalStateTransition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A request for container space on a ship.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Booking identifier, also the topic key
    pub id: BookingId,
    /// Ship the containers are booked on
    pub ship_id: ShipId,
    /// Number of containers requested
    pub container_count: u32,
    /// Current lifecycle status
    status: BookingStatus,
    /// When the booking was created
    pub created_on: DateTime<Utc>,
    /// When the booking last changed status
    pub last_updated_on: DateTime<Utc>,
    /// Concurrency token, incremented by every persisted write (0 = never persisted)
    pub version: u64,
}

impl Booking {
    /// Create a new booking in [`BookingStatus::Requested`].
    #[must_use]
    pub fn new(ship_id: ShipId, container_count: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: BookingId::new(),
            ship_id,
            container_count,
            status: BookingStatus::Requested,
            created_on: now,
            last_updated_on: now,
            version: 0,
        }
    }

    /// Rebuild a booking from stored fields.
    #[must_use]
    pub const fn restore(
        id: BookingId,
        ship_id: ShipId,
        container_count: u32,
        status: BookingStatus,
        created_on: DateTime<Utc>,
        last_updated_on: DateTime<Utc>,
        version: u64,
    ) -> Self {
        Self {
            id,
            ship_id,
            container_count,
            status,
            created_on,
            last_updated_on,
            version,
        }
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> BookingStatus {
        self.status
    }

    /// Move to `requested` through the status machine.
    ///
    /// # Errors
    ///
    /// Returns [`IllegalStateTransition`] if the move is not allowed; the
    /// booking is left untouched.
    pub fn update_status(
        &mut self,
        requested: BookingStatus,
        now: DateTime<Utc>,
    ) -> Result<BookingStatus, IllegalStateTransition> {
        self.status = self.status.transition(requested)?;
        self.last_updated_on = now;
        Ok(self.status)
    }
}
