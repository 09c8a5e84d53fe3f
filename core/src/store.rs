//! Record stores owned by each authority.
//!
//! Writes are optimistic: a record is saved only if the stored concurrency
//! token still equals the one the caller read (an absent record counts as
//! token `0`). The saved copy comes back with the token incremented. A stale
//! write fails with [`StoreError::Conflict`] and changes nothing, so the
//! later of two racing writers has to reload and retry instead of
//! overwriting.
//!
//! The capacity store keeps the containers held for each booking next to
//! the ships. Taking or returning them is one write with the ship, so a
//! reservation exists exactly when the ship's count reflects it.

use crate::booking::Booking;
use crate::customer::Customer;
use crate::ids::{BookingId, CustomerId, ShipId};
use crate::ship::Ship;
use async_trait::async_trait;
use thiserror::Error;

/// Containers a ship holds for one booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// Booking the containers are held for
    pub booking_id: BookingId,
    /// Ship they were taken from
    pub ship_id: ShipId,
    /// Containers held
    pub containers: u32,
}

/// Errors raised by record stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic concurrency conflict: the record changed since it was read.
    #[error("Concurrency conflict on {entity} {id}: expected version {expected}, found {actual}")]
    Conflict {
        /// Kind of record ("booking", "customer", "ship")
        entity: &'static str,
        /// Record identifier
        id: String,
        /// Token the writer held
        expected: u64,
        /// Token currently stored
        actual: u64,
    },

    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(String),

    /// Stored data could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Build a conflict error.
    #[must_use]
    pub fn conflict(entity: &'static str, id: impl ToString, expected: u64, actual: u64) -> Self {
        Self::Conflict {
            entity,
            id: id.to_string(),
            expected,
            actual,
        }
    }

    /// Whether retrying the operation after a reload can succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Database(_))
    }
}

/// The booking authority's store: customers and their bookings.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Load a customer.
    async fn find_customer(&self, id: CustomerId) -> Result<Option<Customer>, StoreError>;

    /// All customers.
    async fn find_all_customers(&self) -> Result<Vec<Customer>, StoreError>;

    /// Insert or update a customer's names.
    ///
    /// The customer's booking list is derived from the bookings it owns and
    /// is not written here.
    async fn save_customer(&self, customer: Customer) -> Result<Customer, StoreError>;

    /// Delete a customer and every booking it owns. Returns whether it existed.
    async fn delete_customer(&self, id: CustomerId) -> Result<bool, StoreError>;

    /// Insert a new booking owned by an existing customer.
    ///
    /// The customer row is locked for the write and its names are left as
    /// stored. Fails with [`StoreError::Conflict`] and writes nothing if the
    /// customer no longer exists or the booking id is taken.
    async fn save_customer_with_booking(
        &self,
        customer: Customer,
        booking: Booking,
    ) -> Result<Booking, StoreError>;

    /// Load a booking.
    async fn find_booking(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    /// Load several bookings, in the order of `ids`, skipping missing ones.
    async fn find_bookings(&self, ids: &[BookingId]) -> Result<Vec<Booking>, StoreError>;

    /// All bookings.
    async fn find_all_bookings(&self) -> Result<Vec<Booking>, StoreError>;

    /// Optimistically write a booking (see module docs).
    async fn save_booking(&self, booking: Booking) -> Result<Booking, StoreError>;

    /// Bookings of `customer` in `CONFIRMED` status.
    async fn find_confirmed_bookings(
        &self,
        customer: CustomerId,
    ) -> Result<Vec<Booking>, StoreError>;

    /// Bookings on `ship`, whatever their status.
    async fn find_bookings_by_ship(&self, ship: ShipId) -> Result<Vec<Booking>, StoreError>;
}

/// The capacity authority's store.
#[async_trait]
pub trait ShipRepository: Send + Sync {
    /// Load a ship.
    async fn find_ship(&self, id: ShipId) -> Result<Option<Ship>, StoreError>;

    /// All ships.
    async fn find_all_ships(&self) -> Result<Vec<Ship>, StoreError>;

    /// Optimistically write a ship (see module docs).
    async fn save_ship(&self, ship: Ship) -> Result<Ship, StoreError>;

    /// Delete a ship and any reservations on it. Returns whether it existed.
    async fn delete_ship(&self, id: ShipId) -> Result<bool, StoreError>;

    /// Write `ship`, already reduced by the reservation, together with the
    /// reservation itself.
    ///
    /// Fails with [`StoreError::Conflict`] and writes nothing if the ship
    /// is stale or the booking already holds a reservation.
    async fn reserve(&self, ship: Ship, reservation: Reservation) -> Result<Ship, StoreError>;

    /// Write `ship`, already given back the containers, and drop the
    /// booking's reservation in the same write.
    ///
    /// Fails with [`StoreError::Conflict`] and writes nothing if the ship
    /// is stale or the booking holds no reservation.
    async fn release(&self, ship: Ship, booking_id: BookingId) -> Result<Ship, StoreError>;

    /// Reservation held for a booking, if any.
    async fn find_reservation(
        &self,
        booking_id: BookingId,
    ) -> Result<Option<Reservation>, StoreError>;
}
