//! Errors raised by the capacity authority.

use shipkafka_core::event::EventError;
use shipkafka_core::event_bus::EventBusError;
use shipkafka_core::store::StoreError;
use shipkafka_core::{BookingId, IllegalStateTransition, ShipId};
use shipkafka_runtime::PublishError;
use thiserror::Error;

/// Capacity authority failures.
#[derive(Error, Debug, Clone)]
pub enum CapacityError {
    /// No ship with this id.
    #[error("Ship {0} not found")]
    ShipNotFound(ShipId),

    /// The ship is out of service.
    #[error("Ship {0} is damaged")]
    ShipDamaged(ShipId),

    /// The booking arrived already confirmed.
    #[error("Booking {0} is already confirmed")]
    BookingAlreadyConfirmed(BookingId),

    /// The status machine refused the update.
    #[error(transparent)]
    IllegalTransition(#[from] IllegalStateTransition),

    /// The record store failed or detected a concurrent write.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The event bus did not accept a message.
    #[error(transparent)]
    Bus(#[from] EventBusError),

    /// A message could not be encoded.
    #[error(transparent)]
    Event(#[from] EventError),
}

impl From<PublishError> for CapacityError {
    fn from(error: PublishError) -> Self {
        match error {
            PublishError::Encode(e) => Self::Event(e),
            PublishError::Bus(e) => Self::Bus(e),
        }
    }
}

impl CapacityError {
    /// Whether handling the same `booking-created` again may succeed.
    ///
    /// A missing or damaged ship can be fixed by an operator before the
    /// budget runs out; a duplicate confirmation cannot.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::ShipNotFound(_) | Self::ShipDamaged(_) | Self::Bus(_) => true,
            Self::Store(e) => e.is_transient(),
            Self::BookingAlreadyConfirmed(_) | Self::IllegalTransition(_) | Self::Event(_) => false,
        }
    }
}
