//! Errors raised by the booking authority.

use shipkafka_core::event::EventError;
use shipkafka_core::event_bus::EventBusError;
use shipkafka_core::store::StoreError;
use shipkafka_core::{BookingId, CustomerId, IllegalStateTransition};
use shipkafka_runtime::PublishError;
use thiserror::Error;

/// Booking authority failures.
#[derive(Error, Debug, Clone)]
pub enum BookingError {
    /// No customer with this id.
    #[error("Customer {0} not found")]
    CustomerNotFound(CustomerId),

    /// No booking with this id.
    #[error("Booking {0} not found")]
    BookingNotFound(BookingId),

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

impl From<PublishError> for BookingError {
    fn from(error: PublishError) -> Self {
        match error {
            PublishError::Encode(e) => Self::Event(e),
            PublishError::Bus(e) => Self::Bus(e),
        }
    }
}

impl BookingError {
    /// Whether handling the same message again may succeed.
    ///
    /// A missing booking is transient: its `booking-outcome` can overtake
    /// the local write that created it. A refused transition is not.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::BookingNotFound(_) | Self::Bus(_) => true,
            Self::Store(e) => e.is_transient(),
            Self::CustomerNotFound(_) | Self::IllegalTransition(_) | Self::Event(_) => false,
        }
    }
}
