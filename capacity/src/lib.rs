//! # Shipkafka Capacity
//!
//! The capacity authority. It owns the ships and their free container
//! capacity, decides every booking that arrives on `booking-created` and
//! publishes the decision on `booking-outcome`. Marking a ship damaged
//! broadcasts `ship-damaged`.

pub mod error;
pub mod gateway;
pub mod service;

pub use error::CapacityError;
pub use gateway::{BookingCreatedDeadLetter, BookingCreatedListener};
pub use service::{CapacityService, ShipUpdate};
