//! # Shipkafka Booking
//!
//! The booking authority. It owns customers and their bookings, starts a
//! saga for every new booking and applies the capacity authority's
//! decisions when they come back.
//!
//! ```text
//! add_booking ──► booking-created ──► (capacity authority)
//!                                            │
//! process_booking ◄── booking-outcome ◄──────┘
//! cancel_bookings ◄── ship-damaged
//! ```

pub mod error;
pub mod gateway;
pub mod service;

pub use error::BookingError;
pub use gateway::{
    BookingOutcomeDeadLetter, BookingOutcomeListener, ShipDamagedDeadLetter, ShipDamagedListener,
};
pub use service::BookingService;
