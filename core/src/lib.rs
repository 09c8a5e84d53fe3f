//! # Shipkafka Core
//!
//! Shared vocabulary of the booking saga between a booking authority (owns
//! customers and bookings) and a capacity authority (owns ships).
//!
//! ## Contents
//!
//! - [`status`]: the booking status machine
//! - [`booking`], [`ship`], [`customer`]: the records each authority owns
//! - [`event`], [`messages`]: the envelope and the messages on each topic
//! - [`event_bus`]: the publish/subscribe gateway both authorities talk through
//! - [`store`], [`saga`], [`dead_letter`]: persistence contracts
//! - [`fault`]: fault-injection hook for listeners
//! - [`environment`]: injected clock
//!
//! ## Saga
//!
//! ```text
//! booking authority                         capacity authority
//! ─────────────────                         ──────────────────
//! add_booking ── booking-created ─────────► confirm_booking
//!                                              │ reserve or cancel
//! process_booking ◄──── booking-outcome ───────┘
//!
//! cancel_bookings ◄──── ship-damaged ────── update_ship / report_damage
//! ```
//!
//! No transaction spans the two authorities; the ship decrement and the
//! booking status update commit independently and converge through events.

pub mod booking;
pub mod customer;
pub mod dead_letter;
pub mod event;
pub mod event_bus;
pub mod fault;
pub mod ids;
pub mod messages;
pub mod saga;
pub mod ship;
pub mod status;
pub mod store;

pub use booking::Booking;
pub use customer::Customer;
pub use ids::{BookingId, CustomerId, ShipId};
pub use messages::{ShipDamaged, ShippingEvent, Topic};
pub use ship::Ship;
pub use status::{BookingStatus, IllegalStateTransition};

/// Environment traits injected into the authorities.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use shipkafka_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
