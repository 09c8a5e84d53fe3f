//! Demo data for a fresh installation.

use shipkafka_core::environment::Clock;
use shipkafka_core::store::{BookingRepository, ShipRepository, StoreError};
use shipkafka_core::{Booking, BookingStatus, Customer, IllegalStateTransition, Ship};
use thiserror::Error;
use tracing::info;

/// Seeding failures.
#[derive(Error, Debug)]
pub enum SeedError {
    /// A record could not be written.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A seeded booking status could not be reached.
    #[error(transparent)]
    Transition(#[from] IllegalStateTransition),
}

/// Write the demo ships and customers unless ships already exist.
///
/// Returns whether anything was written.
///
/// # Errors
///
/// Returns [`SeedError`] if a write fails.
pub async fn seed_demo_data(
    bookings: &dyn BookingRepository,
    ships: &dyn ShipRepository,
    clock: &dyn Clock,
) -> Result<bool, SeedError> {
    if !ships.find_all_ships().await?.is_empty() {
        info!("Ships present, skipping demo data");
        return Ok(false);
    }

    ships.save_ship(Ship::new("Ship Aachen", 2, false)).await?;
    let berlin = ships.save_ship(Ship::new("Ship Berlin", 5, false)).await?;
    let hamburg = ships.save_ship(Ship::new("Ship Hamburg", 8, false)).await?;

    for (first, last) in [("Jane", "Miller"), ("Jane", "Doe"), ("Jane", "Smith")] {
        bookings.save_customer(Customer::new(first, last)).await?;
    }

    let mut customer = bookings.save_customer(Customer::new("Max", "Muster")).await?;
    for (ship, containers, status) in [
        (&berlin, 3, BookingStatus::Canceled),
        (&hamburg, 5, BookingStatus::Confirmed),
    ] {
        let mut booking = Booking::new(ship.id, containers, clock.now());
        booking.update_status(status, clock.now())?;
        customer.add_booking(booking.id);
        bookings
            .save_customer_with_booking(customer.clone(), booking)
            .await?;
    }

    info!("Demo data loaded");
    Ok(true)
}
