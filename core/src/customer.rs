//! The customer record owned by the booking authority.

use crate::ids::{BookingId, CustomerId};
use serde::{Deserialize, Serialize};

/// A customer and the bookings it owns.
///
/// Deleting a customer deletes its bookings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    /// Customer identifier
    pub id: CustomerId,
    /// Given name
    pub first_name: String,
    /// Family name
    pub last_name: String,
    /// Bookings owned by this customer
    pub bookings: Vec<BookingId>,
}

impl Customer {
    /// Create a customer without bookings.
    #[must_use]
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            id: CustomerId::new(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            bookings: Vec::new(),
        }
    }

    /// Record ownership of a booking.
    pub fn add_booking(&mut self, booking: BookingId) {
        if !self.bookings.contains(&booking) {
            self.bookings.push(booking);
        }
    }

    /// Whether this customer owns `booking`.
    #[must_use]
    pub fn owns(&self, booking: &BookingId) -> bool {
        self.bookings.contains(booking)
    }
}
