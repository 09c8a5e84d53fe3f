//! The capacity record owned by the capacity authority.

use crate::ids::ShipId;
use serde::{Deserialize, Serialize};

/// A ship and the container space still available on it.
///
/// `available_containers` is unsigned, so the capacity can never go negative;
/// decrements go through [`Ship::reserve`] which refuses to underflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ship {
    /// Ship identifier
    pub id: ShipId,
    /// Display name
    pub name: String,
    /// Containers that can still be booked
    pub available_containers: u32,
    /// Whether the ship is out of service
    pub damaged: bool,
    /// Concurrency token, incremented by every persisted write (0 = never persisted)
    pub version: u64,
}

impl Ship {
    /// Create a new, unpersisted ship.
    #[must_use]
    pub fn new(name: impl Into<String>, available_containers: u32, damaged: bool) -> Self {
        Self {
            id: ShipId::new(),
            name: name.into(),
            available_containers,
            damaged,
            version: 0,
        }
    }

    /// Whether a booking for `containers` fits.
    ///
    /// The comparison is strict: a booking that would use the last free
    /// container is refused.
    #[must_use]
    pub const fn has_room_for(&self, containers: u32) -> bool {
        containers < self.available_containers
    }

    /// Take `containers` off the available capacity.
    ///
    /// Returns `false` and changes nothing if the ship has no room.
    pub fn reserve(&mut self, containers: u32) -> bool {
        if !self.has_room_for(containers) {
            return false;
        }
        self.available_containers -= containers;
        true
    }

    /// Put `containers` back onto the available capacity.
    pub fn release(&mut self, containers: u32) {
        self.available_containers = self.available_containers.saturating_add(containers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_decrements_by_exactly_the_requested_amount() {
        let mut ship = Ship::new("Ship Berlin", 5, false);
        assert!(ship.reserve(3));
        assert_eq!(ship.available_containers, 2);
    }

    #[test]
    fn reserve_refuses_when_count_is_not_strictly_below_capacity() {
        let mut ship = Ship::new("Ship Aachen", 2, false);
        assert!(!ship.reserve(2));
        assert!(!ship.reserve(3));
        assert_eq!(ship.available_containers, 2);
    }

    #[test]
    fn release_restores_capacity() {
        let mut ship = Ship::new("Ship Hamburg", 8, false);
        assert!(ship.reserve(5));
        ship.release(5);
        assert_eq!(ship.available_containers, 8);
    }
}
