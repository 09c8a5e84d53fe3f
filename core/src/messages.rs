//! Topics and the messages exchanged between the two authorities.
//!
//! | Topic | Key | Payload |
//! |---|---|---|
//! | `booking-created` | booking id | [`Booking`] snapshot |
//! | `booking-outcome` | booking id | [`Booking`] snapshot with the decided status |
//! | `ship-damaged` | none | [`ShipDamaged`] |

use crate::booking::Booking;
use crate::event::{Event, EventError, SerializedEvent};
use crate::ids::ShipId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Topics used by the saga.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Bookings awaiting a capacity decision
    BookingCreated,
    /// Capacity decisions on their way back to the booking authority
    BookingOutcome,
    /// Broadcast: a ship went out of service
    ShipDamaged,
}

impl Topic {
    /// Every topic, for provisioning.
    pub const ALL: [Self; 3] = [Self::BookingCreated, Self::BookingOutcome, Self::ShipDamaged];

    /// Wire name of the topic.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::BookingCreated => "booking-created",
            Self::BookingOutcome => "booking-outcome",
            Self::ShipDamaged => "ship-damaged",
        }
    }

    /// Whether messages on this topic are keyed by booking id.
    #[must_use]
    pub const fn is_keyed(self) -> bool {
        matches!(self, Self::BookingCreated | Self::BookingOutcome)
    }

    /// Whether the topic keeps only the latest message per key.
    #[must_use]
    pub const fn is_compacted(self) -> bool {
        self.is_keyed()
    }

    /// Look a topic up by wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload of the `ship-damaged` broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipDamaged {
    /// The ship that went out of service
    pub ship_id: ShipId,
}

/// Every message that travels between the authorities.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShippingEvent {
    /// A booking was created and needs a capacity decision
    BookingCreated(Booking),
    /// The capacity authority decided on a booking
    BookingOutcome(Booking),
    /// A ship was marked damaged
    ShipDamaged(ShipDamaged),
}

impl Event for ShippingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::BookingCreated(_) => "BookingCreated.v1",
            Self::BookingOutcome(_) => "BookingOutcome.v1",
            Self::ShipDamaged(_) => "ShipDamaged.v1",
        }
    }
}

impl ShippingEvent {
    /// Topic this message is published on.
    #[must_use]
    pub const fn topic(&self) -> Topic {
        match self {
            Self::BookingCreated(_) => Topic::BookingCreated,
            Self::BookingOutcome(_) => Topic::BookingOutcome,
            Self::ShipDamaged(_) => Topic::ShipDamaged,
        }
    }

    /// Topic key: the booking id for booking messages, none for broadcasts.
    #[must_use]
    pub fn key(&self) -> Option<String> {
        match self {
            Self::BookingCreated(booking) | Self::BookingOutcome(booking) => Some(booking.id.key()),
            Self::ShipDamaged(_) => None,
        }
    }

    /// Wrap into an envelope ready for [`Self::topic`].
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if encoding fails.
    pub fn to_envelope(&self) -> Result<SerializedEvent, EventError> {
        SerializedEvent::from_event(self, self.key(), None)
    }

    /// Decode an envelope received from any topic.
    ///
    /// # Errors
    ///
    /// Returns `EventError::UnknownEventType` for foreign event types and
    /// `EventError::DeserializationError` for corrupt payloads.
    pub fn from_envelope(envelope: &SerializedEvent) -> Result<Self, EventError> {
        match envelope.event_type.as_str() {
            "BookingCreated.v1" | "BookingOutcome.v1" | "ShipDamaged.v1" => envelope.decode(),
            other => Err(EventError::UnknownEventType(other.to_string())),
        }
    }
}
