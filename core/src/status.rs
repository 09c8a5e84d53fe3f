//! Booking lifecycle status machine.
//!
//! ```text
//!  REQUESTED ──► CONFIRMED
//!      │             │
//!      └────► CANCELED ◄┘
//! ```
//!
//! Every status lists the statuses it may be entered from. A transition is
//! legal only when the current status appears in the target's predecessor
//! set, which rules out self-transitions: `CONFIRMED` is not its own
//! predecessor, so applying an outcome twice fails instead of passing
//! silently. `REQUESTED` has no predecessors and is never a target.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle status of a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    /// Created by the booking authority, awaiting the capacity decision
    Requested,
    /// Capacity reserved on the ship
    Confirmed,
    /// Terminal: shortfall, ship damage, or dead-letter compensation
    Canceled,
}

/// A move the status machine refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Illegal state transition from {from} to {to}")]
pub struct IllegalStateTransition {
    /// Status the record was in
    pub from: BookingStatus,
    /// Status that was requested
    pub to: BookingStatus,
}

impl BookingStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 3] = [Self::Requested, Self::Confirmed, Self::Canceled];

    /// Statuses from which `self` may be entered.
    #[must_use]
    pub const fn predecessors(self) -> &'static [Self] {
        match self {
            Self::Requested => &[],
            Self::Confirmed => &[Self::Requested],
            Self::Canceled => &[Self::Requested, Self::Confirmed],
        }
    }

    /// Whether moving from `self` to `requested` is allowed.
    #[must_use]
    pub fn can_transition(self, requested: Self) -> bool {
        requested.predecessors().contains(&self)
    }

    /// Move from `self` to `requested`.
    ///
    /// # Errors
    ///
    /// Returns [`IllegalStateTransition`] when `self` is not a predecessor of
    /// `requested`, including when both are the same status.
    pub fn transition(self, requested: Self) -> Result<Self, IllegalStateTransition> {
        if self.can_transition(requested) {
            Ok(requested)
        } else {
            Err(IllegalStateTransition {
                from: self,
                to: requested,
            })
        }
    }

    /// Whether no further transition can leave this status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !Self::ALL.iter().any(|next| self.can_transition(*next))
    }

    /// Wire/database representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Confirmed => "CONFIRMED",
            Self::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised status name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown booking status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for BookingStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REQUESTED" => Ok(Self::Requested),
            "CONFIRMED" => Ok(Self::Confirmed),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::BookingStatus::{Canceled, Confirmed, Requested};
    use super::*;
    use proptest::prelude::*;

    fn any_status() -> impl Strategy<Value = BookingStatus> {
        prop_oneof![Just(Requested), Just(Confirmed), Just(Canceled)]
    }

    #[test]
    fn forward_transitions_succeed() {
        assert_eq!(Requested.transition(Confirmed), Ok(Confirmed));
        assert_eq!(Requested.transition(Canceled), Ok(Canceled));
        assert_eq!(Confirmed.transition(Canceled), Ok(Canceled));
    }

    #[test]
    fn confirmed_cannot_go_back_to_requested() {
        assert_eq!(
            Confirmed.transition(Requested),
            Err(IllegalStateTransition {
                from: Confirmed,
                to: Requested
            })
        );
    }

    #[test]
    fn canceled_is_terminal() {
        for target in BookingStatus::ALL {
            assert!(Canceled.transition(target).is_err(), "CANCELED -> {target}");
        }
        assert!(Canceled.is_terminal());
        assert!(!Requested.is_terminal());
        assert!(!Confirmed.is_terminal());
    }

    #[test]
    fn requested_is_never_a_target() {
        for from in BookingStatus::ALL {
            assert!(from.transition(Requested).is_err());
        }
    }

    #[test]
    fn error_message_names_both_states() {
        let err = Confirmed.transition(Confirmed).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Illegal state transition from CONFIRMED to CONFIRMED"
        );
    }

    #[test]
    fn status_names_parse() {
        for status in BookingStatus::ALL {
            assert_eq!(status.as_str().parse::<BookingStatus>(), Ok(status));
        }
        assert!("PENDING".parse::<BookingStatus>().is_err());
    }

    proptest! {
        #[test]
        fn no_self_transition_is_permitted(status in any_status()) {
            prop_assert!(status.transition(status).is_err());
        }

        #[test]
        fn successful_transition_lands_on_the_target(from in any_status(), to in any_status()) {
            match from.transition(to) {
                Ok(next) => prop_assert_eq!(next, to),
                Err(err) => {
                    prop_assert_eq!(err.from, from);
                    prop_assert!(!to.predecessors().contains(&from));
                }
            }
        }
    }
}
