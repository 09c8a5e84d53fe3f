//! Append-only ledger of saga steps, keyed by booking id.
//!
//! Each authority records what it did for a booking (created, announced,
//! reserved, published, applied, compensated). The ledger is never rewritten, which
//! makes in-flight sagas auditable and lets the capacity authority recognise
//! a redelivered `booking-created` whose outcome it already decided.

use crate::ids::{BookingId, ShipId};
use crate::status::BookingStatus;
use crate::store::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One step of a booking saga.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaStep {
    /// Booking persisted
    Requested,
    /// `booking-created` published for the booking
    Announced,
    /// Capacity taken off a ship for this booking
    CapacityReserved {
        /// Ship the capacity came from
        ship_id: ShipId,
        /// Containers reserved
        containers: u32,
    },
    /// Capacity put back onto a ship during compensation
    CapacityReleased {
        /// Ship the capacity returned to
        ship_id: ShipId,
        /// Containers released
        containers: u32,
    },
    /// Capacity decision published on `booking-outcome`
    OutcomePublished {
        /// Decided status
        status: BookingStatus,
    },
    /// Outcome applied to the booking authority's record
    OutcomeApplied {
        /// Status now stored
        status: BookingStatus,
    },
    /// Booking canceled by a compensating action
    Compensated {
        /// Status after compensation
        status: BookingStatus,
        /// Why compensation ran
        reason: String,
    },
}

impl SagaStep {
    /// Whether the saga has nothing left to do after this step.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(self, Self::OutcomeApplied { .. } | Self::Compensated { .. })
    }

    /// Short name for logs and storage.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Announced => "announced",
            Self::CapacityReserved { .. } => "capacity_reserved",
            Self::CapacityReleased { .. } => "capacity_released",
            Self::OutcomePublished { .. } => "outcome_published",
            Self::OutcomeApplied { .. } => "outcome_applied",
            Self::Compensated { .. } => "compensated",
        }
    }
}

/// A recorded step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaEntry {
    /// Booking the step belongs to
    pub booking_id: BookingId,
    /// What happened
    pub step: SagaStep,
    /// When it was recorded
    pub recorded_at: DateTime<Utc>,
}

impl SagaEntry {
    /// Create an entry.
    #[must_use]
    pub const fn new(booking_id: BookingId, step: SagaStep, recorded_at: DateTime<Utc>) -> Self {
        Self {
            booking_id,
            step,
            recorded_at,
        }
    }
}

/// Append-only saga ledger.
#[async_trait]
pub trait SagaLog: Send + Sync {
    /// Record a step.
    async fn append(&self, entry: SagaEntry) -> Result<(), StoreError>;

    /// Steps recorded for a booking, oldest first.
    async fn history(&self, booking_id: BookingId) -> Result<Vec<SagaEntry>, StoreError>;

    /// Bookings whose latest step is not final.
    async fn in_flight(&self) -> Result<Vec<BookingId>, StoreError>;
}

/// Reservation recorded in `history` and not yet released, if any.
#[must_use]
pub fn outstanding_reservation(history: &[SagaEntry]) -> Option<(ShipId, u32)> {
    let mut outstanding = None;
    for entry in history {
        match &entry.step {
            SagaStep::CapacityReserved {
                ship_id,
                containers,
            } => outstanding = Some((*ship_id, *containers)),
            SagaStep::CapacityReleased { .. } => outstanding = None,
            _ => {}
        }
    }
    outstanding
}

/// Latest outcome published in `history`, if any.
#[must_use]
pub fn published_outcome(history: &[SagaEntry]) -> Option<BookingStatus> {
    history.iter().rev().find_map(|entry| match entry.step {
        SagaStep::OutcomePublished { status } => Some(status),
        _ => None,
    })
}
