//! Dead-letter records for messages that exhausted their redelivery budget.
//!
//! A message is recorded here before its dead-letter handler runs, so a
//! failed compensation still leaves a trace operators can act on.

use crate::event::SerializedEvent;
use crate::store::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::str::FromStr;

/// Status of a dead-lettered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterStatus {
    /// Compensation failed or has not run; needs attention
    Pending,
    /// Compensation ran successfully
    Resolved,
    /// Given up on by an operator
    Discarded,
}

impl DeadLetterStatus {
    /// Convert status to its stored string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }
}

impl FromStr for DeadLetterStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(StoreError::Serialization(format!(
                "Invalid dead-letter status: {s}"
            ))),
        }
    }
}

/// A message to be recorded as dead-lettered.
#[derive(Debug, Clone)]
pub struct NewDeadLetter {
    /// Topic the message came from
    pub topic: String,
    /// Consumer group that gave up on it
    pub group_id: String,
    /// The message itself
    pub event: SerializedEvent,
    /// Last handler error
    pub error_message: String,
    /// Deliveries attempted
    pub attempts: u32,
    /// When the first delivery failed
    pub first_failed_at: DateTime<Utc>,
    /// When the last delivery failed
    pub last_failed_at: DateTime<Utc>,
}

/// A recorded dead letter.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    /// Store-assigned identifier
    pub id: i64,
    /// Topic the message came from
    pub topic: String,
    /// Consumer group that gave up on it
    pub group_id: String,
    /// The message itself
    pub event: SerializedEvent,
    /// Last handler error
    pub error_message: String,
    /// Deliveries attempted
    pub attempts: u32,
    /// When the first delivery failed
    pub first_failed_at: DateTime<Utc>,
    /// When the last delivery failed
    pub last_failed_at: DateTime<Utc>,
    /// Current status
    pub status: DeadLetterStatus,
    /// When it was resolved or discarded
    pub resolved_at: Option<DateTime<Utc>>,
    /// Who or what resolved it
    pub resolved_by: Option<String>,
    /// Notes about the resolution
    pub resolution_notes: Option<String>,
}

/// Storage for dead-lettered messages.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Record a message; returns its identifier.
    async fn add_entry(&self, entry: NewDeadLetter) -> Result<i64, StoreError>;

    /// Pending entries, oldest first.
    async fn list_pending(&self, limit: usize) -> Result<Vec<DeadLetter>, StoreError>;

    /// Load one entry.
    async fn get(&self, id: i64) -> Result<Option<DeadLetter>, StoreError>;

    /// Mark an entry resolved.
    async fn mark_resolved(
        &self,
        id: i64,
        resolved_by: &str,
        notes: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Mark an entry discarded.
    async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), StoreError>;
}
