//! Event trait and the envelope messages travel in.
//!
//! Events are serialized with `bincode` and wrapped in a [`SerializedEvent`]
//! that carries the event type, the topic key, and optional JSON metadata.
//! Gateways only ever move envelopes; decoding back into a domain event is
//! the consumer's job.
//!
//! # Example
//!
//! ```
//! use shipkafka_core::event::{Event, SerializedEvent};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! struct ShipRenamed { name: String }
//!
//! impl Event for ShipRenamed {
//!     fn event_type(&self) -> &'static str {
//!         "ShipRenamed.v1"
//!     }
//! }
//!
//! let envelope = SerializedEvent::from_event(
//!     &ShipRenamed { name: "Ship Kiel".to_string() },
//!     Some("ship-1".to_string()),
//!     None,
//! ).unwrap();
//! assert_eq!(envelope.key.as_deref(), Some("ship-1"));
//! ```

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Error types for event operations.
#[derive(Error, Debug, Clone)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// Unknown event type encountered during deserialization.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// A message that can be published on a topic.
///
/// `event_type()` returns a stable, versioned identifier such as
/// `"BookingCreated.v1"` so consumers can route before decoding.
pub trait Event: Send + Sync + 'static {
    /// Returns the event type identifier for this event.
    fn event_type(&self) -> &'static str;

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes are corrupted or
    /// belong to a different event type.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// A serialized event ready for a topic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedEvent {
    /// The event type identifier (e.g., "BookingCreated.v1").
    pub event_type: String,

    /// Partitioning key. Messages sharing a key are delivered in publish
    /// order; `None` for broadcast topics.
    pub key: Option<String>,

    /// The bincode-serialized event data.
    pub data: Vec<u8>,

    /// Optional metadata (e.g. `correlation_id`, `attempt`).
    ///
    /// Kept as a JSON string so the envelope itself stays bincode-friendly.
    pub metadata: Option<String>,
}

impl SerializedEvent {
    /// Create a new serialized event.
    #[must_use]
    pub const fn new(
        event_type: String,
        key: Option<String>,
        data: Vec<u8>,
        metadata: Option<String>,
    ) -> Self {
        Self {
            event_type,
            key,
            data,
            metadata,
        }
    }

    /// Create a serialized event from an `Event`.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    pub fn from_event<E: Event + Serialize>(
        event: &E,
        key: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            key,
            data: event.to_bytes()?,
            metadata: metadata.map(|m| m.to_string()),
        })
    }

    /// Decode the payload into `E`.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the payload does not decode.
    pub fn decode<E: Event + DeserializeOwned>(&self) -> Result<E, EventError> {
        E::from_bytes(&self.data)
    }

    /// Parsed metadata, if present and valid JSON.
    #[must_use]
    pub fn metadata_json(&self) -> Option<serde_json::Value> {
        self.metadata
            .as_deref()
            .and_then(|m| serde_json::from_str(m).ok())
    }

    /// Encode the whole envelope for transport.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if encoding fails.
    pub fn to_wire(&self) -> Result<Vec<u8>, EventError> {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Decode an envelope produced by [`SerializedEvent::to_wire`].
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes are not an envelope.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, EventError> {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, key: {}, size: {} bytes }}",
            self.event_type,
            self.key.as_deref().unwrap_or("-"),
            self.data.len()
        )
    }
}
