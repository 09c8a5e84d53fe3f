//! Event gateway abstraction over keyed, durable topics.
//!
//! The two authorities never share a database; everything they tell each
//! other goes through an [`EventBus`].
//!
//! # Contracts
//!
//! - **Per-key ordering**: envelopes sharing a [`SerializedEvent::key`] reach
//!   a single consumer of a group in publish order. Different keys may be
//!   processed concurrently.
//! - **At-least-once**: an envelope may be delivered again after a handler
//!   fault or a consumer restart. Handlers must tolerate re-invocation.
//!   Subscriptions yield [`Delivery`] values; a gateway only counts a message
//!   as consumed once its delivery is [settled](Delivery::settle), so
//!   anything received but never settled comes back after a restart.
//! - **Consumer groups**: each group receives every envelope once; members
//!   of the same group share the partitions.
//!
//! # Implementations
//!
//! - `InMemoryEventBus` in `shipkafka-testing` - for tests and single-process runs
//! - `RedpandaEventBus` in `shipkafka-redpanda` - Kafka-compatible, for production
//!
//! # Example
//!
//! ```rust,ignore
//! use shipkafka_core::event_bus::EventBus;
//! use futures::StreamExt;
//!
//! async fn example(bus: impl EventBus) -> Result<(), Box<dyn std::error::Error>> {
//!     bus.publish("booking-created", &envelope).await?;
//!
//!     let mut stream = bus.subscribe(&["booking-outcome"], "booking").await?;
//!     while let Some(result) = stream.next().await {
//!         match result {
//!             Ok(delivery) => {
//!                 println!("Received: {}", delivery.event.event_type);
//!                 delivery.settle();
//!             }
//!             Err(e) => eprintln!("Error: {e}"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use crate::event::SerializedEvent;
use futures::Stream;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to deserialize an event
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Topic could not be provisioned
    #[error("Topic provisioning failed for '{topic}': {reason}")]
    ProvisioningFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// A received envelope, waiting to be settled.
///
/// Dropping a delivery without settling it leaves the message unconsumed.
pub struct Delivery {
    /// The received envelope
    pub event: SerializedEvent,
    settle: Option<Box<dyn FnOnce() + Send>>,
}

impl Delivery {
    /// A delivery with nothing to acknowledge.
    #[must_use]
    pub fn new(event: SerializedEvent) -> Self {
        Self {
            event,
            settle: None,
        }
    }

    /// A delivery that runs `settle` once the message has been handled.
    #[must_use]
    pub fn with_settle(event: SerializedEvent, settle: impl FnOnce() + Send + 'static) -> Self {
        Self {
            event,
            settle: Some(Box::new(settle)),
        }
    }

    /// Mark the message as handled.
    pub fn settle(mut self) {
        if let Some(settle) = self.settle.take() {
            settle();
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("event", &self.event)
            .field("acknowledged", &self.settle.is_some())
            .finish()
    }
}

/// Stream of deliveries from a subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Publish/subscribe against named, keyed topics.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` rather than using `async fn` so the
/// trait can be shared as `Arc<dyn EventBus>` by both authorities and the
/// consumer runtime.
pub trait EventBus: Send + Sync {
    /// Publish an envelope to a topic, partitioned by its key.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the broker does not accept it.
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Join consumer group `group_id` on `topics`.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription cannot be set up.
    fn subscribe(
        &self,
        topics: &[&str],
        group_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;
}
