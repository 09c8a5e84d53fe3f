//! Typed publishing onto the saga topics.

use crate::metrics::PublishMetrics;
use shipkafka_core::ShippingEvent;
use shipkafka_core::event::EventError;
use shipkafka_core::event_bus::{EventBus, EventBusError};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Errors from publishing a [`ShippingEvent`].
#[derive(Error, Debug, Clone)]
pub enum PublishError {
    /// The message could not be encoded.
    #[error(transparent)]
    Encode(#[from] EventError),

    /// The bus rejected the message.
    #[error(transparent)]
    Bus(#[from] EventBusError),
}

/// Publishes saga messages on the topic and key each one belongs to.
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn EventBus>,
}

impl Publisher {
    /// Publish through `bus`.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    /// The underlying bus.
    #[must_use]
    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    /// Publish `event` on its topic, keyed by booking id where it has one.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] if encoding fails or the bus does not
    /// acknowledge the message.
    pub async fn publish(&self, event: &ShippingEvent) -> Result<(), PublishError> {
        let topic = event.topic();
        let envelope = event.to_envelope()?;
        let started = Instant::now();

        self.bus.publish(topic.name(), &envelope).await?;

        PublishMetrics::record(topic.name(), started.elapsed());
        tracing::debug!(
            %topic,
            key = envelope.key.as_deref().unwrap_or("-"),
            event_type = %envelope.event_type,
            "Published"
        );
        Ok(())
    }
}
