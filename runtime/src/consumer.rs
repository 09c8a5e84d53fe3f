//! Keyed event consumer with automatic reconnection.
//!
//! `EventConsumer` owns the subscribe-process-reconnect loop for one listener:
//!
//! ```text
//! loop {
//!     subscribe(topic, group)
//!         for each message:
//!             lane = hash(key) % lanes      (unkeyed -> lane 0)
//!             lanes[lane].send(message)
//!     stream ended -> drain lanes, wait, resubscribe
//!     shutdown     -> drain lanes, stop
//! }
//! ```
//!
//! Every lane is a task that runs [`Redelivery::deliver`] on its messages one
//! at a time, so messages sharing a key are handled in publication order
//! while different keys proceed in parallel. A message being redelivered
//! holds up only its own lane.
//!
//! A delivery is settled only after [`Redelivery::deliver`] returns. On
//! shutdown the lanes finish what they already hold; messages the gateway
//! buffered but never handed to a lane stay unsettled and come back on the
//! next subscription.

use crate::redelivery::Redelivery;
use futures::StreamExt;
use shipkafka_core::event_bus::{Delivery, EventBus, EventStream};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Messages buffered per lane before the consumer stops reading.
const LANE_CAPACITY: usize = 64;

/// Errors from building a consumer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// A required builder field was not set.
    #[error("Consumer is missing required field '{0}'")]
    MissingField(&'static str),
}

/// Lane for a message key. Unkeyed messages always go to lane `0`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn lane_for(key: Option<&str>, lanes: usize) -> usize {
    match key {
        Some(key) if lanes > 1 => {
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            (hasher.finish() % lanes as u64) as usize
        }
        _ => 0,
    }
}

enum StreamEnd {
    Shutdown,
    Ended,
}

/// Consumer for one listener.
pub struct EventConsumer {
    name: String,
    event_bus: Arc<dyn EventBus>,
    redelivery: Arc<Redelivery>,
    shutdown: broadcast::Receiver<()>,
    retry_delay: Duration,
    lanes: usize,
}

impl EventConsumer {
    /// Create a builder for configuring a consumer.
    #[must_use]
    pub fn builder() -> EventConsumerBuilder {
        EventConsumerBuilder::default()
    }

    /// Spawn the consumer as a background task.
    ///
    /// The task ends after a shutdown signal once every lane has drained.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        let topic = self.redelivery.topic().to_string();
        let group = self.redelivery.group_id().to_string();
        info!(consumer = %self.name, %topic, %group, lanes = self.lanes, "Event consumer started");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Event consumer received shutdown signal");
                    break;
                }
                subscribe_result = self.event_bus.subscribe(&[topic.as_str()], &group) => {
                    match subscribe_result {
                        Ok(mut stream) => {
                            info!(consumer = %self.name, %topic, "Subscribed to event bus");
                            if let StreamEnd::Shutdown = self.process_stream(&mut stream).await {
                                break;
                            }
                            warn!(consumer = %self.name, "Event stream ended, reconnecting in {:?}", self.retry_delay);
                        }
                        Err(e) => {
                            error!(
                                consumer = %self.name,
                                error = %e,
                                "Failed to subscribe to event bus, retrying in {:?}",
                                self.retry_delay
                            );
                        }
                    }
                    tokio::select! {
                        _ = self.shutdown.recv() => break,
                        () = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }

        info!(consumer = %self.name, "Event consumer stopped");
    }

    async fn process_stream(&mut self, stream: &mut EventStream) -> StreamEnd {
        let mut lanes: Vec<mpsc::Sender<Delivery>> = Vec::with_capacity(self.lanes);
        let mut workers = JoinSet::new();

        for lane in 0..self.lanes {
            let (tx, mut rx) = mpsc::channel::<Delivery>(LANE_CAPACITY);
            let redelivery = Arc::clone(&self.redelivery);
            let name = self.name.clone();
            workers.spawn(async move {
                while let Some(delivery) = rx.recv().await {
                    let outcome = redelivery.deliver(&delivery.event).await;
                    delivery.settle();
                    debug!(consumer = %name, lane, ?outcome, "Message settled");
                }
            });
            lanes.push(tx);
        }

        let end = loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Shutdown requested, draining lanes");
                    break StreamEnd::Shutdown;
                }
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        let lane = lane_for(delivery.event.key.as_deref(), self.lanes);
                        let Some(sender) = lanes.get(lane) else {
                            error!(consumer = %self.name, lane, "No such lane");
                            continue;
                        };
                        if sender.send(delivery).await.is_err() {
                            error!(consumer = %self.name, lane, "Lane stopped, message dropped");
                        }
                    }
                    Some(Err(e)) => {
                        error!(consumer = %self.name, error = %e, "Error receiving event from stream");
                    }
                    None => break StreamEnd::Ended,
                }
            }
        };

        drop(lanes);
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(consumer = %self.name, error = %e, "Lane task failed");
            }
        }

        end
    }
}

/// Builder for configuring an `EventConsumer`.
#[derive(Default)]
pub struct EventConsumerBuilder {
    name: Option<String>,
    event_bus: Option<Arc<dyn EventBus>>,
    redelivery: Option<Arc<Redelivery>>,
    shutdown: Option<broadcast::Receiver<()>>,
    retry_delay: Option<Duration>,
    lanes: Option<usize>,
}

impl EventConsumerBuilder {
    /// Set consumer name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set event bus instance.
    #[must_use]
    pub fn event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Set the listener, including its topic and group.
    #[must_use]
    pub fn redelivery(mut self, redelivery: Arc<Redelivery>) -> Self {
        self.redelivery = Some(redelivery);
        self
    }

    /// Set shutdown signal receiver.
    #[must_use]
    pub fn shutdown(mut self, shutdown: broadcast::Receiver<()>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Set the reconnect delay (default: 5 seconds).
    #[must_use]
    pub const fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Set the number of parallel lanes (default: 1, minimum: 1).
    #[must_use]
    pub const fn lanes(mut self, lanes: usize) -> Self {
        self.lanes = Some(lanes);
        self
    }

    /// Build the `EventConsumer`.
    ///
    /// # Errors
    ///
    /// Returns [`ConsumerError::MissingField`] if the event bus, listener or
    /// shutdown receiver is not set.
    pub fn build(self) -> Result<EventConsumer, ConsumerError> {
        let redelivery = self
            .redelivery
            .ok_or(ConsumerError::MissingField("redelivery"))?;
        Ok(EventConsumer {
            name: self
                .name
                .unwrap_or_else(|| format!("{}:{}", redelivery.group_id(), redelivery.topic())),
            event_bus: self
                .event_bus
                .ok_or(ConsumerError::MissingField("event_bus"))?,
            shutdown: self
                .shutdown
                .ok_or(ConsumerError::MissingField("shutdown"))?,
            retry_delay: self.retry_delay.unwrap_or(Duration::from_secs(5)),
            lanes: self.lanes.unwrap_or(1).max(1),
            redelivery,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unkeyed_messages_use_lane_zero() {
        assert_eq!(lane_for(None, 8), 0);
    }

    #[test]
    fn same_key_same_lane() {
        let first = lane_for(Some("booking-1"), 4);
        for _ in 0..10 {
            assert_eq!(lane_for(Some("booking-1"), 4), first);
        }
        assert!(first < 4);
    }

    #[test]
    fn single_lane_takes_everything() {
        assert_eq!(lane_for(Some("anything"), 1), 0);
        assert_eq!(lane_for(Some("anything"), 0), 0);
    }

    #[test]
    fn build_requires_a_listener() {
        let (_tx, rx) = broadcast::channel(1);
        assert_eq!(
            EventConsumer::builder().shutdown(rx).build().err(),
            Some(ConsumerError::MissingField("redelivery"))
        );
    }
}
