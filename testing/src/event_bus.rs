//! In-memory event bus with per-group positions.
//!
//! Every topic is an append-only log. A consumer group that subscribes for
//! the first time starts at the beginning of the log; a group that
//! resubscribes continues after the last message handed to it. Within a
//! group, the latest subscription receives the messages.
//!
//! Delivery is at-most-once per group: a message handed to a subscription
//! that is dropped before reading it is not redelivered.

use async_stream::stream;
use shipkafka_core::ShippingEvent;
use shipkafka_core::event::SerializedEvent;
use shipkafka_core::event_bus::{Delivery, EventBus, EventBusError, EventStream};
use std::collections::HashMap;
use std::future::{Future, ready};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

type GroupKey = (String, String);

#[derive(Default)]
struct BusState {
    logs: HashMap<String, Vec<SerializedEvent>>,
    positions: HashMap<GroupKey, usize>,
    subscribers: HashMap<GroupKey, mpsc::UnboundedSender<SerializedEvent>>,
    publish_failure: Option<String>,
}

impl BusState {
    fn deliver_pending(&mut self, topic: &str) {
        let Some(log) = self.logs.get(topic) else {
            return;
        };
        let groups: Vec<GroupKey> = self
            .subscribers
            .keys()
            .filter(|(t, _)| t == topic)
            .cloned()
            .collect();

        for group in groups {
            let position = self.positions.entry(group.clone()).or_insert(0);
            while let Some(event) = log.get(*position) {
                let sent = self
                    .subscribers
                    .get(&group)
                    .is_some_and(|tx| tx.send(event.clone()).is_ok());
                if !sent {
                    self.subscribers.remove(&group);
                    break;
                }
                *position += 1;
            }
        }
    }
}

/// Event bus that keeps everything in process memory.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BusState>, EventBusError> {
        self.state
            .lock()
            .map_err(|e| EventBusError::TransportError(e.to_string()))
    }

    /// Everything ever published on `topic`, oldest first.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<SerializedEvent> {
        self.lock()
            .ok()
            .and_then(|state| state.logs.get(topic).cloned())
            .unwrap_or_default()
    }

    /// Decoded messages published on `topic`; undecodable ones are skipped.
    #[must_use]
    pub fn published_events(&self, topic: &str) -> Vec<ShippingEvent> {
        self.published(topic)
            .iter()
            .filter_map(|envelope| ShippingEvent::from_envelope(envelope).ok())
            .collect()
    }

    /// Make every publish fail with `reason` until [`Self::restore_publishes`].
    pub fn fail_publishes(&self, reason: impl Into<String>) {
        if let Ok(mut state) = self.lock() {
            state.publish_failure = Some(reason.into());
        }
    }

    /// Undo [`Self::fail_publishes`].
    pub fn restore_publishes(&self) {
        if let Ok(mut state) = self.lock() {
            state.publish_failure = None;
        }
    }

    fn append(&self, topic: &str, event: &SerializedEvent) -> Result<(), EventBusError> {
        let mut state = self.lock()?;
        if let Some(reason) = &state.publish_failure {
            return Err(EventBusError::PublishFailed {
                topic: topic.to_string(),
                reason: reason.clone(),
            });
        }
        state
            .logs
            .entry(topic.to_string())
            .or_default()
            .push(event.clone());
        state.deliver_pending(topic);
        Ok(())
    }

    fn attach(&self, topics: &[&str], group_id: &str) -> Result<EventStream, EventBusError> {
        if topics.is_empty() {
            return Err(EventBusError::SubscriptionFailed {
                topics: Vec::new(),
                reason: "no topics given".to_string(),
            });
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = self.lock()?;
        for topic in topics {
            state
                .subscribers
                .insert(((*topic).to_string(), group_id.to_string()), tx.clone());
            state.deliver_pending(topic);
        }
        drop(state);
        drop(tx);

        Ok(Box::pin(stream! {
            while let Some(event) = rx.recv().await {
                yield Ok::<_, EventBusError>(Delivery::new(event));
            }
        }))
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        Box::pin(ready(self.append(topic, event)))
    }

    fn subscribe(
        &self,
        topics: &[&str],
        group_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        Box::pin(ready(self.attach(topics, group_id)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code
mod tests {
    use super::*;
    use futures::StreamExt;

    fn message(key: &str) -> SerializedEvent {
        SerializedEvent::new("Test.v1".to_string(), Some(key.to_string()), vec![], None)
    }

    #[tokio::test]
    async fn new_group_replays_from_the_start() {
        let bus = InMemoryEventBus::new();
        bus.publish("t", &message("a")).await.unwrap();
        bus.publish("t", &message("b")).await.unwrap();

        let mut stream = bus.subscribe(&["t"], "g").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().event.key.as_deref(), Some("a"));
        assert_eq!(stream.next().await.unwrap().unwrap().event.key.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn groups_have_independent_positions() {
        let bus = InMemoryEventBus::new();
        let mut first = bus.subscribe(&["t"], "g1").await.unwrap();
        bus.publish("t", &message("a")).await.unwrap();
        let mut second = bus.subscribe(&["t"], "g2").await.unwrap();

        assert_eq!(first.next().await.unwrap().unwrap().event.key.as_deref(), Some("a"));
        assert_eq!(second.next().await.unwrap().unwrap().event.key.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn resubscribing_continues_after_last_delivery() {
        let bus = InMemoryEventBus::new();
        bus.publish("t", &message("a")).await.unwrap();
        let mut stream = bus.subscribe(&["t"], "g").await.unwrap();
        stream.next().await.unwrap().unwrap();
        drop(stream);

        bus.publish("t", &message("b")).await.unwrap();
        let mut stream = bus.subscribe(&["t"], "g").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap().event.key.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn publish_failure_is_reported_and_not_logged() {
        let bus = InMemoryEventBus::new();
        bus.fail_publishes("broker down");

        let result = bus.publish("t", &message("a")).await;
        assert!(matches!(result, Err(EventBusError::PublishFailed { .. })));
        assert!(bus.published("t").is_empty());

        bus.restore_publishes();
        bus.publish("t", &message("a")).await.unwrap();
        assert_eq!(bus.published("t").len(), 1);
    }
}
