//! Redpanda event bus for the booking saga.
//!
//! Implements [`EventBus`] on rdkafka, so any Kafka-compatible broker works.
//!
//! # Topics
//!
//! ```text
//! booking-created   keyed by booking id, compacted, N partitions
//! booking-outcome   keyed by booking id, compacted, N partitions
//! ship-damaged      unkeyed, 1 partition
//! ```
//!
//! Keying by booking id puts every message about one booking on one
//! partition, so a consumer sees them in publication order.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - A partition's offset is committed only once every message before it has
//!   been [settled](shipkafka_core::event_bus::Delivery::settle)
//! - Messages buffered but not settled when the subscription closes are
//!   read again by the group's next subscription
//! - Listeners must tolerate duplicates
//!
//! # Example
//!
//! ```no_run
//! use shipkafka_redpanda::RedpandaEventBus;
//! use shipkafka_core::event_bus::EventBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_bus = RedpandaEventBus::new("localhost:9092")?;
//! event_bus.ensure_topics(3).await?;
//!
//! let mut stream = event_bus.subscribe(&["booking-created"], "ship").await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(delivery) => {
//!             println!("Received: {}", delivery.event);
//!             delivery.settle();
//!         }
//!         Err(e) => eprintln!("Error: {}", e),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use shipkafka_core::Topic;
use shipkafka_core::event::SerializedEvent;
use shipkafka_core::event_bus::{Delivery, EventBus, EventBusError, EventStream};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;

mod offsets;

use offsets::{OffsetTracker, Position};

/// Partition count and cleanup policy for one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    /// Topic name
    pub name: &'static str,
    /// Number of partitions
    pub partitions: i32,
    /// Whether the topic is log-compacted
    pub compacted: bool,
}

/// How each saga topic is provisioned, given the partition count for the
/// keyed topics.
#[must_use]
pub fn topic_specs(partitions: i32) -> Vec<TopicSpec> {
    Topic::ALL
        .into_iter()
        .map(|topic| TopicSpec {
            name: topic.name(),
            partitions: if topic.is_keyed() { partitions.max(1) } else { 1 },
            compacted: topic.is_compacted(),
        })
        .collect()
}

/// Redpanda event bus implementation.
///
/// # Example
///
/// ```no_run
/// use shipkafka_redpanda::RedpandaEventBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    producer: FutureProducer,
    brokers: String,
    timeout: Duration,
    buffer_size: usize,
    auto_offset_reset: String,
}

impl RedpandaEventBus {
    /// Create a new Redpanda event bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be
    /// created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Create the saga topics if they do not exist yet.
    ///
    /// Topics that already exist are left as they are.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ProvisioningFailed`] if the admin client
    /// cannot be created or a topic cannot be created.
    pub async fn ensure_topics(&self, partitions: i32) -> Result<(), EventBusError> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .create()
            .map_err(|e| EventBusError::ProvisioningFailed {
                topic: "*".to_string(),
                reason: format!("Failed to create admin client: {e}"),
            })?;

        let specs = topic_specs(partitions);
        let new_topics: Vec<NewTopic<'_>> = specs
            .iter()
            .map(|spec| {
                let topic = NewTopic::new(spec.name, spec.partitions, TopicReplication::Fixed(1));
                if spec.compacted {
                    topic.set("cleanup.policy", "compact")
                } else {
                    topic
                }
            })
            .collect();

        let results = admin
            .create_topics(&new_topics, &AdminOptions::new().operation_timeout(Some(self.timeout)))
            .await
            .map_err(|e| EventBusError::ProvisioningFailed {
                topic: "*".to_string(),
                reason: e.to_string(),
            })?;

        for result in results {
            match result {
                Ok(topic) => tracing::info!(%topic, "Topic created"),
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    tracing::debug!(%topic, "Topic already exists");
                }
                Err((topic, code)) => {
                    return Err(EventBusError::ProvisioningFailed {
                        topic,
                        reason: code.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Builder for configuring a [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaEventBusBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set how many messages a subscription buffers (default: 1000, minimum: 1).
    #[must_use]
    pub const fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Set where a group without committed offsets starts reading.
    ///
    /// Default: "earliest", so a fresh group sees the whole retained log.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or
    /// the producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", acks)
            .set("enable.idempotence", if acks == "all" { "true" } else { "false" })
            .set("compression.type", compression)
            .create()
            .map_err(|e| EventBusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let buffer_size = self.buffer_size.unwrap_or(1000).max(1);
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaEventBus created successfully"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            buffer_size,
            auto_offset_reset,
        })
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let payload = event.to_wire().map_err(|e| EventBusError::PublishFailed {
                topic: topic.clone(),
                reason: e.to_string(),
            })?;

            let mut record: FutureRecord<'_, str, Vec<u8>> =
                FutureRecord::to(&topic).payload(&payload);
            if let Some(key) = event.key.as_deref() {
                record = record.key(key);
            }

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        key = event.key.as_deref().unwrap_or("-"),
                        event_type = %event.event_type,
                        "Event published successfully"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %topic, error = %kafka_error, "Failed to publish event");
                    Err(EventBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
        group_id: &str,
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let group_id = group_id.to_string();
        let brokers = self.brokers.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                group = %group_id,
                buffer_size,
                auto_offset_reset = %auto_offset_reset,
                "Subscribed to topics"
            );

            let (tx, mut rx) = mpsc::channel::<Result<Delivery, EventBusError>>(buffer_size);
            let (settled_tx, settled_rx) = mpsc::unbounded_channel::<Position>();

            tokio::spawn(read_partitions(consumer, tx, settled_tx, settled_rx));

            let stream = async_stream::stream! {
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }
}

fn decode(payload: Option<&[u8]>) -> Result<SerializedEvent, EventBusError> {
    match payload {
        None => Err(EventBusError::DeserializationFailed(
            "Message has no payload".to_string(),
        )),
        Some(payload) => SerializedEvent::from_wire(payload)
            .map_err(|e| EventBusError::DeserializationFailed(e.to_string())),
    }
}

fn commit(consumer: &StreamConsumer, position: &Position, next: i64, mode: CommitMode) {
    let mut list = TopicPartitionList::new();
    let result = list
        .add_partition_offset(&position.topic, position.partition, Offset::Offset(next))
        .and_then(|()| consumer.commit(&list, mode));
    if let Err(e) = result {
        tracing::warn!(
            topic = %position.topic,
            partition = position.partition,
            offset = next,
            error = %e,
            "Failed to commit offset (messages may be redelivered)"
        );
    }
}

/// Read messages into `tx` and commit them as the subscriber settles them.
///
/// Runs until the subscriber drops its end or the consumer stream ends,
/// then commits whatever was settled in the meantime.
async fn read_partitions(
    consumer: StreamConsumer,
    tx: mpsc::Sender<Result<Delivery, EventBusError>>,
    settled_tx: mpsc::UnboundedSender<Position>,
    mut settled_rx: mpsc::UnboundedReceiver<Position>,
) {
    use futures::StreamExt;

    let mut offsets = OffsetTracker::default();
    let mut stream = consumer.stream();

    loop {
        tokio::select! {
            biased;

            Some(position) = settled_rx.recv() => {
                if let Some(next) = offsets.settle(&position) {
                    commit(&consumer, &position, next, CommitMode::Async);
                }
            }
            () = tx.closed() => {
                tracing::debug!("Subscriber dropped, exiting consumer task");
                break;
            }
            next = stream.next() => {
                let item = match next {
                    None => break,
                    Some(Ok(message)) => {
                        let position = Position {
                            topic: message.topic().to_string(),
                            partition: message.partition(),
                            offset: message.offset(),
                        };
                        offsets.track(&position);
                        match decode(message.payload()) {
                            Ok(event) => {
                                let settled = settled_tx.clone();
                                Ok(Delivery::with_settle(event, move || {
                                    let _ = settled.send(position);
                                }))
                            }
                            Err(e) => {
                                // Undecodable: nothing will ever settle it.
                                if let Some(next) = offsets.settle(&position) {
                                    commit(&consumer, &position, next, CommitMode::Async);
                                }
                                Err(e)
                            }
                        }
                    }
                    Some(Err(e)) => Err(EventBusError::TransportError(format!(
                        "Failed to receive message: {e}"
                    ))),
                };
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(stream);
    drop(settled_tx);
    while let Ok(position) = settled_rx.try_recv() {
        if let Some(next) = offsets.settle(&position) {
            commit(&consumer, &position, next, CommitMode::Sync);
        }
    }

    tracing::debug!("Consumer task exiting");
}
