//! # Shipkafka Runtime
//!
//! Message-handling machinery shared by both authorities.
//!
//! ## Core Components
//!
//! - [`retry`]: bounded exponential backoff
//! - [`redelivery`]: listener traits, redelivery and dead-letter routing
//! - [`consumer`]: subscribe-process-reconnect loop with per-key lanes
//! - [`publisher`]: typed publishing with metrics
//! - [`metrics`]: Prometheus exporter
//!
//! ## Example
//!
//! ```ignore
//! let redelivery = Arc::new(
//!     Redelivery::new("ship-damaged", "booking", policy, listener, dead_letter)
//!         .with_dead_letter_store(dead_letters),
//! );
//!
//! let handle = EventConsumer::builder()
//!     .event_bus(bus)
//!     .redelivery(redelivery)
//!     .shutdown(shutdown_rx)
//!     .lanes(3)
//!     .build()?
//!     .spawn();
//! ```

pub mod consumer;
pub mod metrics;
pub mod publisher;
pub mod redelivery;
pub mod retry;

pub use consumer::{ConsumerError, EventConsumer};
pub use publisher::{PublishError, Publisher};
pub use redelivery::{
    DeadLetterHandler, DeliveryOutcome, HandlerError, MessageHandler, Redelivery,
};
pub use retry::RetryPolicy;
