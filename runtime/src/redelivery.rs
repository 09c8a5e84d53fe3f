//! Per-listener redelivery and dead-letter routing.
//!
//! A [`Redelivery`] wraps one listener. Each message is handed to the
//! [`MessageHandler`]; a retryable failure is redelivered on the listener's
//! [`RetryPolicy`] schedule, and a message that still fails (or fails
//! permanently) is recorded in the [`DeadLetterStore`] and passed to the
//! listener's [`DeadLetterHandler`]. The dead-letter handler runs under the
//! same policy: a retryable compensation failure is retried, a permanent
//! one leaves the entry pending.
//!
//! ```text
//! deliver ─► handle ─ok──────────────────────────────► Handled
//!              │ err (retryable, budget left)
//!              ├──── sleep(backoff) ─► handle ...
//!              │ err (permanent or budget spent)
//!              └──► record pending ─► dead-letter handler ─ok─► resolve
//!                                       ▲ retryable err  │
//!                                       └────────────────┤
//!                                                        └err─► stays pending
//! ```
//!
//! Nothing in here panics: a failing dead-letter handler is logged and
//! counted, and the consumer moves on to the next message.

use crate::retry::{Attempted, RetryPolicy, retry_with_predicate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use shipkafka_core::dead_letter::{DeadLetterStore, NewDeadLetter};
use shipkafka_core::environment::{Clock, SystemClock};
use shipkafka_core::event::SerializedEvent;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{error, info, warn};

/// Failure of a listener's handler, classified for redelivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// May succeed on redelivery.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Will fail the same way every time.
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// Payload could not be decoded.
    #[error("Malformed message: {0}")]
    Malformed(String),
}

impl HandlerError {
    /// Build a [`HandlerError::Transient`].
    pub fn transient(error: impl ToString) -> Self {
        Self::Transient(error.to_string())
    }

    /// Build a [`HandlerError::Permanent`].
    pub fn permanent(error: impl ToString) -> Self {
        Self::Permanent(error.to_string())
    }

    /// Build a [`HandlerError::Malformed`].
    pub fn malformed(error: impl ToString) -> Self {
        Self::Malformed(error.to_string())
    }

    /// Whether the message should be redelivered.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Handles messages from one topic for one consumer group.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one delivery of `event`.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] whose variant decides whether the message
    /// is redelivered.
    async fn handle(&self, event: &SerializedEvent) -> Result<(), HandlerError>;
}

/// Compensating action for a message that exhausted its redeliveries.
#[async_trait]
pub trait DeadLetterHandler: Send + Sync {
    /// Called once per dead-lettered message with the last handler error.
    ///
    /// # Errors
    ///
    /// Returns an error when compensation failed; the dead-letter record then
    /// stays pending.
    async fn handle_dead_letter(
        &self,
        event: &SerializedEvent,
        error: &HandlerError,
    ) -> Result<(), HandlerError>;
}

/// What happened to a delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The handler eventually succeeded.
    Handled {
        /// Deliveries made
        attempts: u32,
    },
    /// The message was dead-lettered.
    DeadLettered {
        /// Deliveries made
        attempts: u32,
        /// Last handler error
        error: HandlerError,
        /// Whether the dead-letter handler succeeded
        compensated: bool,
        /// Dead-letter record id, when a store is attached and accepted it
        entry_id: Option<i64>,
    },
}

impl DeliveryOutcome {
    /// Deliveries made.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Handled { attempts } | Self::DeadLettered { attempts, .. } => *attempts,
        }
    }
}

/// Redelivery wrapper around one listener.
pub struct Redelivery {
    topic: String,
    group_id: String,
    policy: RetryPolicy,
    handler: Arc<dyn MessageHandler>,
    dead_letter: Arc<dyn DeadLetterHandler>,
    store: Option<Arc<dyn DeadLetterStore>>,
    clock: Arc<dyn Clock>,
}

impl Redelivery {
    /// Wrap `handler` for `topic` as seen by `group_id`.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        group_id: impl Into<String>,
        policy: RetryPolicy,
        handler: Arc<dyn MessageHandler>,
        dead_letter: Arc<dyn DeadLetterHandler>,
    ) -> Self {
        Self {
            topic: topic.into(),
            group_id: group_id.into(),
            policy,
            handler,
            dead_letter,
            store: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Record dead letters in `store`.
    #[must_use]
    pub fn with_dead_letter_store(mut self, store: Arc<dyn DeadLetterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `clock` for failure timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Topic this listener consumes.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Consumer group this listener belongs to.
    #[must_use]
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// Redelivery schedule.
    #[must_use]
    pub const fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Deliver `event` until it is handled or dead-lettered.
    pub async fn deliver(&self, event: &SerializedEvent) -> DeliveryOutcome {
        let first_failed_at: Mutex<Option<DateTime<Utc>>> = Mutex::new(None);
        let handler = &self.handler;
        let clock = &self.clock;

        let result = retry_with_predicate(
            &self.policy,
            || {
                let first_failed_at = &first_failed_at;
                async move {
                    let result = handler.handle(event).await;
                    if result.is_err() {
                        if let Ok(mut first) = first_failed_at.lock() {
                            first.get_or_insert_with(|| clock.now());
                        }
                    }
                    result
                }
            },
            HandlerError::is_retryable,
        )
        .await;

        match result {
            Ok(Attempted { attempts, .. }) => {
                if attempts > 1 {
                    counter!("shipkafka_redeliveries_total", "topic" => self.topic.clone())
                        .increment(u64::from(attempts - 1));
                }
                counter!(
                    "shipkafka_messages_handled_total",
                    "topic" => self.topic.clone(),
                    "outcome" => "handled"
                )
                .increment(1);
                DeliveryOutcome::Handled { attempts }
            }
            Err(Attempted {
                value: error,
                attempts,
            }) => {
                if attempts > 1 {
                    counter!("shipkafka_redeliveries_total", "topic" => self.topic.clone())
                        .increment(u64::from(attempts - 1));
                }
                let now = self.clock.now();
                let first = first_failed_at
                    .lock()
                    .ok()
                    .and_then(|first| *first)
                    .unwrap_or(now);
                self.dead_letter(event, error, attempts, first, now).await
            }
        }
    }

    async fn dead_letter(
        &self,
        event: &SerializedEvent,
        error: HandlerError,
        attempts: u32,
        first_failed_at: DateTime<Utc>,
        last_failed_at: DateTime<Utc>,
    ) -> DeliveryOutcome {
        warn!(
            topic = %self.topic,
            group = %self.group_id,
            key = event.key.as_deref().unwrap_or("-"),
            attempts,
            error = %error,
            "Message dead-lettered"
        );
        counter!("shipkafka_dead_letters_total", "topic" => self.topic.clone()).increment(1);
        counter!(
            "shipkafka_messages_handled_total",
            "topic" => self.topic.clone(),
            "outcome" => "dead_lettered"
        )
        .increment(1);

        let entry_id = match &self.store {
            Some(store) => {
                let entry = NewDeadLetter {
                    topic: self.topic.clone(),
                    group_id: self.group_id.clone(),
                    event: event.clone(),
                    error_message: error.to_string(),
                    attempts,
                    first_failed_at,
                    last_failed_at,
                };
                match store.add_entry(entry).await {
                    Ok(id) => Some(id),
                    Err(e) => {
                        error!(topic = %self.topic, error = %e, "Failed to record dead letter");
                        None
                    }
                }
            }
            None => None,
        };

        let dead_letter = &self.dead_letter;
        let cause = &error;
        let compensation = retry_with_predicate(
            &self.policy,
            || async move { dead_letter.handle_dead_letter(event, cause).await },
            HandlerError::is_retryable,
        )
        .await;

        let compensated = match compensation {
            Ok(Attempted { attempts: tries, .. }) => {
                info!(
                    topic = %self.topic,
                    entry_id,
                    attempts = tries,
                    "Dead-letter handler completed"
                );
                if let (Some(store), Some(id)) = (&self.store, entry_id) {
                    let resolver = format!("{}-dlt", self.group_id);
                    if let Err(e) = store.mark_resolved(id, &resolver, None).await {
                        error!(entry_id = id, error = %e, "Failed to resolve dead letter");
                    }
                }
                true
            }
            Err(Attempted {
                value: e,
                attempts: tries,
            }) => {
                error!(
                    topic = %self.topic,
                    entry_id,
                    attempts = tries,
                    error = %e,
                    "Dead-letter handler failed, entry left pending"
                );
                counter!("shipkafka_compensations_failed_total", "topic" => self.topic.clone())
                    .increment(1);
                false
            }
        };

        DeliveryOutcome::DeadLettered {
            attempts,
            error,
            compensated,
            entry_id,
        }
    }
}
