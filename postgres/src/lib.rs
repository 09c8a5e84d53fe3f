//! `PostgreSQL` persistence for the booking saga.
//!
//! - [`PostgresStore`]: customers, bookings and ships with optimistic
//!   concurrency
//! - [`PostgresSagaLog`]: one authority's saga ledger
//! - [`DeadLetterQueue`]: dead-lettered messages
//!
//! # Example
//!
//! ```ignore
//! use shipkafka_postgres::{DeadLetterQueue, PostgresStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresStore::connect("postgres://localhost/shipkafka", 10).await?;
//!     store.migrate().await?;
//!     let dlq = DeadLetterQueue::new(store.pool().clone());
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod dead_letter_queue;
mod saga_log;
mod store;

pub use dead_letter_queue::DeadLetterQueue;
pub use saga_log::PostgresSagaLog;
pub use store::PostgresStore;
