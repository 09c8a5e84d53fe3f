//! # Shipkafka Testing
//!
//! Testing utilities for the booking saga.
//!
//! This crate provides:
//! - In-memory event bus, record stores, dead-letter store and saga ledger
//! - Fault injectors for listeners
//! - A fixed clock
//! - Polling and tracing helpers
//! - proptest strategies for domain values
//!
//! ## Example
//!
//! ```ignore
//! use shipkafka_testing::mocks::{InMemoryEventBus, InMemoryShipRepository};
//!
//! #[tokio::test]
//! async fn confirms_when_there_is_room() {
//!     let bus = Arc::new(InMemoryEventBus::new());
//!     let ships = Arc::new(InMemoryShipRepository::new());
//!     let service = CapacityService::new(ships, bus.clone(), ...);
//!     ...
//!     assert_eq!(bus.published("booking-outcome").len(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use shipkafka_core::environment::Clock;

mod event_bus;
mod faults;
mod stores;

/// Mock implementations of the stores, the bus and the clock.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    pub use crate::event_bus::InMemoryEventBus;
    pub use crate::faults::{AlwaysFail, FailFirst};
    pub use crate::stores::{
        InMemoryBookingRepository, InMemoryDeadLetterStore, InMemorySagaLog,
        InMemoryShipRepository,
    };

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use shipkafka_testing::mocks::FixedClock;
    /// use shipkafka_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use std::future::Future;
    use std::time::Duration;

    /// Poll `check` every 10ms until it returns `true` or `timeout` elapses.
    ///
    /// Returns the last result of `check`.
    pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if check().await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Send test logs to the test writer. Safe to call from every test.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use shipkafka_core::BookingStatus;

    /// Containers a booking may request.
    pub fn container_count() -> impl Strategy<Value = u32> {
        1u32..=12
    }

    /// Capacity a ship may have left.
    pub fn capacity() -> impl Strategy<Value = u32> {
        0u32..=20
    }

    /// Any booking status.
    pub fn booking_status() -> impl Strategy<Value = BookingStatus> {
        prop::sample::select(BookingStatus::ALL.to_vec())
    }
}

pub use mocks::{FixedClock, test_clock};
