//! Fault injectors for exercising redelivery and dead-letter paths.

use shipkafka_core::fault::{FaultInjector, InjectedFault};
use std::sync::atomic::{AtomicU32, Ordering};

/// Fails the first `n` deliveries, then lets everything through.
#[derive(Debug)]
pub struct FailFirst {
    remaining: AtomicU32,
    calls: AtomicU32,
}

impl FailFirst {
    /// Fail the next `n` deliveries.
    #[must_use]
    pub const fn new(n: u32) -> Self {
        Self {
            remaining: AtomicU32::new(n),
            calls: AtomicU32::new(0),
        }
    }

    /// Deliveries checked so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FaultInjector for FailFirst {
    fn check(&self, topic: &str, _key: Option<&str>) -> Result<(), InjectedFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            Err(InjectedFault {
                topic: topic.to_string(),
                reason: "scripted failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

/// Fails every delivery.
#[derive(Debug, Default)]
pub struct AlwaysFail {
    calls: AtomicU32,
}

impl AlwaysFail {
    /// Create the injector.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }

    /// Deliveries checked so far.
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FaultInjector for AlwaysFail {
    fn check(&self, topic: &str, _key: Option<&str>) -> Result<(), InjectedFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(InjectedFault {
            topic: topic.to_string(),
            reason: "listener disabled".to_string(),
        })
    }
}
