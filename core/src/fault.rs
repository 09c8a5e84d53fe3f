//! Fault-injection hook consulted by listeners before handling a message.
//!
//! Production wiring passes [`NoFaults`]. Tests hand in their own injector
//! (see `shipkafka-testing`) to make a listener fail a controlled number of
//! times, which exercises the redelivery and dead-letter paths without any
//! process-wide switch.

use thiserror::Error;

/// A failure produced on purpose by a [`FaultInjector`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Injected fault on '{topic}': {reason}")]
pub struct InjectedFault {
    /// Topic whose listener was told to fail
    pub topic: String,
    /// Description of the fault
    pub reason: String,
}

/// Decides whether the next delivery should fail.
pub trait FaultInjector: Send + Sync {
    /// Called once per delivery attempt.
    ///
    /// # Errors
    ///
    /// Returns [`InjectedFault`] when the delivery should fail.
    fn check(&self, topic: &str, key: Option<&str>) -> Result<(), InjectedFault>;
}

/// Never injects anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn check(&self, _topic: &str, _key: Option<&str>) -> Result<(), InjectedFault> {
        Ok(())
    }
}
