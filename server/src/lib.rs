//! # Shipkafka Server
//!
//! Runs the booking authority and the capacity authority side by side:
//! configuration, wiring onto the event bus, demo data and graceful
//! shutdown. The binary lives in `main.rs`; the pieces here are shared with
//! the end-to-end tests.

pub mod app;
pub mod config;
pub mod lifecycle;
pub mod seed;

pub use app::{Collaborators, Faults, SagaSettings, ShippingApp};
pub use config::Config;
pub use lifecycle::Application;
