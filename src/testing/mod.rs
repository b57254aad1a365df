//! Testing utilities and mock implementations
//!
//! Lets the transport be exercised without a running MQTT broker.

pub mod mocks;

pub use mocks::*;
