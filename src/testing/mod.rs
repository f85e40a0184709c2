//! Testing utilities and mock implementations
//!
//! This module provides test doubles for exercising the backend without a
//! running MQTT broker.

pub mod mocks;

pub use mocks::*;
