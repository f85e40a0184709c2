//! Fleet protocol: message records and topic matching
//!
//! This module defines the JSON records exchanged with the cars and the
//! wildcard topic patterns used to route them.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
