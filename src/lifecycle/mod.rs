//! Broker connection lifecycle
//!
//! ```text
//! Disconnected --connect()--> Connecting --ok--> Connected --subscribed--> Subscribed
//!                                  |                 ^                          |
//!                                failure             +------ reconnected -------+
//!                                  v                 |                          |
//!                                Failed          Connecting <--- connection lost
//! ```
//!
//! Any state returns to `Disconnected` on `disconnect()`.

pub mod controller;
pub mod state;

pub use controller::{ConnectError, ConnectionController, PublishError, DEFAULT_DISCONNECT_GRACE};
pub use state::{next_state, ConnectionState, LifecycleEvent};
