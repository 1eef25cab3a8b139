//! Connection Registry
//!
//! Tracks live clients and delivers messages to them.
//!
//! ## Architecture
//!
//! - **ConnectionRegistry**: the live set; register/unregister, broadcast, unicast
//! - **ClientConnection**: identity, outbound queue and lifecycle of one client
//! - **Message**: immutable text payload tagged with its sender
//!
//! A client is in the registry exactly while its status is `Open` or
//! `Closing`. Delivery never blocks: each client's outbound queue is bounded
//! and a full or closed queue counts as a delivery failure for that client
//! alone.

mod connection;
mod error;
mod hub;
mod message;

pub use connection::{ClientConnection, ClientId, ConnectionStatus};
pub use error::{DeliveryFailure, RegistryError};
pub use hub::{ConnectionRegistry, DeliveryReport, Registration, RegistryConfig, RegistryStats};
pub use message::Message;
