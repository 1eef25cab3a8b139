//! WebSocket Opening Handshake
//!
//! Turns a plain TCP connection into a WebSocket connection.
//!
//! ## Flow
//!
//! 1. [`HandshakeRequest::read_from`] reads the HTTP request head
//! 2. [`validate`] accepts or rejects it and derives the accept token
//! 3. [`HandshakeResponse::to_http`] renders the reply
//!
//! Frame encoding after the upgrade is left to `tokio-tungstenite`.

mod accept;
mod error;
mod request;

pub use accept::{
    capacity_response, derive_accept_key, validate, HandshakeResponse, RejectReason,
    WEBSOCKET_GUID,
};
pub use error::{HandshakeError, HandshakeResult};
pub use request::{HandshakeRequest, KEY_HEADER};
