//! Handshake error types

use thiserror::Error;

/// Errors raised while reading or parsing an opening handshake
///
/// These are transport-level problems. A well-formed request that the server
/// refuses is not an error; it yields [`super::HandshakeResponse::Rejected`].
#[derive(Error, Debug)]
pub enum HandshakeError {
    /// Reading the request head failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The request line could not be parsed
    #[error("Malformed request line: {0}")]
    MalformedRequestLine(String),

    /// A header line had no `:` separator
    #[error("Malformed header line: {0}")]
    MalformedHeader(String),

    /// The request head grew past the configured limit
    #[error("Request head exceeds {limit} bytes")]
    TooLarge { limit: usize },

    /// The peer closed the connection before finishing the request head
    #[error("Connection closed during handshake")]
    ConnectionClosed,

    /// No complete request head arrived in time
    #[error("Handshake timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Result type alias for handshake operations
pub type HandshakeResult<T> = Result<T, HandshakeError>;
