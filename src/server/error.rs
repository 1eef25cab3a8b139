//! Server error types

use thiserror::Error;

use crate::handshake::HandshakeError;

/// Errors raised by the accept loop or a connection worker
#[derive(Error, Debug)]
pub enum ServerError {
    /// Could not bind the listening socket
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O error on a connection
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The opening handshake could not be read
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),
}

/// Result type alias for server operations
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:8080".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.to_string(), "Failed to bind 127.0.0.1:8080: in use");

        let err: ServerError = HandshakeError::ConnectionClosed.into();
        assert_eq!(err.to_string(), "Handshake error: Connection closed during handshake");
    }
}
