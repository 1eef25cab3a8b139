//! Registry error types

use thiserror::Error;

use super::connection::ClientId;

/// Errors returned by registry operations that the caller must act on
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The configured connection limit has been reached
    #[error("Too many connections (limit: {limit})")]
    CapacityExceeded { limit: usize },
}

/// A message that could not be handed to one client
///
/// Delivery failures are per-client and never affect other recipients.
/// They are reported, not propagated.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The client is not (or no longer) registered
    #[error("client {0} is not registered")]
    NotRegistered(ClientId),

    /// The client's outbound queue is full
    #[error("outbound queue full for client {0}")]
    QueueFull(ClientId),

    /// The client is closing or its writer has stopped
    #[error("client {0} is closed")]
    Closed(ClientId),
}

impl DeliveryFailure {
    pub fn client_id(&self) -> ClientId {
        match self {
            DeliveryFailure::NotRegistered(id)
            | DeliveryFailure::QueueFull(id)
            | DeliveryFailure::Closed(id) => *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RegistryError::CapacityExceeded { limit: 2 };
        assert_eq!(err.to_string(), "Too many connections (limit: 2)");

        let err = DeliveryFailure::QueueFull(ClientId::new(9));
        assert_eq!(err.to_string(), "outbound queue full for client 9");
        assert_eq!(err.client_id(), ClientId::new(9));
    }
}
