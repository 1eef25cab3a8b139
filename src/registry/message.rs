//! Relay message type

use std::fmt;
use std::sync::Arc;

use super::connection::ClientId;

/// A text payload routed through the registry
///
/// Immutable and cheap to clone, so one message can be fanned out to many
/// outbound queues without copying the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    sender: Option<ClientId>,
    payload: Arc<str>,
}

impl Message {
    /// A message originating from a client
    pub fn from_client(sender: ClientId, payload: impl Into<Arc<str>>) -> Self {
        Self {
            sender: Some(sender),
            payload: payload.into(),
        }
    }

    /// A message originating from the server itself (announcements)
    pub fn system(payload: impl Into<Arc<str>>) -> Self {
        Self {
            sender: None,
            payload: payload.into(),
        }
    }

    /// The client that sent this message, `None` for system messages
    pub fn sender(&self) -> Option<ClientId> {
        self.sender
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn is_system(&self) -> bool {
        self.sender.is_none()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message() {
        let msg = Message::from_client(ClientId::new(7), "hello");
        assert_eq!(msg.sender(), Some(ClientId::new(7)));
        assert_eq!(msg.payload(), "hello");
        assert!(!msg.is_system());
    }

    #[test]
    fn test_system_message() {
        let msg = Message::system(String::from("joined"));
        assert!(msg.is_system());
        assert_eq!(msg.to_string(), "joined");
    }

    #[test]
    fn test_clone_shares_payload() {
        let msg = Message::system("shared");
        let copy = msg.clone();
        assert!(Arc::ptr_eq(&msg.payload, &copy.payload));
    }
}
