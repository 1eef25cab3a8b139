//! Lifecycle events and the handler trait

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::registry::ClientId;

/// Something that happened on a client connection
///
/// For any one client, `Connected` comes first, then its `Message`s in
/// arrival order, then exactly one `Disconnected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected(ClientId),
    Message { id: ClientId, payload: String },
    Disconnected(ClientId),
}

impl Event {
    pub fn client_id(&self) -> ClientId {
        match self {
            Event::Connected(id) | Event::Disconnected(id) => *id,
            Event::Message { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connected(_) => EventKind::Connected,
            Event::Message { .. } => EventKind::Message,
            Event::Disconnected(_) => EventKind::Disconnected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Connected,
    Message,
    Disconnected,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Connected => "connected",
            EventKind::Message => "message",
            EventKind::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Error returned by an event handler
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type HandlerResult = Result<(), HandlerError>;

/// Application logic plugged into the dispatcher
///
/// Every method defaults to doing nothing, so a handler only implements the
/// events it cares about.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used when reporting faults
    fn name(&self) -> &str;

    async fn on_connect(&self, _id: ClientId) -> HandlerResult {
        Ok(())
    }

    async fn on_message(&self, _id: ClientId, _payload: &str) -> HandlerResult {
        Ok(())
    }

    async fn on_disconnect(&self, _id: ClientId) -> HandlerResult {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_accessors() {
        let id = ClientId::new(4);
        let event = Event::Message {
            id,
            payload: "hi".to_string(),
        };
        assert_eq!(event.client_id(), id);
        assert_eq!(event.kind(), EventKind::Message);
        assert_eq!(Event::Disconnected(id).kind().to_string(), "disconnected");
    }

    #[test]
    fn test_handler_error_from_anyhow() {
        let err: HandlerError = anyhow::anyhow!("boom").into();
        assert_eq!(err.to_string(), "boom");
    }
}
