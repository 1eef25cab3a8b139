//! Relay Policy
//!
//! The application behaviour layered on top of the registry: echo each
//! message back to its sender and announce newcomers to everyone else.
//! Optional switches broadcast every message and announce departures.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::event::{EventHandler, HandlerResult};
use crate::registry::{ClientId, ConnectionRegistry, Message};

/// Relay behaviour settings
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Tell existing clients when someone joins
    #[serde(default = "default_announce_join")]
    pub announce_join: bool,

    /// Join announcement text, `{id}` is replaced with the new client id
    #[serde(default = "default_join_message")]
    pub join_message: String,

    /// Prepended to the payload echoed back to the sender
    #[serde(default)]
    pub echo_prefix: String,

    /// Also forward every message to all other clients
    #[serde(default)]
    pub broadcast_messages: bool,

    /// Tell remaining clients when someone leaves
    #[serde(default)]
    pub announce_leave: bool,

    /// Leave announcement text, `{id}` is replaced with the departed client id
    #[serde(default = "default_leave_message")]
    pub leave_message: String,
}

fn default_announce_join() -> bool {
    true
}

fn default_join_message() -> String {
    "Hey all, a new client has joined us".to_string()
}

fn default_leave_message() -> String {
    "Client {id} has left".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            announce_join: default_announce_join(),
            join_message: default_join_message(),
            echo_prefix: String::new(),
            broadcast_messages: false,
            announce_leave: false,
            leave_message: default_leave_message(),
        }
    }
}

/// Echo-and-announce handler
pub struct RelayPolicy {
    registry: Arc<ConnectionRegistry>,
    config: RelayConfig,
}

impl RelayPolicy {
    pub fn new(registry: Arc<ConnectionRegistry>, config: RelayConfig) -> Self {
        Self { registry, config }
    }
}

fn render(template: &str, id: ClientId) -> String {
    template.replace("{id}", &id.to_string())
}

#[async_trait]
impl EventHandler for RelayPolicy {
    fn name(&self) -> &str {
        "relay"
    }

    async fn on_connect(&self, id: ClientId) -> HandlerResult {
        tracing::info!(client_id = %id, "New client connected");

        if self.config.announce_join {
            let announcement = Message::system(render(&self.config.join_message, id));
            self.registry.broadcast_except(announcement, id).await;
        }
        Ok(())
    }

    async fn on_message(&self, id: ClientId, payload: &str) -> HandlerResult {
        tracing::debug!(client_id = %id, len = payload.len(), "Client message");

        let echo = format!("{}{}", self.config.echo_prefix, payload);
        if let Err(failure) = self.registry.unicast(id, Message::from_client(id, echo)).await {
            tracing::debug!(client_id = %id, error = %failure, "Echo not delivered");
        }

        if self.config.broadcast_messages {
            self.registry
                .broadcast_all(Message::from_client(id, payload), true)
                .await;
        }
        Ok(())
    }

    async fn on_disconnect(&self, id: ClientId) -> HandlerResult {
        tracing::info!(client_id = %id, "Client disconnected");

        if self.config.announce_leave {
            self.registry
                .broadcast_all(Message::system(render(&self.config.leave_message, id)), false)
                .await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Registration, RegistryConfig};
    use tokio::sync::mpsc;

    fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg.payload().to_string());
        }
        out
    }

    async fn setup(
        config: RelayConfig,
    ) -> (Arc<ConnectionRegistry>, RelayPolicy, Registration, Registration) {
        let registry = Arc::new(ConnectionRegistry::new(RegistryConfig::default()));
        let policy = RelayPolicy::new(Arc::clone(&registry), config);
        let a = registry.register(None).await.unwrap();
        let b = registry.register(None).await.unwrap();
        (registry, policy, a, b)
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert!(config.announce_join);
        assert_eq!(config.join_message, "Hey all, a new client has joined us");
        assert!(config.echo_prefix.is_empty());
        assert!(!config.broadcast_messages);
        assert!(!config.announce_leave);
    }

    #[tokio::test]
    async fn test_join_announced_to_others_only() {
        let (_registry, policy, mut a, mut b) = setup(RelayConfig::default()).await;

        policy.on_connect(b.id).await.unwrap();

        assert_eq!(drain(&mut a.outbound), vec!["Hey all, a new client has joined us"]);
        assert!(drain(&mut b.outbound).is_empty());
    }

    #[tokio::test]
    async fn test_join_template() {
        let config = RelayConfig {
            join_message: "client {id} joined".to_string(),
            ..Default::default()
        };
        let (_registry, policy, mut a, b) = setup(config).await;

        policy.on_connect(b.id).await.unwrap();
        assert_eq!(drain(&mut a.outbound), vec![format!("client {} joined", b.id)]);
    }

    #[tokio::test]
    async fn test_message_echoed_to_sender_only() {
        let (_registry, policy, mut a, mut b) = setup(RelayConfig::default()).await;

        policy.on_message(a.id, "hello").await.unwrap();

        assert_eq!(drain(&mut a.outbound), vec!["hello"]);
        assert!(drain(&mut b.outbound).is_empty());
    }

    #[tokio::test]
    async fn test_echo_prefix_and_broadcast() {
        let config = RelayConfig {
            echo_prefix: "I received your message: ".to_string(),
            broadcast_messages: true,
            ..Default::default()
        };
        let (_registry, policy, mut a, mut b) = setup(config).await;

        policy.on_message(a.id, "hi").await.unwrap();

        assert_eq!(drain(&mut a.outbound), vec!["I received your message: hi"]);
        assert_eq!(drain(&mut b.outbound), vec!["hi"]);
    }

    #[tokio::test]
    async fn test_echo_to_departed_client_is_not_an_error() {
        let (registry, policy, a, _b) = setup(RelayConfig::default()).await;
        registry.unregister(a.id).await;

        assert!(policy.on_message(a.id, "late").await.is_ok());
    }

    #[tokio::test]
    async fn test_leave_announcement() {
        let config = RelayConfig {
            announce_leave: true,
            ..Default::default()
        };
        let (registry, policy, a, mut b) = setup(config).await;
        registry.unregister(a.id).await;

        policy.on_disconnect(a.id).await.unwrap();
        assert_eq!(drain(&mut b.outbound), vec![format!("Client {} has left", a.id)]);
    }
}
