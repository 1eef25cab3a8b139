//! Connection Registry
//!
//! Tracks every live client, hands out identities and fans messages out to
//! their outbound queues.
//!
//! Membership changes take the write lock; broadcasts take the read lock
//! only long enough to snapshot the recipients. Queueing happens after the
//! lock is released, so a slow or failing client never holds up the rest.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use super::connection::{ClientConnection, ClientId, ConnectionStatus};
use super::error::{DeliveryFailure, RegistryError};
use super::message::Message;

/// Configuration for the connection registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Maximum number of concurrent connections, `None` for no limit
    pub max_connections: Option<usize>,
    /// Capacity of each client's outbound queue
    pub outbound_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: Some(1000),
            outbound_capacity: 256,
        }
    }
}

/// Everything a connection worker needs after a successful registration
pub struct Registration {
    pub id: ClientId,
    pub connection: Arc<ClientConnection>,
    /// Outbound queue receiver, owned by the writer task
    pub outbound: mpsc::Receiver<Message>,
}

/// Per-call outcome of a broadcast
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<ClientId>,
    pub failed: Vec<DeliveryFailure>,
}

impl DeliveryReport {
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// Snapshot of registry counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub active: usize,
    pub total_registered: u64,
    pub messages_delivered: u64,
    pub delivery_failures: u64,
}

/// Thread-safe set of live client connections
pub struct ConnectionRegistry {
    /// Live connections ordered by id
    connections: RwLock<BTreeMap<ClientId, Arc<ClientConnection>>>,
    next_id: AtomicU64,
    total_registered: AtomicU64,
    messages_delivered: AtomicU64,
    delivery_failures: AtomicU64,
    config: RegistryConfig,
}

impl ConnectionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            connections: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            total_registered: AtomicU64::new(0),
            messages_delivered: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register a new client
    ///
    /// Allocates a fresh id, creates the connection and inserts it as
    /// `Open`. Fails only when the connection limit has been reached.
    pub async fn register(&self, peer: Option<SocketAddr>) -> Result<Registration, RegistryError> {
        let id = ClientId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (connection, outbound) =
            ClientConnection::new(id, peer, self.config.outbound_capacity);
        let connection = Arc::new(connection);

        {
            let mut connections = self.connections.write().await;
            if let Some(limit) = self.config.max_connections {
                if connections.len() >= limit {
                    tracing::warn!(client_id = %id, limit, "Connection limit reached");
                    return Err(RegistryError::CapacityExceeded { limit });
                }
            }
            connection.set_status(ConnectionStatus::Open);
            connections.insert(id, Arc::clone(&connection));
        }

        self.total_registered.fetch_add(1, Ordering::Relaxed);
        tracing::info!(client_id = %id, peer = ?peer, "Client registered");

        Ok(Registration {
            id,
            connection,
            outbound,
        })
    }

    /// Remove a client and mark it `Closed`
    ///
    /// Returns `false` if the client was not registered. Calling it twice
    /// is harmless.
    pub async fn unregister(&self, id: ClientId) -> bool {
        let removed = {
            let mut connections = self.connections.write().await;
            let removed = connections.remove(&id);
            if let Some(conn) = &removed {
                conn.set_status(ConnectionStatus::Closed);
                conn.request_close();
            }
            removed
        };

        match removed {
            Some(_) => {
                tracing::info!(client_id = %id, "Client unregistered");
                true
            }
            None => {
                tracing::trace!(client_id = %id, "Unregister of unknown client ignored");
                false
            }
        }
    }

    /// Queue a message for every open client
    ///
    /// With `exclude_sender`, the message's own sender is skipped. A failure
    /// for one client is recorded and starts that client's shutdown; it does
    /// not stop delivery to the others.
    pub async fn broadcast_all(&self, message: Message, exclude_sender: bool) -> DeliveryReport {
        let excluded = if exclude_sender { message.sender() } else { None };
        self.fan_out(message, excluded).await
    }

    /// Queue a message for every open client except `excluded`
    ///
    /// Used for system announcements about a client that should not reach
    /// that client itself.
    pub async fn broadcast_except(&self, message: Message, excluded: ClientId) -> DeliveryReport {
        self.fan_out(message, Some(excluded)).await
    }

    async fn fan_out(&self, message: Message, excluded: Option<ClientId>) -> DeliveryReport {
        let recipients: Vec<Arc<ClientConnection>> = {
            let connections = self.connections.read().await;
            connections
                .values()
                .filter(|conn| conn.is_open() && Some(conn.id()) != excluded)
                .cloned()
                .collect()
        };

        let mut report = DeliveryReport::default();
        for conn in recipients {
            match conn.deliver(message.clone()) {
                Ok(()) => report.delivered.push(conn.id()),
                Err(failure) => {
                    self.record_failure(Some(&conn), failure);
                    report.failed.push(failure);
                }
            }
        }

        self.messages_delivered
            .fetch_add(report.delivered.len() as u64, Ordering::Relaxed);

        tracing::trace!(
            sender = ?message.sender(),
            delivered = report.delivered_count(),
            failed = report.failed_count(),
            "Broadcast"
        );

        report
    }

    /// Queue a message for exactly one client
    ///
    /// A missing client is an expected race with disconnects, reported as
    /// [`DeliveryFailure::NotRegistered`].
    pub async fn unicast(&self, id: ClientId, message: Message) -> Result<(), DeliveryFailure> {
        let conn = self.connections.read().await.get(&id).cloned();

        let Some(conn) = conn else {
            let failure = DeliveryFailure::NotRegistered(id);
            self.record_failure(None, failure);
            return Err(failure);
        };

        match conn.deliver(message) {
            Ok(()) => {
                self.messages_delivered.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(failure) => {
                self.record_failure(Some(&conn), failure);
                Err(failure)
            }
        }
    }

    /// Ask every registered client to close
    ///
    /// Returns the number of clients signalled. Each worker unregisters its
    /// own client as it winds down.
    pub async fn close_all(&self) -> usize {
        let connections = self.connections.read().await;
        for conn in connections.values() {
            conn.request_close();
        }
        tracing::info!(count = connections.len(), "Closing all connections");
        connections.len()
    }

    pub async fn get(&self, id: ClientId) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(&id).cloned()
    }

    pub async fn contains(&self, id: ClientId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    /// Ids of all registered clients, ascending
    pub async fn ids(&self) -> Vec<ClientId> {
        self.connections.read().await.keys().copied().collect()
    }

    /// Get the current connection count
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Whether a new registration would be refused right now
    pub async fn is_full(&self) -> bool {
        match self.config.max_connections {
            Some(limit) => self.len().await >= limit,
            None => false,
        }
    }

    pub async fn stats(&self) -> RegistryStats {
        RegistryStats {
            active: self.len().await,
            total_registered: self.total_registered.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }

    fn record_failure(&self, conn: Option<&Arc<ClientConnection>>, failure: DeliveryFailure) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
        match conn {
            Some(conn) => {
                tracing::warn!(
                    client_id = %conn.id(),
                    error = %failure,
                    "Delivery failed, closing client"
                );
                conn.request_close();
            }
            None => {
                tracing::debug!(
                    client_id = %failure.client_id(),
                    error = %failure,
                    "Delivery skipped"
                );
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg.payload().to_string());
        }
        out
    }

    #[test]
    fn test_default_config() {
        let config = RegistryConfig::default();
        assert_eq!(config.max_connections, Some(1000));
        assert_eq!(config.outbound_capacity, 256);
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let registry = ConnectionRegistry::default();

        let reg = registry.register(None).await.unwrap();
        assert_eq!(reg.connection.status(), ConnectionStatus::Open);
        assert_eq!(registry.len().await, 1);
        assert!(registry.contains(reg.id).await);

        assert!(registry.unregister(reg.id).await);
        assert_eq!(registry.len().await, 0);
        assert_eq!(reg.connection.status(), ConnectionStatus::Closed);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::default();
        let reg = registry.register(None).await.unwrap();

        assert!(registry.unregister(reg.id).await);
        assert!(!registry.unregister(reg.id).await);

        assert!(!registry.contains(reg.id).await);
        assert_eq!(reg.connection.status(), ConnectionStatus::Closed);
        assert_eq!(registry.stats().await.active, 0);
    }

    #[tokio::test]
    async fn test_concurrent_register_yields_unique_ids() {
        let registry = Arc::new(ConnectionRegistry::new(RegistryConfig {
            max_connections: None,
            outbound_capacity: 4,
        }));

        let mut handles = Vec::new();
        for _ in 0..200 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.register(None).await.unwrap().id
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            assert!(ids.insert(handle.await.unwrap()));
        }
        assert_eq!(ids.len(), 200);
        assert_eq!(registry.len().await, 200);
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_unregister() {
        let registry = ConnectionRegistry::default();
        let first = registry.register(None).await.unwrap().id;
        registry.unregister(first).await;
        let second = registry.register(None).await.unwrap().id;
        assert_ne!(first, second);
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let registry = ConnectionRegistry::new(RegistryConfig {
            max_connections: Some(2),
            outbound_capacity: 4,
        });

        let a = registry.register(None).await.unwrap();
        let _b = registry.register(None).await.unwrap();
        assert!(registry.is_full().await);

        let result = registry.register(None).await;
        assert!(matches!(
            result,
            Err(RegistryError::CapacityExceeded { limit: 2 })
        ));
        assert_eq!(registry.len().await, 2);

        registry.unregister(a.id).await;
        assert!(!registry.is_full().await);
        assert!(registry.register(None).await.is_ok());
    }

    #[tokio::test]
    async fn test_broadcast_isolates_failing_client() {
        let registry = ConnectionRegistry::default();

        let mut a = registry.register(None).await.unwrap();
        let b = registry.register(None).await.unwrap();
        let mut c = registry.register(None).await.unwrap();

        // B's writer is gone
        drop(b.outbound);

        let report = registry.broadcast_all(Message::system("news"), false).await;

        assert_eq!(report.delivered, vec![a.id, c.id]);
        assert_eq!(report.failed, vec![DeliveryFailure::Closed(b.id)]);
        assert_eq!(drain(&mut a.outbound), vec!["news"]);
        assert_eq!(drain(&mut c.outbound), vec!["news"]);

        // the failure starts B's disconnect path
        assert!(b.connection.close_requested());
        assert_eq!(b.connection.status(), ConnectionStatus::Closing);
        assert_eq!(registry.stats().await.delivery_failures, 1);
    }

    #[tokio::test]
    async fn test_broadcast_with_full_queue() {
        let registry = ConnectionRegistry::new(RegistryConfig {
            max_connections: None,
            outbound_capacity: 1,
        });

        let mut a = registry.register(None).await.unwrap();
        let b = registry.register(None).await.unwrap();
        b.connection.deliver(Message::system("backlog")).unwrap();

        let report = registry.broadcast_all(Message::system("next"), false).await;
        assert_eq!(report.delivered, vec![a.id]);
        assert_eq!(report.failed, vec![DeliveryFailure::QueueFull(b.id)]);
        assert_eq!(drain(&mut a.outbound), vec!["next"]);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let registry = ConnectionRegistry::default();
        let mut a = registry.register(None).await.unwrap();
        let mut b = registry.register(None).await.unwrap();

        let report = registry
            .broadcast_all(Message::from_client(a.id, "from a"), true)
            .await;
        assert_eq!(report.delivered, vec![b.id]);
        assert!(drain(&mut a.outbound).is_empty());
        assert_eq!(drain(&mut b.outbound), vec!["from a"]);

        let report = registry
            .broadcast_all(Message::from_client(a.id, "to all"), false)
            .await;
        assert_eq!(report.delivered_count(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_except() {
        let registry = ConnectionRegistry::default();
        let mut a = registry.register(None).await.unwrap();
        let mut b = registry.register(None).await.unwrap();

        let report = registry.broadcast_except(Message::system("b joined"), b.id).await;
        assert_eq!(report.delivered, vec![a.id]);
        assert_eq!(drain(&mut a.outbound), vec!["b joined"]);
        assert!(drain(&mut b.outbound).is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_skips_closing_clients() {
        let registry = ConnectionRegistry::default();
        let a = registry.register(None).await.unwrap();
        let mut b = registry.register(None).await.unwrap();
        a.connection.request_close();

        let report = registry.broadcast_all(Message::system("x"), false).await;
        assert_eq!(report.delivered, vec![b.id]);
        assert!(report.failed.is_empty());
        assert_eq!(drain(&mut b.outbound), vec!["x"]);
    }

    #[tokio::test]
    async fn test_fifo_across_unicast_and_broadcast() {
        let registry = ConnectionRegistry::default();
        let mut c = registry.register(None).await.unwrap();
        let _other = registry.register(None).await.unwrap();

        registry.unicast(c.id, Message::system("m1")).await.unwrap();
        registry.broadcast_all(Message::system("m2"), false).await;
        registry.unicast(c.id, Message::system("m3")).await.unwrap();
        registry.broadcast_all(Message::system("m4"), false).await;

        assert_eq!(drain(&mut c.outbound), vec!["m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_fifo_with_concurrent_senders() {
        let registry = Arc::new(ConnectionRegistry::new(RegistryConfig {
            max_connections: None,
            outbound_capacity: 1024,
        }));
        let mut c = registry.register(None).await.unwrap();

        // each producer's own messages must stay in its send order
        let mut handles = Vec::new();
        for producer in 0..4 {
            let registry = Arc::clone(&registry);
            let id = c.id;
            handles.push(tokio::spawn(async move {
                for seq in 0..50 {
                    let payload = format!("{}:{}", producer, seq);
                    if seq % 2 == 0 {
                        registry.unicast(id, Message::system(payload)).await.unwrap();
                    } else {
                        registry.broadcast_all(Message::system(payload), false).await;
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let received = drain(&mut c.outbound);
        assert_eq!(received.len(), 200);
        for producer in 0..4 {
            let seqs: Vec<u32> = received
                .iter()
                .filter_map(|p| p.split_once(':'))
                .filter(|(prod, _)| *prod == producer.to_string())
                .map(|(_, seq)| seq.parse().unwrap())
                .collect();
            assert_eq!(seqs, (0..50).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn test_unicast_to_unregistered_client() {
        let registry = ConnectionRegistry::default();
        let reg = registry.register(None).await.unwrap();
        registry.unregister(reg.id).await;

        let result = registry.unicast(reg.id, Message::system("late")).await;
        assert_eq!(result, Err(DeliveryFailure::NotRegistered(reg.id)));
        assert_eq!(registry.stats().await.delivery_failures, 1);
    }

    #[tokio::test]
    async fn test_close_all_signals_every_client() {
        let registry = ConnectionRegistry::default();
        let a = registry.register(None).await.unwrap();
        let b = registry.register(None).await.unwrap();

        assert_eq!(registry.close_all().await, 2);
        assert!(a.connection.close_requested());
        assert!(b.connection.close_requested());
        assert_eq!(a.connection.status(), ConnectionStatus::Closing);
        // still registered until their workers unregister them
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_stats() {
        let registry = ConnectionRegistry::default();
        let a = registry.register(None).await.unwrap();
        let _b = registry.register(None).await.unwrap();
        registry.broadcast_all(Message::system("hi"), false).await;
        registry.unregister(a.id).await;

        let stats = registry.stats().await;
        assert_eq!(stats.active, 1);
        assert_eq!(stats.total_registered, 2);
        assert_eq!(stats.messages_delivered, 2);
        assert_eq!(stats.delivery_failures, 0);
    }
}
