//! Per-connection state
//!
//! A [`ClientConnection`] is shared between the registry, which owns its
//! membership, and the connection worker, which drives its I/O.

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};

use super::error::DeliveryFailure;
use super::message::Message;

/// Unique identifier for a connected client
///
/// Allocated monotonically by the registry and never reused while it lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionStatus {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionStatus {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionStatus::Connecting,
            1 => ConnectionStatus::Open,
            2 => ConnectionStatus::Closing,
            _ => ConnectionStatus::Closed,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Open => "open",
            ConnectionStatus::Closing => "closing",
            ConnectionStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A single client connection
pub struct ClientConnection {
    id: ClientId,
    peer: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
    /// Outbound queue, drained by the connection's writer task
    sender: mpsc::Sender<Message>,
    status: AtomicU8,
    /// Flipped to `true` when the connection should shut down
    close_tx: watch::Sender<bool>,
}

impl ClientConnection {
    /// Create a connection in `Connecting` state plus its outbound receiver
    pub(crate) fn new(
        id: ClientId,
        peer: Option<SocketAddr>,
        outbound_capacity: usize,
    ) -> (Self, mpsc::Receiver<Message>) {
        let (sender, receiver) = mpsc::channel(outbound_capacity.max(1));
        let (close_tx, _) = watch::channel(false);

        let conn = Self {
            id,
            peer,
            connected_at: Utc::now(),
            sender,
            status: AtomicU8::new(ConnectionStatus::Connecting as u8),
            close_tx,
        };
        (conn, receiver)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_open(&self) -> bool {
        self.status() == ConnectionStatus::Open
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Queue a message for this client without waiting
    ///
    /// Fails if the client is no longer open, its queue is full, or its
    /// writer has gone away.
    pub fn deliver(&self, message: Message) -> Result<(), DeliveryFailure> {
        if !self.is_open() {
            return Err(DeliveryFailure::Closed(self.id));
        }
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::QueueFull(self.id),
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Closed(self.id),
        })
    }

    /// Ask the connection worker to shut this connection down
    ///
    /// Moves an `Open` connection to `Closing`. Safe to call repeatedly.
    pub fn request_close(&self) {
        let _ = self.status.compare_exchange(
            ConnectionStatus::Open as u8,
            ConnectionStatus::Closing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.close_tx.send_replace(true);
    }

    pub fn close_requested(&self) -> bool {
        *self.close_tx.borrow()
    }

    /// Resolves once [`request_close`](Self::request_close) has been called
    pub async fn closed(&self) {
        let mut rx = self.close_tx.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("status", &self.status())
            .field("connected_at", &self.connected_at)
            .finish()
    }
}
