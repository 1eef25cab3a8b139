//! Connection Worker
//!
//! Drives one accepted TCP connection: handshake, registration, then a
//! reader (inbound frames -> events) and a writer (outbound queue -> frames)
//! until either side ends.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

use super::error::ServerResult;
use super::ServerConfig;
use crate::dispatch::{Event, EventDispatcher};
use crate::handshake::{self, HandshakeRequest, HandshakeResponse};
use crate::registry::{ClientConnection, ClientId, ConnectionRegistry, Message, Registration};

type Transport = BufReader<TcpStream>;
type WsSink = SplitSink<WebSocketStream<Transport>, WsMessage>;
type WsSource = SplitStream<WebSocketStream<Transport>>;

/// Longest the writer gets to wind down after the reader has finished,
/// further capped at half the drain timeout
const WRITER_GRACE: Duration = Duration::from_secs(5);

/// Shared handles every connection worker needs
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub config: Arc<ServerConfig>,
    pub registry: Arc<ConnectionRegistry>,
    pub dispatcher: Arc<EventDispatcher>,
    pub shutting_down: Arc<AtomicBool>,
}

/// Why the reader stopped
#[derive(Debug)]
enum ReadEnd {
    PeerClosed,
    CloseRequested,
    IdleTimeout,
    Error(String),
}

/// Entry point for an accepted connection
pub(crate) async fn handle_connection(stream: TcpStream, peer: SocketAddr, ctx: WorkerContext) {
    if let Err(e) = serve_connection(stream, peer, &ctx).await {
        tracing::debug!(peer = %peer, error = %e, "Connection ended with error");
    }
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: &WorkerContext,
) -> ServerResult<()> {
    let mut transport = BufReader::new(stream);

    if ctx.registry.is_full().await {
        tracing::warn!(peer = %peer, "Refusing connection: registry full");
        return refuse(&mut transport, &handshake::capacity_response()).await;
    }

    let request = HandshakeRequest::read_from(
        &mut transport,
        ctx.config.max_request_bytes,
        ctx.config.handshake_timeout,
    )
    .await?;

    let response = handshake::validate(&request);
    if let HandshakeResponse::Rejected { reason } = &response {
        tracing::warn!(peer = %peer, path = %request.path, reason = %reason, "Handshake rejected");
        return refuse(&mut transport, &response.to_http()).await;
    }

    if ctx.shutting_down.load(Ordering::Acquire) {
        return refuse(&mut transport, &handshake::capacity_response()).await;
    }

    let registration = match ctx.registry.register(Some(peer)).await {
        Ok(registration) => registration,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "Refusing connection");
            return refuse(&mut transport, &handshake::capacity_response()).await;
        }
    };

    if let Err(e) = write_head(&mut transport, &response.to_http()).await {
        ctx.registry.unregister(registration.id).await;
        return Err(e.into());
    }

    tracing::debug!(
        client_id = %registration.id,
        peer = %peer,
        path = %request.path,
        "Handshake complete"
    );

    let socket = WebSocketStream::from_raw_socket(transport, Role::Server, None).await;
    run_session(socket, registration, ctx).await;
    Ok(())
}

async fn write_head<W>(transport: &mut W, head: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    transport.write_all(head.as_bytes()).await?;
    transport.flush().await
}

async fn refuse<W>(transport: &mut W, head: &str) -> ServerResult<()>
where
    W: AsyncWrite + Unpin,
{
    write_head(transport, head).await?;
    transport.shutdown().await?;
    Ok(())
}

/// Run an open session until the client leaves or is told to close
async fn run_session(
    socket: WebSocketStream<Transport>,
    registration: Registration,
    ctx: &WorkerContext,
) {
    let Registration {
        id,
        connection,
        outbound,
    } = registration;

    let (sink, source) = socket.split();

    ctx.dispatcher.dispatch(&Event::Connected(id)).await;

    let mut writer = tokio::spawn(write_loop(
        sink,
        outbound,
        Arc::clone(&connection),
        ctx.config.ping_interval,
    ));

    let end = read_loop(source, id, &connection, &ctx.dispatcher, ctx.config.idle_timeout).await;
    tracing::debug!(client_id = %id, reason = ?end, "Reader finished");

    connection.request_close();
    let grace = WRITER_GRACE.min(ctx.config.drain_timeout / 2);
    if tokio::time::timeout(grace, &mut writer).await.is_err() {
        tracing::debug!(client_id = %id, "Writer did not finish in time, aborting");
        writer.abort();
    }

    ctx.registry.unregister(id).await;
    ctx.dispatcher.dispatch(&Event::Disconnected(id)).await;
}

/// Inbound side: turn frames into dispatched events
async fn read_loop(
    mut source: WsSource,
    id: ClientId,
    connection: &ClientConnection,
    dispatcher: &EventDispatcher,
    idle_timeout: Option<Duration>,
) -> ReadEnd {
    loop {
        let next = tokio::select! {
            biased;
            _ = connection.closed() => return ReadEnd::CloseRequested,
            next = next_frame(&mut source, idle_timeout) => next,
        };

        let frame = match next {
            None => return ReadEnd::IdleTimeout,
            Some(None) => return ReadEnd::PeerClosed,
            Some(Some(Err(e))) => return ReadEnd::Error(e.to_string()),
            Some(Some(Ok(frame))) => frame,
        };

        match frame {
            WsMessage::Text(text) => {
                let event = Event::Message {
                    id,
                    payload: text.as_str().to_owned(),
                };
                dispatcher.dispatch(&event).await;
            }
            WsMessage::Binary(data) => {
                tracing::debug!(client_id = %id, len = data.len(), "Binary frame ignored");
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) => {
                // tungstenite answers pings itself
                tracing::trace!(client_id = %id, "Keepalive frame");
            }
            WsMessage::Close(_) => {
                tracing::debug!(client_id = %id, "Client requested close");
                return ReadEnd::PeerClosed;
            }
            WsMessage::Frame(_) => {}
        }
    }
}

/// `None` when the idle timeout elapsed
async fn next_frame(
    source: &mut WsSource,
    idle_timeout: Option<Duration>,
) -> Option<Option<Result<WsMessage, tokio_tungstenite::tungstenite::Error>>> {
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, source.next()).await.ok(),
        None => Some(source.next().await),
    }
}

/// Outbound side: drain the queue in order, ping periodically
async fn write_loop(
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<Message>,
    connection: Arc<ClientConnection>,
    ping_interval: Option<Duration>,
) {
    let id = connection.id();
    let mut ticker =
        ping_interval.map(|period| tokio::time::interval_at(Instant::now() + period, period));

    loop {
        tokio::select! {
            biased;
            _ = connection.closed() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                break;
            }
            queued = outbound.recv() => {
                let Some(message) = queued else { break };
                if let Err(e) = sink.send(WsMessage::text(message.payload().to_owned())).await {
                    tracing::debug!(
                        client_id = %id,
                        error = %e,
                        "WebSocket send failed, closing connection"
                    );
                    break;
                }
            }
            _ = tick(&mut ticker) => {
                if sink.send(WsMessage::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }

    connection.request_close();
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
