//! Relay transport client
//!
//! Owns the single WebSocket connection to the match relay. A background
//! transport loop multiplexes outbound frames (queued through the client
//! handle) with inbound frames, which are decoded and fanned out on a
//! broadcast channel. One loop per connection; writes go through the loop,
//! so at most one frame is in flight at a time.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::net::protocol::Message;

/// Capacity of the inbound message fan-out channel
const INBOUND_CHANNEL_CAPACITY: usize = 256;

/// Errors raised by the transport client
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    #[error("failed to connect to relay: {0}")]
    Connect(String),

    #[error("transport is not connected")]
    NotConnected,

    #[error("websocket error: {0}")]
    Ws(String),

    #[error("failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Duplex text-frame transport to the relay.
///
/// Production code uses [`WsTransport`]; tests script a mock.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Write one complete text frame.
    async fn send(&mut self, frame: String) -> Result<(), NetError>;

    /// Receive the next text frame. `None` means the peer closed cleanly.
    async fn recv(&mut self) -> Option<Result<String, NetError>>;

    /// Best-effort close handshake.
    async fn close(&mut self) -> Result<(), NetError>;
}

/// WebSocket transport over tokio-tungstenite
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsTransport {
    /// Establish the WebSocket connection to the relay endpoint.
    pub async fn connect(url: &str) -> Result<Self, NetError> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| NetError::Connect(e.to_string()))?;
        Ok(Self { stream })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: String) -> Result<(), NetError> {
        self.stream
            .send(tungstenite::Message::Text(frame))
            .await
            .map_err(|e| NetError::Ws(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, NetError>> {
        while let Some(result) = self.stream.next().await {
            match result {
                Ok(tungstenite::Message::Text(text)) => return Some(Ok(text)),
                Ok(tungstenite::Message::Binary(_)) => {
                    warn!("received binary frame, ignoring");
                }
                Ok(tungstenite::Message::Ping(_))
                | Ok(tungstenite::Message::Pong(_))
                | Ok(tungstenite::Message::Frame(_)) => {}
                Ok(tungstenite::Message::Close(_)) => return None,
                Err(e) => return Some(Err(NetError::Ws(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<(), NetError> {
        self.stream
            .close(None)
            .await
            .map_err(|e| NetError::Ws(e.to_string()))
    }
}

/// Handle to the relay connection.
///
/// Cheap to clone; all clones share the same connection. Outbound messages
/// are queued to the transport loop and flushed in order. Inbound messages
/// are observed through [`RelayClient::subscribe`].
#[derive(Clone)]
pub struct RelayClient {
    cmd_tx: mpsc::UnboundedSender<Message>,
    inbound_tx: broadcast::Sender<Message>,
    connected_rx: watch::Receiver<bool>,
    shutdown: Arc<Notify>,
}

impl RelayClient {
    /// Connect to the relay endpoint and start the transport loop.
    pub async fn connect(url: &str) -> Result<Self, NetError> {
        let transport = WsTransport::connect(url).await?;
        info!(url, "connected to relay");
        Ok(Self::start(transport))
    }

    /// Start the transport loop over an already-connected transport.
    pub fn start(transport: impl Transport) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Message>();
        let (inbound_tx, _) = broadcast::channel(INBOUND_CHANNEL_CAPACITY);
        let (connected_tx, connected_rx) = watch::channel(true);
        let shutdown = Arc::new(Notify::new());

        tokio::spawn(transport_loop(
            transport,
            cmd_rx,
            inbound_tx.clone(),
            connected_tx,
            shutdown.clone(),
        ));

        Self {
            cmd_tx,
            inbound_tx,
            connected_rx,
            shutdown,
        }
    }

    /// Queue one message for transmission.
    pub fn send(&self, msg: Message) -> Result<(), NetError> {
        if !self.is_connected() {
            return Err(NetError::NotConnected);
        }
        self.cmd_tx.send(msg).map_err(|_| NetError::NotConnected)
    }

    /// Subscribe to decoded inbound messages.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.inbound_tx.subscribe()
    }

    /// Whether the transport loop is still running.
    pub fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }

    /// Resolve once the transport loop has exited, for any reason.
    pub async fn wait_disconnected(&self) {
        let mut rx = self.connected_rx.clone();
        // The loop flips the flag before dropping the sender, so either
        // outcome of wait_for means the connection is gone.
        let _ = rx.wait_for(|connected| !connected).await;
    }

    /// Close the connection. Idempotent; teardown errors are swallowed by
    /// the transport loop, so this never fails.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }
}

/// Background loop owning the transport.
///
/// Exits when the relay closes the connection, a transport error occurs,
/// the command channel closes, or [`RelayClient::close`] is called. Every
/// exit path attempts the close handshake and swallows its errors.
async fn transport_loop(
    mut transport: impl Transport,
    mut cmd_rx: mpsc::UnboundedReceiver<Message>,
    inbound_tx: broadcast::Sender<Message>,
    connected_tx: watch::Sender<bool>,
    shutdown: Arc<Notify>,
) {
    debug!("transport loop started");

    loop {
        tokio::select! {
            outgoing = cmd_rx.recv() => {
                match outgoing {
                    Some(msg) => {
                        let frame = match serde_json::to_string(&msg) {
                            Ok(frame) => frame,
                            Err(e) => {
                                // Serialization failures are local bugs, not
                                // connection failures; drop the frame.
                                warn!(error = %e, "failed to serialize outbound message");
                                continue;
                            }
                        };
                        if let Err(e) = transport.send(frame).await {
                            warn!(error = %e, "relay send failed");
                            break;
                        }
                    }
                    None => {
                        debug!("command channel closed");
                        break;
                    }
                }
            }

            _ = shutdown.notified() => {
                debug!("close requested");
                break;
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        match serde_json::from_str::<Message>(&text) {
                            Ok(msg) => {
                                // No receivers is fine; subscribers come and go.
                                let _ = inbound_tx.send(msg);
                            }
                            Err(e) => {
                                warn!(error = %e, bytes = text.len(), "dropping malformed frame");
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "relay receive failed");
                        break;
                    }
                    None => {
                        info!("relay closed the connection");
                        break;
                    }
                }
            }
        }
    }

    if let Err(e) = transport.close().await {
        debug!(error = %e, "close handshake failed");
    }
    connected_tx.send_replace(false);
    debug!("transport loop exited");
}
