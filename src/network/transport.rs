//! Transport Adapter (C1)
//!
//! Accepts bidirectional client channels over WebSocket, frames JSON
//! messages (§6: one JSON object per frame, ≤ 64 KiB), forwards decoded
//! messages to the dispatcher's inbound channel, and exposes a `send`
//! primitive that tolerates closed channels (§5).
//!
//! Grounded on the teacher's `GameServer::handle_connection` (accept,
//! split, per-connection `mpsc` sender task) but restructured so every
//! connection feeds a single shared inbound channel rather than each
//! connection task mutating shared registries directly — the dispatcher
//! is the only task that touches the core maps (§5).

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::GameServerError;
use crate::network::dispatcher::DispatcherEvent;
use crate::network::protocol::{ClientMessage, ServerMessage};

/// A send primitive to a single connection's writer task. Cloning is
/// cheap; sending after the connection has closed is a silent no-op
/// (§5: "message sends go through a send primitive that tolerates closed
/// channels").
#[derive(Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<ServerMessage>,
}

impl OutboundSender {
    /// Best-effort, asynchronous send (§4.1: "outbound sends are
    /// asynchronous best-effort").
    pub fn send(&self, msg: ServerMessage) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(msg).await;
        });
    }

    /// Construct directly from a channel sender; used by tests elsewhere
    /// in the crate that need a standalone `OutboundSender`.
    #[cfg(test)]
    pub(crate) fn from_sender(tx: mpsc::Sender<ServerMessage>) -> Self {
        Self { tx }
    }
}

/// The WebSocket transport server.
pub struct TransportServer {
    bind_addr: SocketAddr,
    max_frame_bytes: usize,
    dispatcher_tx: mpsc::Sender<DispatcherEvent>,
}

impl TransportServer {
    /// Construct a transport bound to `bind_addr`, feeding inbound events
    /// into `dispatcher_tx`.
    pub fn new(bind_addr: SocketAddr, max_frame_bytes: usize, dispatcher_tx: mpsc::Sender<DispatcherEvent>) -> Self {
        Self {
            bind_addr,
            max_frame_bytes,
            dispatcher_tx,
        }
    }

    /// Accept connections until the process is shut down.
    pub async fn run(self: Arc<Self>) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!("transport listening on {}", self.bind_addr);

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let this = self.clone();
                    tokio::spawn(async move {
                        this.handle_connection(stream, addr).await;
                    });
                }
                Err(e) => {
                    error!("accept error: {}", e);
                }
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let ws_stream = match accept_async(stream).await {
            Ok(ws) => ws,
            Err(e) => {
                error!("websocket handshake failed for {}: {}", addr, e);
                return;
            }
        };

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(64);

        // Provisional connection id until REGISTER assigns a stable client id.
        let provisional_id = format!("conn_{}", Uuid::new_v4());
        let outbound = OutboundSender { tx: out_tx };

        if self
            .dispatcher_tx
            .send(DispatcherEvent::Connected {
                provisional_id: provisional_id.clone(),
                outbound,
            })
            .await
            .is_err()
        {
            warn!("dispatcher channel closed; dropping connection {}", addr);
            return;
        }

        let writer_task = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let text = match msg.to_json() {
                    Ok(t) => t,
                    Err(e) => {
                        error!("failed to serialize outbound message: {}", e);
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let max_frame_bytes = self.max_frame_bytes;
        let dispatcher_tx = self.dispatcher_tx.clone();

        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if text.len() > max_frame_bytes {
                        warn!("oversized frame from {} ({} bytes), dropping", addr, text.len());
                        continue;
                    }
                    match ClientMessage::from_json(&text) {
                        Ok(msg) => {
                            if dispatcher_tx
                                .send(DispatcherEvent::Message {
                                    provisional_id: provisional_id.clone(),
                                    msg,
                                })
                                .await
                                .is_err()
                            {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!("malformed frame from {}: {}", addr, e);
                            let _ = dispatcher_tx
                                .send(DispatcherEvent::MalformedFrame {
                                    provisional_id: provisional_id.clone(),
                                })
                                .await;
                        }
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("websocket error for {}: {}", addr, e);
                    break;
                }
            }
        }

        writer_task.abort();
        let _ = dispatcher_tx
            .send(DispatcherEvent::Disconnected { provisional_id })
            .await;
        debug!("connection {} closed", addr);
    }
}
