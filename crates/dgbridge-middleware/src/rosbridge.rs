//! rosbridge-compatible WebSocket endpoint for the in-process bus.
//!
//! [`RosbridgeServer`]:
//!
//! 1. **Forwards** every envelope published on the [`BusTransport`] to each
//!    connected client as a rosbridge v2 `publish` operation:
//!    `{"op":"publish","topic":"/t","msg":{...}}`.
//!
//! 2. **Injects** `publish` operations received from clients back into the
//!    bus, decoding `msg` with the wire type of the target topic.  Topics the
//!    bus has never seen are ignored, as is every other operation.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use dgbridge_types::WireMessage;

use crate::transport::{BusTransport, Envelope};

#[derive(Error, Debug)]
pub enum RosbridgeError {
    #[error("ws bind error on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("ws handshake from {peer}: {reason}")]
    Handshake { peer: SocketAddr, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Serves a [`BusTransport`] to rosbridge clients.
#[derive(Clone)]
pub struct RosbridgeServer {
    bus: BusTransport,
}

impl RosbridgeServer {
    pub fn new(bus: BusTransport) -> Self {
        Self { bus }
    }

    /// Accept clients on `addr` until the task is dropped.
    ///
    /// # Errors
    ///
    /// [`RosbridgeError::Bind`] if the listener cannot be bound.
    pub async fn run_ws_server(self, addr: SocketAddr) -> Result<(), RosbridgeError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RosbridgeError::Bind { addr, source })?;
        info!(%addr, "rosbridge server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_ws_client(stream, peer).await {
                            error!(peer = %peer, error = %e, "ws client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "ws accept error");
                }
            }
        }
    }

    async fn handle_ws_client(&self, stream: TcpStream, peer: SocketAddr) -> Result<(), RosbridgeError> {
        let ws_stream = accept_async(stream)
            .await
            .map_err(|e| RosbridgeError::Handshake {
                peer,
                reason: e.to_string(),
            })?;
        debug!(%peer, "ws client connected");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let mut tap = self.bus.tap();

        loop {
            tokio::select! {
                result = tap.recv() => {
                    match result {
                        Ok(envelope) => {
                            let text = publish_op(&envelope)?;
                            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(n)) => {
                            warn!(peer = %peer, lagged_by = n, "ws client lagged");
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(_)) => break,
                        Some(Ok(Message::Text(text))) => {
                            self.handle_incoming_ws_message(text.as_str());
                        }
                        _ => {}
                    }
                }
            }
        }

        debug!(%peer, "ws client disconnected");
        Ok(())
    }

    /// Inject a client `publish` operation into the bus.
    fn handle_incoming_ws_message(&self, text: &str) {
        let Ok(json) = serde_json::from_str::<serde_json::Value>(text) else {
            debug!("ignoring non-JSON ws message");
            return;
        };

        if json.get("op").and_then(|op| op.as_str()) != Some("publish") {
            return;
        }
        let Some(topic) = json.get("topic").and_then(|t| t.as_str()) else {
            return;
        };
        let Some(wire_type) = self.bus.wire_type_of(topic) else {
            debug!(topic, "ignoring publish on unknown topic");
            return;
        };
        let body = json.get("msg").cloned().unwrap_or(serde_json::Value::Null);

        let msg = match WireMessage::from_json(wire_type, body) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(topic, %wire_type, error = %e, "malformed publish from ws client");
                return;
            }
        };
        if let Err(e) = self.bus.inject(topic, msg) {
            warn!(topic, error = %e, "failed to inject ws publish");
        }
    }
}

fn publish_op(envelope: &Envelope) -> Result<String, serde_json::Error> {
    serde_json::to_string(&json!({
        "op": "publish",
        "topic": envelope.topic,
        "msg": envelope.msg,
    }))
}
