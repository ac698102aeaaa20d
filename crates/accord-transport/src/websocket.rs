//! WebSocket client transport
//!
//! Carries JSON text frames for the gateway and voice control planes.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, error, info, warn};

use crate::error::{Result, TransportError};
use crate::traits::{TransportEvent, TransportReceiver, TransportSender};

/// WebSocket client transport
pub struct WebSocketTransport;

/// Sender half of a WebSocket connection
pub struct WebSocketHandle {
    tx: mpsc::Sender<WsMessage>,
    connected: Arc<Mutex<bool>>,
}

#[async_trait]
impl TransportSender for WebSocketHandle {
    async fn send(&self, text: String) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.tx
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        let _ = self.tx.send(WsMessage::Close(None)).await;
        *self.connected.lock() = false;
        Ok(())
    }
}

/// Receiver half of a WebSocket connection
pub struct WebSocketReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for WebSocketReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

impl WebSocketTransport {
    /// Connect to a control endpoint
    pub async fn connect(url: &str) -> Result<(WebSocketHandle, WebSocketReceiver)> {
        info!("connecting to {}", url);

        let (ws_stream, response) = connect_async(url).await.map_err(|e| match e {
            tokio_tungstenite::tungstenite::Error::Url(e) => {
                TransportError::InvalidUrl(e.to_string())
            }
            other => TransportError::ConnectionFailed(other.to_string()),
        })?;

        debug!("websocket connected, response: {:?}", response.status());

        let (write, read) = ws_stream.split();

        let (send_tx, mut send_rx) = mpsc::channel::<WsMessage>(100);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(100);

        let connected = Arc::new(Mutex::new(true));
        let connected_write = connected.clone();
        let connected_read = connected.clone();

        // Writer task: drains the send queue onto the socket
        tokio::spawn(async move {
            let mut write = write;
            while let Some(msg) = send_rx.recv().await {
                let closing = matches!(msg, WsMessage::Close(_));
                if let Err(e) = write.send(msg).await {
                    error!("websocket write error: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
            *connected_write.lock() = false;
        });

        // Reader task: publishes events in arrival order
        tokio::spawn(async move {
            let mut read = read;

            let _ = event_tx.send(TransportEvent::Connected).await;

            while let Some(result) = read.next().await {
                match result {
                    Ok(msg) => match msg {
                        WsMessage::Text(text) => {
                            let _ = event_tx.send(TransportEvent::Text(text)).await;
                        }
                        WsMessage::Binary(data) => {
                            // This protocol speaks text frames only
                            warn!("dropping unexpected binary frame ({} bytes)", data.len());
                        }
                        WsMessage::Ping(_) | WsMessage::Pong(_) => {
                            // Pong is handled by tungstenite
                        }
                        WsMessage::Close(frame) => {
                            let reason = frame.map(|f| f.reason.to_string());
                            info!("websocket closed: {:?}", reason);
                            let _ = event_tx.send(TransportEvent::Disconnected { reason }).await;
                            break;
                        }
                        WsMessage::Frame(_) => {}
                    },
                    Err(e) => {
                        error!("websocket read error: {}", e);
                        let _ = event_tx.send(TransportEvent::Error(e.to_string())).await;
                        let _ = event_tx
                            .send(TransportEvent::Disconnected {
                                reason: Some(e.to_string()),
                            })
                            .await;
                        break;
                    }
                }
            }

            *connected_read.lock() = false;
        });

        let sender = WebSocketHandle {
            tx: send_tx,
            connected,
        };

        let receiver = WebSocketReceiver { rx: event_rx };

        Ok((sender, receiver))
    }
}
