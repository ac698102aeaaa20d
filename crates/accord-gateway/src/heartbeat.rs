//! Gateway heartbeat task
//!
//! Sends one heartbeat per server-announced interval, carrying the current
//! replay cursor. The ack check runs before each send: a beat whose ack
//! never arrived means the connection is dead, and the task reports that
//! exactly once and exits.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::warn;

use accord_core::{GatewayFrame, HeartbeatAction, Liveness};
use accord_transport::{TransportSender, WebSocketHandle};

use crate::client::Command;
use crate::session::SessionState;

pub(crate) struct HeartbeatStop {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HeartbeatStop {
    pub(crate) async fn shut_down(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

pub(crate) fn spawn_heartbeat(
    ws: Arc<WebSocketHandle>,
    interval: Duration,
    liveness: Arc<Mutex<Liveness>>,
    state: Arc<Mutex<SessionState>>,
    commands: mpsc::UnboundedSender<Command>,
) -> HeartbeatStop {
    let (stop_tx, mut stop_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop_rx.changed() => break,
            }

            let action = liveness.lock().tick();
            match action {
                HeartbeatAction::Beat => {
                    let frame = GatewayFrame::heartbeat(state.lock().last_seq());
                    match frame.encode() {
                        Ok(text) => {
                            if ws.send(text).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("failed to encode heartbeat: {}", e);
                            break;
                        }
                    }
                }
                HeartbeatAction::Reconnect => {
                    warn!("heartbeat ack missed, reporting dead connection");
                    let _ = commands.send(Command::ConnectionDead);
                    break;
                }
            }
        }
    });

    HeartbeatStop {
        stop: stop_tx,
        task,
    }
}
