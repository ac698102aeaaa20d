//! Gateway engine tests against a scripted in-process server
//!
//! Covers the connection lifecycle (Hello → Identify → READY), heartbeat
//! answering, the outbound-intent request path, resume after a
//! server-initiated reconnect, and teardown notification.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

use accord_bus::{EventKind, MessageBus};
use accord_gateway::{GatewayBuilder, GatewayEvent};

const WAIT: Duration = Duration::from_secs(5);

/// Scripted gateway server on a loopback socket
///
/// Accepts connections serially (the client holds at most one at a time),
/// greets each with Hello, then pipes frames both ways.
struct FakeGateway {
    addr: SocketAddr,
    from_client: mpsc::UnboundedReceiver<Value>,
    to_client: mpsc::UnboundedSender<String>,
}

impl FakeGateway {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (in_tx, from_client) = mpsc::unbounded_channel();
        let (to_client, mut out_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let (mut write, mut read) = ws.split();

                let hello = json!({"op": 10, "d": {"heartbeat_interval": 45_000u64}});
                if write.send(WsMessage::Text(hello.to_string())).await.is_err() {
                    continue;
                }

                loop {
                    tokio::select! {
                        msg = read.next() => match msg {
                            Some(Ok(WsMessage::Text(text))) => {
                                if let Ok(frame) = serde_json::from_str(&text) {
                                    let _ = in_tx.send(frame);
                                }
                            }
                            Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                            Some(Ok(_)) => {}
                        },
                        out = out_rx.recv() => match out {
                            Some(text) => {
                                if write.send(WsMessage::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                            None => return,
                        },
                    }
                }
            }
        });

        Self {
            addr,
            from_client,
            to_client,
        }
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    fn push(&self, frame: Value) {
        self.to_client.send(frame.to_string()).unwrap();
    }

    /// Next frame from the client with the given opcode, skipping others
    async fn expect_op(&mut self, op: u8) -> Value {
        loop {
            let frame = timeout(WAIT, self.from_client.recv())
                .await
                .expect("timed out waiting for client frame")
                .expect("server task gone");
            if frame["op"] == op {
                return frame;
            }
        }
    }

    fn push_ready(&self, seq: u64) {
        self.push(json!({
            "op": 0,
            "s": seq,
            "t": "READY",
            "d": {
                "session_id": "sess-9",
                "user": {"id": "u1", "username": "accord"},
                "guilds": [{"id": "g1", "name": "testing"}]
            }
        }));
    }
}

async fn connect(
    server: &FakeGateway,
    bus: &Arc<MessageBus>,
) -> accord_gateway::Gateway {
    GatewayBuilder::new()
        .token("secret")
        .url(server.url())
        .reconnect_delay(Duration::from_millis(50))
        .connect(bus.clone())
        .await
        .expect("connect failed")
}

#[tokio::test]
async fn identify_carries_token_and_ready_is_republished() {
    let mut server = FakeGateway::start().await;
    let bus = MessageBus::new();

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    bus.subscribe(EventKind::GatewayDispatch, move |event| {
        if let Some(event) = event.payload.downcast::<GatewayEvent>() {
            let _ = seen_tx.send(event.name().to_string());
        }
    });

    let gateway = connect(&server, &bus).await;

    let identify = server.expect_op(2).await;
    assert_eq!(identify["d"]["token"], "secret");
    assert_eq!(identify["d"]["v"], 6);

    server.push_ready(1);

    let name = timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
    assert_eq!(name, "READY");

    // Session-scoped caches were filled before the event was republished
    assert!(gateway.user("u1").is_some());
    assert!(gateway.guild("g1").is_some());

    gateway.quit().await;
    bus.close().await;
}

#[tokio::test]
async fn server_heartbeat_request_is_answered_with_the_cursor() {
    let mut server = FakeGateway::start().await;
    let bus = MessageBus::new();
    let gateway = connect(&server, &bus).await;

    server.expect_op(2).await;
    server.push_ready(7);
    server.push(json!({"op": 1, "d": null}));

    let beat = server.expect_op(1).await;
    assert_eq!(beat["d"], 7);

    gateway.quit().await;
    bus.close().await;
}

#[tokio::test]
async fn presence_request_resolves_once_sent() {
    let mut server = FakeGateway::start().await;
    let bus = MessageBus::new();
    let gateway = connect(&server, &bus).await;

    server.expect_op(2).await;
    server.push_ready(1);

    let handle = gateway.update_presence(json!({"status": "online"}));

    let frame = server.expect_op(3).await;
    assert_eq!(frame["d"]["status"], "online");

    let result = timeout(WAIT, handle.wait()).await.unwrap();
    assert!(result.is_ok());

    gateway.quit().await;
    bus.close().await;
}

#[tokio::test]
async fn reconnect_request_leads_to_resume_at_last_seq() {
    let mut server = FakeGateway::start().await;
    let bus = MessageBus::new();
    let gateway = connect(&server, &bus).await;

    server.expect_op(2).await;
    server.push_ready(3);
    server.push(json!({"op": 7, "d": null}));

    // The client drops the socket, reconnects after the configured delay,
    // and the stored session turns the new handshake into a Resume
    let resume = server.expect_op(6).await;
    assert_eq!(resume["d"]["session_id"], "sess-9");
    assert_eq!(resume["d"]["seq"], 3);
    assert_eq!(resume["d"]["token"], "secret");

    gateway.quit().await;
    bus.close().await;
}

#[tokio::test]
async fn non_resumable_invalid_session_restarts_with_identify() {
    let mut server = FakeGateway::start().await;
    let bus = MessageBus::new();
    let gateway = connect(&server, &bus).await;

    server.expect_op(2).await;
    server.push_ready(4);
    server.push(json!({"op": 9, "d": false}));

    // The socket restarts like any other recovery; with the session
    // cleared, the handshake on the new connection is a fresh Identify
    let identify = server.expect_op(2).await;
    assert_eq!(identify["d"]["token"], "secret");

    gateway.quit().await;
    bus.close().await;
}

#[tokio::test]
async fn resumable_invalid_session_restarts_with_resume() {
    let mut server = FakeGateway::start().await;
    let bus = MessageBus::new();
    let gateway = connect(&server, &bus).await;

    server.expect_op(2).await;
    server.push_ready(4);
    server.push(json!({"op": 9, "d": true}));

    let resume = server.expect_op(6).await;
    assert_eq!(resume["d"]["session_id"], "sess-9");
    assert_eq!(resume["d"]["seq"], 4);

    gateway.quit().await;
    bus.close().await;
}

#[tokio::test]
async fn quit_notifies_disconnect_on_the_bus() {
    let mut server = FakeGateway::start().await;
    let bus = MessageBus::new();

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    bus.subscribe(EventKind::GatewayDisconnected, move |_| {
        let _ = seen_tx.send(());
    });

    let gateway = connect(&server, &bus).await;
    server.expect_op(2).await;
    server.push_ready(1);

    gateway.quit().await;

    timeout(WAIT, seen_rx.recv())
        .await
        .expect("no disconnect notification")
        .unwrap();
    bus.close().await;
}

#[tokio::test]
async fn join_request_without_a_voice_server_stays_pending() {
    let mut server = FakeGateway::start().await;
    let bus = MessageBus::new();
    let gateway = connect(&server, &bus).await;

    server.expect_op(2).await;
    server.push_ready(1);

    let handle = gateway.join_voice("g1", "c1");

    let intent = server.expect_op(4).await;
    assert_eq!(intent["d"]["guild_id"], "g1");
    assert_eq!(intent["d"]["channel_id"], "c1");

    // No voice dispatches arrive; the request must still be unanswered
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_answered());

    gateway.quit().await;

    // Teardown rejects what it cannot complete
    let err = timeout(WAIT, handle.wait()).await.unwrap();
    assert!(err.is_err());
    bus.close().await;
}

#[tokio::test]
async fn requests_after_quit_are_rejected() {
    let mut server = FakeGateway::start().await;
    let bus = MessageBus::new();
    let gateway = connect(&server, &bus).await;

    server.expect_op(2).await;
    server.push_ready(1);
    gateway.quit().await;

    // The engine task is gone; the request must be rejected, not left
    // waiting forever
    let handle = gateway.join_voice("g1", "c1");
    let result = timeout(WAIT, handle.wait()).await.unwrap();
    assert!(result.is_err());
    bus.close().await;
}

#[tokio::test]
async fn leave_without_session_is_rejected() {
    let mut server = FakeGateway::start().await;
    let bus = MessageBus::new();
    let gateway = connect(&server, &bus).await;

    server.expect_op(2).await;
    server.push_ready(1);

    let handle = gateway.leave_voice("g1");
    let result = timeout(WAIT, handle.wait()).await.unwrap();
    assert!(result.is_err());

    gateway.quit().await;
    bus.close().await;
}
