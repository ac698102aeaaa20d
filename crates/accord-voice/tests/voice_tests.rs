//! Voice engine tests against a scripted in-process voice server
//!
//! Drives the full handshake (Hello → Identify → Ready → discovery →
//! Select Protocol → Session Description) over loopback sockets, then
//! verifies real sealed RTP datagrams and the completion notification.

use chacha20poly1305::aead::Aead;
use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305, XNonce};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;

use accord_bus::{EventKind, MessageBus};
use accord_voice::{BufferSource, PlaybackFinished, VoiceConfig, VoiceHandle};

const WAIT: Duration = Duration::from_secs(5);
const SSRC: u32 = 17;
const KEY: [u8; 32] = [7u8; 32];

/// Scripted voice server: one WebSocket control plane plus a UDP socket
/// that answers discovery and captures RTP datagrams
struct FakeVoiceServer {
    ws_addr: SocketAddr,
    frames: mpsc::UnboundedReceiver<Value>,
    datagrams: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl FakeVoiceServer {
    async fn start() -> Self {
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let udp_port = udp.local_addr().unwrap().port();

        let (rtp_tx, datagrams) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                let Ok((len, from)) = udp.recv_from(&mut buf).await else {
                    break;
                };
                let data = &buf[..len];
                if len == 74 && data[0] == 0x0 && data[1] == 0x1 {
                    // Discovery request: echo it back as a response with
                    // the caller's visible address filled in
                    let mut resp = [0u8; 74];
                    resp.copy_from_slice(data);
                    resp[1] = 0x2;
                    resp[8..17].copy_from_slice(b"127.0.0.1");
                    resp[72..74].copy_from_slice(&from.port().to_be_bytes());
                    let _ = udp.send_to(&resp, from).await;
                } else if rtp_tx.send(data.to_vec()).is_err() {
                    break;
                }
            }
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_addr = listener.local_addr().unwrap();

        let (frame_tx, frames) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                return;
            };
            let (mut write, mut read) = ws.split();

            let hello = json!({"op": 8, "d": {"heartbeat_interval": 45_000u64}});
            if write.send(WsMessage::Text(hello.to_string())).await.is_err() {
                return;
            }

            while let Some(Ok(msg)) = read.next().await {
                let WsMessage::Text(text) = msg else { continue };
                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                let reply = match frame["op"].as_u64() {
                    Some(0) => Some(json!({
                        "op": 2,
                        "d": {
                            "ssrc": SSRC,
                            "ip": "127.0.0.1",
                            "port": udp_port,
                            "modes": ["xchacha20_poly1305"]
                        }
                    })),
                    Some(1) => Some(json!({
                        "op": 4,
                        "d": {
                            "mode": "xchacha20_poly1305",
                            "secret_key": KEY.to_vec()
                        }
                    })),
                    Some(3) => Some(json!({"op": 6, "d": frame["d"]})),
                    _ => None,
                };
                let _ = frame_tx.send(frame);
                if let Some(reply) = reply {
                    if write.send(WsMessage::Text(reply.to_string())).await.is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            ws_addr,
            frames,
            datagrams,
        }
    }

    fn endpoint(&self) -> String {
        format!("ws://{}", self.ws_addr)
    }

    async fn expect_op(&mut self, op: u64) -> Value {
        loop {
            let frame = timeout(WAIT, self.frames.recv())
                .await
                .expect("timed out waiting for voice frame")
                .expect("server task gone");
            if frame["op"] == op {
                return frame;
            }
        }
    }

    async fn next_datagram(&mut self) -> Vec<u8> {
        timeout(WAIT, self.datagrams.recv())
            .await
            .expect("timed out waiting for datagram")
            .expect("udp task gone")
    }
}

fn config(endpoint: String) -> VoiceConfig {
    VoiceConfig {
        guild_id: "g1".into(),
        user_id: "u1".into(),
        session_id: "s1".into(),
        token: "voice-token".into(),
        endpoint,
    }
}

fn open_datagram(datagram: &[u8]) -> Vec<u8> {
    let mut nonce = [0u8; 24];
    nonce[..12].copy_from_slice(&datagram[..12]);
    let cipher = XChaCha20Poly1305::new(Key::from_slice(&KEY));
    cipher
        .decrypt(XNonce::from_slice(&nonce), &datagram[12..])
        .expect("datagram does not open under the header nonce")
}

#[tokio::test]
async fn handshake_selects_protocol_with_discovered_address() {
    let mut server = FakeVoiceServer::start().await;
    let bus = MessageBus::new();

    let handle = VoiceHandle::connect(config(server.endpoint()), bus.clone())
        .await
        .unwrap();

    let identify = server.expect_op(0).await;
    assert_eq!(identify["d"]["server_id"], "g1");
    assert_eq!(identify["d"]["user_id"], "u1");
    assert_eq!(identify["d"]["token"], "voice-token");

    let select = server.expect_op(1).await;
    assert_eq!(select["d"]["protocol"], "udp");
    assert_eq!(select["d"]["data"]["mode"], "xchacha20_poly1305");
    assert_eq!(select["d"]["data"]["address"], "127.0.0.1");

    handle.leave().await;
    bus.close().await;
}

#[tokio::test]
async fn playback_emits_sealed_rtp_and_one_completion() {
    let mut server = FakeVoiceServer::start().await;
    let bus = MessageBus::new();

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    bus.subscribe(EventKind::PlaybackFinished, move |event| {
        if let Some(finished) = event.payload.downcast::<PlaybackFinished>() {
            let _ = done_tx.send(finished.guild_id.clone());
        }
    });

    let handle = VoiceHandle::connect(config(server.endpoint()), bus.clone())
        .await
        .unwrap();
    server.expect_op(1).await;

    // Three full 20 ms frames of a constant non-silent signal
    handle.play(Box::new(BufferSource::new(vec![400i16; 3 * 1920])));

    let speaking = server.expect_op(5).await;
    assert_eq!(speaking["d"]["speaking"], true);
    assert_eq!(speaking["d"]["ssrc"], SSRC);

    for i in 0..3u16 {
        let datagram = server.next_datagram().await;
        assert_eq!(datagram[0], 0x80);
        assert_eq!(datagram[1], 0x78);
        assert_eq!(u16::from_be_bytes([datagram[2], datagram[3]]), i);
        assert_eq!(
            u32::from_be_bytes([datagram[8], datagram[9], datagram[10], datagram[11]]),
            SSRC
        );
        let opus = open_datagram(&datagram);
        assert!(!opus.is_empty());
    }

    let guild = timeout(WAIT, done_rx.recv()).await.unwrap().unwrap();
    assert_eq!(guild, "g1");

    let speaking = server.expect_op(5).await;
    assert_eq!(speaking["d"]["speaking"], false);
    assert!(!handle.is_speaking());

    // Exactly one completion per run
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(done_rx.try_recv().is_err());

    handle.leave().await;
    bus.close().await;
}

#[tokio::test]
async fn source_queued_before_the_key_plays_after_it() {
    let mut server = FakeVoiceServer::start().await;
    let bus = MessageBus::new();

    let handle = VoiceHandle::connect(config(server.endpoint()), bus.clone())
        .await
        .unwrap();

    // Queue immediately; the handshake has not produced a key yet
    handle.play(Box::new(BufferSource::new(vec![400i16; 1920])));

    server.expect_op(1).await;
    let datagram = server.next_datagram().await;
    assert_eq!(datagram[0], 0x80);

    handle.leave().await;
    bus.close().await;
}

#[tokio::test]
async fn stop_fires_the_completion_without_exhausting_the_source() {
    let mut server = FakeVoiceServer::start().await;
    let bus = MessageBus::new();

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    bus.subscribe(EventKind::PlaybackFinished, move |_| {
        let _ = done_tx.send(());
    });

    let handle = VoiceHandle::connect(config(server.endpoint()), bus.clone())
        .await
        .unwrap();
    server.expect_op(1).await;

    // A long source that stop() must cut short
    handle.play(Box::new(BufferSource::new(vec![400i16; 500 * 1920])));
    server.next_datagram().await;
    handle.stop();

    timeout(WAIT, done_rx.recv()).await.unwrap().unwrap();

    handle.leave().await;
    bus.close().await;
}
