//! Voice session engine
//!
//! One session per active call. The session task owns the per-call
//! WebSocket and runs the handshake state machine
//! (`Handshaking → Ready ⇄ Speaking/Paused → Stopped`, with a reconnecting
//! overlay); a separate heartbeat task keeps the control socket alive. A
//! missed heartbeat ack restarts only the WebSocket as a Resume: the UDP
//! socket, SSRC and secret key all survive.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use accord_bus::{EventKind, MessageBus, Payload};
use accord_core::payload::{
    SelectProtocol, SelectProtocolData, SessionDescription, VoiceFrame, VoiceHello,
    VoiceIdentify, VoiceReady, VoiceResume,
};
use accord_core::{HeartbeatAction, Liveness, Packetizer, VoiceOpcode, ENCRYPTION_MODE};
use accord_transport::{
    TransportEvent, TransportSender, UdpTransport, WebSocketHandle, WebSocketReceiver,
    WebSocketTransport,
};

use crate::codec::OpusEncoder;
use crate::crypto::Sealer;
use crate::discovery;
use crate::error::{Result, VoiceError};
use crate::pipeline::{run_pipeline, run_sender, PlaybackControl, PACKET_QUEUE};
use crate::source::AudioSource;

/// Fixed delay between voice reconnect attempts
const RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Reconnect attempts before the session gives up
const RECONNECT_ATTEMPTS: u32 = 5;

/// Server assignment needed to open a voice session
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub guild_id: String,
    pub user_id: String,
    pub session_id: String,
    pub token: String,
    /// Voice server host (optionally `host:port`)
    pub endpoint: String,
}

/// Payload posted on the bus under [`EventKind::PlaybackFinished`]
///
/// Fired once per pipeline run, whether the source was exhausted or the
/// run was stopped; this is the queue-advance trigger for external
/// collaborators.
#[derive(Debug, Clone)]
pub struct PlaybackFinished {
    pub guild_id: String,
}

enum Command {
    Play(Box<dyn AudioSource>),
    Pause,
    Resume,
    Stop,
    Leave,
    /// Heartbeat ack missed: restart the control socket as a Resume
    ReconnectSocket,
    /// Internal: a pipeline run (by generation) finished
    PlaybackDone(u64),
}

/// Handle to a running voice session
pub struct VoiceHandle {
    guild_id: String,
    commands: mpsc::UnboundedSender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
    speaking: Arc<AtomicBool>,
}

impl VoiceHandle {
    /// Connect to the assigned voice server and spawn the session task
    ///
    /// Returns once the control WebSocket is up; the rest of the handshake
    /// (hello/identify/ready/discovery/session description) completes in
    /// the background. A source queued before the secret key arrives
    /// starts playing as soon as it does.
    pub async fn connect(config: VoiceConfig, bus: Arc<MessageBus>) -> Result<Self> {
        let url = ws_url(&config.endpoint);
        let (ws, receiver) = WebSocketTransport::connect(&url).await?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let speaking = Arc::new(AtomicBool::new(false));

        let session = Session {
            config: config.clone(),
            bus,
            ws: Arc::new(ws),
            commands: cmd_tx.clone(),
            liveness: Arc::new(Mutex::new(Liveness::new())),
            heartbeat: None,
            udp: None,
            ssrc: 0,
            key: None,
            packetizer: None,
            pipeline: None,
            queued: None,
            speaking: speaking.clone(),
            resuming: false,
            generation: 0,
        };

        let task = tokio::spawn(session.run(receiver, cmd_rx));

        Ok(Self {
            guild_id: config.guild_id,
            commands: cmd_tx,
            task: Mutex::new(Some(task)),
            speaking,
        })
    }

    pub fn guild_id(&self) -> &str {
        &self.guild_id
    }

    /// Start playing a source; an already-running pipeline is stopped
    /// first so exactly one pipeline is ever active per session
    pub fn play(&self, source: Box<dyn AudioSource>) {
        let _ = self.commands.send(Command::Play(source));
    }

    /// Pause playback without stopping the pipeline
    pub fn pause(&self) {
        let _ = self.commands.send(Command::Pause);
    }

    /// Resume paused playback
    pub fn resume(&self) {
        let _ = self.commands.send(Command::Resume);
    }

    /// Stop playback; fires the completion notification even though the
    /// source was not exhausted
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::Acquire)
    }

    /// Tear the session down and join its task
    pub async fn leave(&self) {
        let _ = self.commands.send(Command::Leave);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

/// Derive the control endpoint URL from the assignment
///
/// Assignments normally arrive as bare `host[:port]`; one with an explicit
/// scheme is used as-is.
fn ws_url(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("wss://{}", endpoint.trim_end_matches(":80"))
    }
}

struct HeartbeatStop {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct ActivePipeline {
    control: Arc<PlaybackControl>,
    task: JoinHandle<()>,
}

struct Session {
    config: VoiceConfig,
    bus: Arc<MessageBus>,
    ws: Arc<WebSocketHandle>,
    commands: mpsc::UnboundedSender<Command>,
    liveness: Arc<Mutex<Liveness>>,
    heartbeat: Option<HeartbeatStop>,
    udp: Option<UdpTransport>,
    ssrc: u32,
    /// Write-once session secret; no audio is encrypted before it is set
    key: Option<[u8; 32]>,
    packetizer: Option<Arc<Mutex<Packetizer>>>,
    pipeline: Option<ActivePipeline>,
    /// Source handed over before the secret key arrived
    queued: Option<Box<dyn AudioSource>>,
    speaking: Arc<AtomicBool>,
    resuming: bool,
    /// Increments per pipeline run so a late completion from a replaced
    /// pipeline cannot clear the new one's speaking state
    generation: u64,
}

impl Session {
    async fn run(
        mut self,
        mut receiver: WebSocketReceiver,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        use accord_transport::TransportReceiver;

        loop {
            tokio::select! {
                event = receiver.recv() => match event {
                    Some(TransportEvent::Text(text)) => {
                        if let Err(e) = self.handle_frame(&text).await {
                            // Protocol errors: log, drop the frame,
                            // session state unaffected
                            warn!("dropping bad voice frame: {}", e);
                        }
                    }
                    Some(TransportEvent::Connected) => {}
                    Some(TransportEvent::Error(e)) => {
                        error!("voice socket error: {}", e);
                    }
                    Some(TransportEvent::Disconnected { reason }) => {
                        warn!("voice socket dropped: {:?}", reason);
                        match self.reconnect_socket().await {
                            Ok(rx) => receiver = rx,
                            Err(e) => {
                                error!("voice reconnect failed, ending session: {}", e);
                                break;
                            }
                        }
                    }
                    None => {
                        match self.reconnect_socket().await {
                            Ok(rx) => receiver = rx,
                            Err(e) => {
                                error!("voice reconnect failed, ending session: {}", e);
                                break;
                            }
                        }
                    }
                },
                cmd = commands.recv() => match cmd {
                    Some(Command::Play(source)) => self.start_or_queue(source).await,
                    Some(Command::Pause) => self.set_paused(true).await,
                    Some(Command::Resume) => self.set_paused(false).await,
                    Some(Command::Stop) => self.stop_pipeline().await,
                    Some(Command::ReconnectSocket) => {
                        match self.reconnect_socket().await {
                            Ok(rx) => receiver = rx,
                            Err(e) => {
                                error!("voice reconnect failed, ending session: {}", e);
                                break;
                            }
                        }
                    }
                    Some(Command::PlaybackDone(generation)) => {
                        self.on_playback_done(generation).await;
                    }
                    Some(Command::Leave) | None => break,
                },
            }
        }

        self.teardown().await;
    }

    /// Stop producers, then close sockets: teardown order matters so no
    /// task observes a torn-down socket mid-operation
    async fn teardown(&mut self) {
        self.stop_pipeline().await;
        self.stop_heartbeat().await;
        let _ = self.ws.close().await;
        self.udp = None;
        info!("voice session for guild {} closed", self.config.guild_id);
    }

    async fn handle_frame(&mut self, text: &str) -> Result<()> {
        let frame = VoiceFrame::parse(text)?;
        match frame.opcode()? {
            VoiceOpcode::Hello => {
                let hello: VoiceHello = serde_json::from_value(frame.d)
                    .map_err(accord_core::Error::from)?;
                self.send_handshake().await?;
                self.start_heartbeat(Duration::from_millis(hello.heartbeat_interval));
            }
            VoiceOpcode::Ready => {
                let ready: VoiceReady = serde_json::from_value(frame.d)
                    .map_err(accord_core::Error::from)?;
                self.on_ready(ready).await?;
            }
            VoiceOpcode::SessionDescription => {
                let desc: SessionDescription = serde_json::from_value(frame.d)
                    .map_err(accord_core::Error::from)?;
                self.key = Some(desc.key()?);
                info!("voice secret key established");
                if let Some(source) = self.queued.take() {
                    self.start_pipeline(source).await;
                }
            }
            VoiceOpcode::HeartbeatAck => {
                self.liveness.lock().on_ack();
            }
            VoiceOpcode::Resumed => {
                info!("voice session resumed");
                self.resuming = false;
            }
            VoiceOpcode::Speaking => {
                debug!("peer speaking update: {}", frame.d);
            }
            other => {
                debug!("ignoring voice opcode {:?}", other);
            }
        }
        Ok(())
    }

    /// Identify on first connect, Resume on a socket-level reconnect
    async fn send_handshake(&mut self) -> Result<()> {
        let frame = if self.resuming {
            VoiceFrame::new(
                VoiceOpcode::Resume,
                serde_json::to_value(VoiceResume {
                    server_id: self.config.guild_id.clone(),
                    session_id: self.config.session_id.clone(),
                    token: self.config.token.clone(),
                })
                .map_err(accord_core::Error::from)?,
            )
        } else {
            VoiceFrame::new(
                VoiceOpcode::Identify,
                serde_json::to_value(VoiceIdentify {
                    server_id: self.config.guild_id.clone(),
                    user_id: self.config.user_id.clone(),
                    session_id: self.config.session_id.clone(),
                    token: self.config.token.clone(),
                })
                .map_err(accord_core::Error::from)?,
            )
        };
        self.send_frame(&frame).await
    }

    /// Open the data plane: UDP socket, IP discovery, Select Protocol
    async fn on_ready(&mut self, ready: VoiceReady) -> Result<()> {
        self.ssrc = ready.ssrc;
        if self.packetizer.is_none() {
            self.packetizer = Some(Arc::new(Mutex::new(Packetizer::new(ready.ssrc))));
        }

        let mut addrs = tokio::net::lookup_host((ready.ip.as_str(), ready.port))
            .await
            .map_err(|e| VoiceError::Handshake(format!("resolve {}: {}", ready.ip, e)))?;
        let remote = addrs
            .next()
            .ok_or_else(|| VoiceError::Handshake(format!("no address for {}", ready.ip)))?;

        let udp = UdpTransport::open(remote).await?;
        let (address, port) = discovery::discover(&udp, ready.ssrc).await?;
        self.udp = Some(udp);

        let select = VoiceFrame::new(
            VoiceOpcode::SelectProtocol,
            serde_json::to_value(SelectProtocol {
                protocol: "udp".to_string(),
                data: SelectProtocolData {
                    address,
                    port,
                    mode: ENCRYPTION_MODE.to_string(),
                },
            })
            .map_err(accord_core::Error::from)?,
        );
        self.send_frame(&select).await
    }

    async fn send_frame(&self, frame: &VoiceFrame) -> Result<()> {
        self.ws.send(frame.encode()?).await?;
        Ok(())
    }

    async fn send_speaking(&self, speaking: bool) {
        let frame = VoiceFrame::speaking(speaking, self.ssrc);
        if let Err(e) = self.send_frame(&frame).await {
            warn!("failed to send speaking update: {}", e);
        }
        self.speaking.store(speaking, Ordering::Release);
    }

    fn start_heartbeat(&mut self, interval: Duration) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = spawn_heartbeat(
            self.ws.clone(),
            interval,
            self.liveness.clone(),
            self.commands.clone(),
            stop_rx,
        );
        self.heartbeat = Some(HeartbeatStop {
            stop: stop_tx,
            task,
        });
    }

    async fn stop_heartbeat(&mut self) {
        if let Some(hb) = self.heartbeat.take() {
            let _ = hb.stop.send(true);
            let _ = hb.task.await;
        }
    }

    /// Restart only the control WebSocket; UDP state, SSRC and key survive
    /// and the next handshake is a Resume
    async fn reconnect_socket(&mut self) -> Result<WebSocketReceiver> {
        self.stop_heartbeat().await;
        let _ = self.ws.close().await;
        self.resuming = true;
        self.liveness.lock().on_ack();

        let url = ws_url(&self.config.endpoint);
        let mut last_error = None;
        for attempt in 1..=RECONNECT_ATTEMPTS {
            tokio::time::sleep(RECONNECT_DELAY).await;
            match WebSocketTransport::connect(&url).await {
                Ok((ws, receiver)) => {
                    info!("voice socket reconnected, resuming");
                    self.ws = Arc::new(ws);
                    return Ok(receiver);
                }
                Err(e) => {
                    warn!("voice reconnect attempt {} failed: {}", attempt, e);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) => Err(e.into()),
            None => Err(VoiceError::Closed),
        }
    }

    async fn start_or_queue(&mut self, source: Box<dyn AudioSource>) {
        if self.key.is_none() {
            debug!("secret key not yet established, queueing source");
            self.queued = Some(source);
        } else {
            self.start_pipeline(source).await;
        }
    }

    async fn start_pipeline(&mut self, source: Box<dyn AudioSource>) {
        // Exactly one pipeline per session
        self.stop_pipeline().await;

        let (Some(key), Some(udp), Some(packetizer)) = (
            self.key,
            self.udp.as_ref().map(UdpTransport::clone_handle),
            self.packetizer.clone(),
        ) else {
            warn!("voice session not ready, queueing source");
            self.queued = Some(source);
            return;
        };

        // A failed encoder creation aborts playback only, never the session
        let encoder = match OpusEncoder::new() {
            Ok(encoder) => encoder,
            Err(e) => {
                error!("cannot create audio encoder: {}", e);
                return;
            }
        };

        self.generation += 1;
        let generation = self.generation;
        let sealer = Sealer::new(&key);
        let control = PlaybackControl::new();
        let done = self.commands.clone();

        let (tx, rx) = mpsc::channel(PACKET_QUEUE);
        let pipeline_control = control.clone();
        let task = tokio::spawn(async move {
            let sender = tokio::spawn(run_sender(rx, udp));
            run_pipeline(source, encoder, sealer, packetizer, pipeline_control, tx).await;
            // The queue is closed; let the sender drain it before reporting
            let _ = sender.await;
            let _ = done.send(Command::PlaybackDone(generation));
        });

        self.pipeline = Some(ActivePipeline { control, task });
        self.send_speaking(true).await;
    }

    async fn stop_pipeline(&mut self) {
        if let Some(active) = self.pipeline.take() {
            active.control.stop();
            let _ = active.task.await;
        }
    }

    async fn set_paused(&mut self, paused: bool) {
        if let Some(active) = &self.pipeline {
            active.control.set_paused(paused);
            self.send_speaking(!paused).await;
        }
    }

    /// Shared tail of natural completion and stop: one notification path
    async fn on_playback_done(&mut self, generation: u64) {
        if generation == self.generation {
            self.pipeline = None;
            self.send_speaking(false).await;
        }
        self.bus.post(
            EventKind::PlaybackFinished,
            Payload::any(PlaybackFinished {
                guild_id: self.config.guild_id.clone(),
            }),
        );
    }
}

fn spawn_heartbeat(
    ws: Arc<WebSocketHandle>,
    interval: Duration,
    liveness: Arc<Mutex<Liveness>>,
    commands: mpsc::UnboundedSender<Command>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop.changed() => break,
            }

            let action = liveness.lock().tick();
            match action {
                HeartbeatAction::Beat => {
                    let frame = VoiceFrame::heartbeat(u64::from(rand::random::<u32>()));
                    match frame.encode() {
                        Ok(text) => {
                            if ws.send(text).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("failed to encode voice heartbeat: {}", e);
                            break;
                        }
                    }
                }
                HeartbeatAction::Reconnect => {
                    warn!("voice heartbeat ack missed, resuming socket");
                    let _ = commands.send(Command::ReconnectSocket);
                    break;
                }
            }
        }
    })
}
