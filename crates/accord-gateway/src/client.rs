//! The gateway session engine
//!
//! One engine per account connection. The engine task owns the gateway
//! WebSocket and is the sole responder for the outbound-intent bus
//! requests ([`EventKind::JoinVoice`], [`EventKind::LeaveVoice`],
//! [`EventKind::UpdatePresence`]); everything inbound is decoded, applied
//! to session state, and republished on the bus under
//! [`EventKind::GatewayDispatch`].
//!
//! Connection loss has two flavors with the same recovery: a heartbeat
//! with no ack, or the transport dropping. Both tear down every voice
//! session and schedule a delayed reconnect through the bus, after which
//! the stored session id turns the next handshake into a Resume.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use accord_bus::{EventKind, MessageBus, Payload, PendingHandle};
use accord_core::payload::{
    Hello, Identify, IdentifyProperties, ReadyEvent, Resume, VoiceServerUpdate,
    VoiceStateEvent, VoiceStateIntent,
};
use accord_core::{GatewayFrame, GatewayOpcode, Liveness, GATEWAY_VERSION};
use accord_transport::{
    TransportEvent, TransportReceiver, TransportSender, WebSocketHandle, WebSocketReceiver,
    WebSocketTransport,
};
use accord_voice::{AudioSource, VoiceConfig, VoiceHandle};

use crate::error::{GatewayError, Result};
use crate::events::GatewayEvent;
use crate::heartbeat::{spawn_heartbeat, HeartbeatStop};
use crate::session::{HandshakePlan, SessionState};

/// Default delay before a scheduled reconnect
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(500);

const DEFAULT_URL: &str = "wss://gateway.example.com";

/// Gateway client configuration
#[derive(Debug, Clone)]
pub struct GatewayBuilder {
    token: Option<String>,
    intents: u64,
    url: String,
    reconnect_delay: Duration,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self {
            token: None,
            intents: 0,
            url: DEFAULT_URL.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn intents(mut self, intents: u64) -> Self {
        self.intents = intents;
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Connect to the gateway and spawn the engine task
    pub async fn connect(self, bus: Arc<MessageBus>) -> Result<Gateway> {
        let token = self.token.ok_or(GatewayError::MissingConfig("token"))?;
        Gateway::connect(
            Config {
                token,
                intents: self.intents,
                url: self.url,
                reconnect_delay: self.reconnect_delay,
            },
            bus,
        )
        .await
    }
}

#[derive(Debug, Clone)]
struct Config {
    token: String,
    intents: u64,
    url: String,
    reconnect_delay: Duration,
}

pub(crate) enum Command {
    JoinVoice {
        guild_id: String,
        channel_id: String,
        result: Option<PendingHandle>,
    },
    LeaveVoice {
        guild_id: String,
        result: Option<PendingHandle>,
    },
    UpdatePresence {
        presence: Value,
        result: Option<PendingHandle>,
    },
    Play {
        guild_id: String,
        source: Box<dyn AudioSource>,
    },
    /// Reconnect now (usually the tail of a scheduled delayed reconnect)
    Reconnect,
    /// The heartbeat task found the connection dead
    ConnectionDead,
    Quit,
}

/// Handle to a running gateway engine
pub struct Gateway {
    bus: Arc<MessageBus>,
    commands: mpsc::UnboundedSender<Command>,
    task: Mutex<Option<JoinHandle<()>>>,
    voice: Arc<DashMap<String, Arc<VoiceHandle>>>,
    guilds: Arc<DashMap<String, Value>>,
    users: Arc<DashMap<String, Value>>,
}

impl Gateway {
    async fn connect(config: Config, bus: Arc<MessageBus>) -> Result<Self> {
        let (ws, receiver) = WebSocketTransport::connect(&config.url).await?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let voice = Arc::new(DashMap::new());
        let guilds = Arc::new(DashMap::new());
        let users = Arc::new(DashMap::new());

        subscribe_intents(&bus, cmd_tx.clone());

        let runner = Runner {
            config,
            bus: bus.clone(),
            ws: Arc::new(ws),
            commands: cmd_tx.clone(),
            state: Arc::new(Mutex::new(SessionState::new())),
            liveness: Arc::new(Mutex::new(Liveness::new())),
            heartbeat: None,
            voice: voice.clone(),
            guilds: guilds.clone(),
            users: users.clone(),
            queued_sources: HashMap::new(),
            pending_joins: HashMap::new(),
            own_user_id: None,
            dead: false,
        };

        let task = tokio::spawn(runner.run(receiver, cmd_rx));

        Ok(Self {
            bus,
            commands: cmd_tx,
            task: Mutex::new(Some(task)),
            voice,
            guilds,
            users,
        })
    }

    /// Request to join (or move to) a voice channel; the returned handle
    /// resolves once the voice session is connected
    pub fn join_voice(&self, guild_id: &str, channel_id: &str) -> PendingHandle {
        self.bus.request(
            EventKind::JoinVoice,
            Payload::Json(json!({ "guild_id": guild_id, "channel_id": channel_id })),
        )
    }

    /// Request to leave a guild's voice channel
    pub fn leave_voice(&self, guild_id: &str) -> PendingHandle {
        self.bus.request(
            EventKind::LeaveVoice,
            Payload::Json(json!({ "guild_id": guild_id })),
        )
    }

    /// Request a presence update
    pub fn update_presence(&self, presence: Value) -> PendingHandle {
        self.bus
            .request(EventKind::UpdatePresence, Payload::Json(presence))
    }

    /// Play a source in a guild's voice session; queued until the session
    /// is up if the join is still in flight
    pub fn play(&self, guild_id: &str, source: Box<dyn AudioSource>) {
        let _ = self.commands.send(Command::Play {
            guild_id: guild_id.to_string(),
            source,
        });
    }

    /// The live voice session for a guild, if any
    pub fn voice(&self, guild_id: &str) -> Option<Arc<VoiceHandle>> {
        self.voice.get(guild_id).map(|entry| entry.value().clone())
    }

    /// Cached guild record, as received on the wire
    pub fn guild(&self, guild_id: &str) -> Option<Value> {
        self.guilds.get(guild_id).map(|entry| entry.value().clone())
    }

    /// Cached user record, as received on the wire
    pub fn user(&self, user_id: &str) -> Option<Value> {
        self.users.get(user_id).map(|entry| entry.value().clone())
    }

    /// Shut the engine down: leave all voice sessions, stop the heartbeat,
    /// close the socket, clear session-scoped caches
    pub async fn quit(&self) {
        let _ = self.commands.send(Command::Quit);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

/// Route the outbound-intent bus requests into the engine's command
/// channel; the engine is the sole responder for these kinds
fn subscribe_intents(bus: &Arc<MessageBus>, commands: mpsc::UnboundedSender<Command>) {
    let tx = commands.clone();
    bus.subscribe(EventKind::JoinVoice, move |event| {
        let result = event.result.take();
        match parse_join(&event.payload) {
            Some((guild_id, channel_id)) => forward(
                &tx,
                Command::JoinVoice {
                    guild_id,
                    channel_id,
                    result,
                },
            ),
            None => reject(result, "malformed join request"),
        }
        event.mark_handled();
    });

    let tx = commands.clone();
    bus.subscribe(EventKind::LeaveVoice, move |event| {
        let result = event.result.take();
        match field(&event.payload, "guild_id") {
            Some(guild_id) => forward(&tx, Command::LeaveVoice { guild_id, result }),
            None => reject(result, "malformed leave request"),
        }
        event.mark_handled();
    });

    let tx = commands.clone();
    bus.subscribe(EventKind::UpdatePresence, move |event| {
        let result = event.result.take();
        match event.payload.as_json() {
            Some(presence) => forward(
                &tx,
                Command::UpdatePresence {
                    presence: presence.clone(),
                    result,
                },
            ),
            None => reject(result, "malformed presence request"),
        }
        event.mark_handled();
    });

    let tx = commands;
    bus.subscribe(EventKind::GatewayReconnect, move |event| {
        let _ = tx.send(Command::Reconnect);
        event.mark_handled();
    });
}

/// Hand a command to the engine task; if the engine is already gone the
/// attached handle is rejected instead of silently dropped
fn forward(tx: &mpsc::UnboundedSender<Command>, command: Command) {
    if let Err(err) = tx.send(command) {
        let result = match err.0 {
            Command::JoinVoice { result, .. }
            | Command::LeaveVoice { result, .. }
            | Command::UpdatePresence { result, .. } => result,
            _ => None,
        };
        reject(result, "gateway engine is shut down");
    }
}

fn parse_join(payload: &Payload) -> Option<(String, String)> {
    let json = payload.as_json()?;
    Some((
        json.get("guild_id")?.as_str()?.to_string(),
        json.get("channel_id")?.as_str()?.to_string(),
    ))
}

fn field(payload: &Payload, name: &str) -> Option<String> {
    Some(payload.as_json()?.get(name)?.as_str()?.to_string())
}

fn reject(result: Option<PendingHandle>, reason: &str) {
    if let Some(handle) = result {
        handle.reject(reason);
    }
}

fn resolve(result: Option<PendingHandle>) {
    if let Some(handle) = result {
        handle.resolve(Payload::None);
    }
}

/// A voice join waiting for its two dispatches
///
/// The session id arrives in our own `VOICE_STATE_UPDATE`, the server
/// assignment in `VOICE_SERVER_UPDATE`; the voice engine spawns once both
/// are in hand.
#[derive(Default)]
struct PendingJoin {
    result: Option<PendingHandle>,
    session_id: Option<String>,
    server: Option<VoiceServerUpdate>,
}

struct Runner {
    config: Config,
    bus: Arc<MessageBus>,
    ws: Arc<WebSocketHandle>,
    commands: mpsc::UnboundedSender<Command>,
    state: Arc<Mutex<SessionState>>,
    liveness: Arc<Mutex<Liveness>>,
    heartbeat: Option<HeartbeatStop>,
    voice: Arc<DashMap<String, Arc<VoiceHandle>>>,
    guilds: Arc<DashMap<String, Value>>,
    users: Arc<DashMap<String, Value>>,
    /// Sources handed over before their voice session was up
    queued_sources: HashMap<String, Box<dyn AudioSource>>,
    pending_joins: HashMap<String, PendingJoin>,
    own_user_id: Option<String>,
    /// Set between connection loss and the next successful reconnect; the
    /// stale receiver is not polled while this holds
    dead: bool,
}

impl Runner {
    async fn run(
        mut self,
        mut receiver: WebSocketReceiver,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        loop {
            tokio::select! {
                event = receiver.recv(), if !self.dead => match event {
                    Some(TransportEvent::Text(text)) => {
                        if let Err(e) = self.handle_frame(&text).await {
                            warn!("dropping bad gateway frame: {}", e);
                        }
                    }
                    Some(TransportEvent::Connected) => {}
                    Some(TransportEvent::Error(e)) => {
                        error!("gateway socket error: {}", e);
                    }
                    Some(TransportEvent::Disconnected { reason }) => {
                        warn!("gateway socket dropped: {:?}", reason);
                        self.on_connection_dead().await;
                    }
                    None => {
                        self.on_connection_dead().await;
                    }
                },
                cmd = commands.recv() => match cmd {
                    Some(Command::JoinVoice { guild_id, channel_id, result }) => {
                        self.on_join_voice(guild_id, channel_id, result).await;
                    }
                    Some(Command::LeaveVoice { guild_id, result }) => {
                        self.on_leave_voice(guild_id, result).await;
                    }
                    Some(Command::UpdatePresence { presence, result }) => {
                        self.on_update_presence(presence, result).await;
                    }
                    Some(Command::Play { guild_id, source }) => {
                        self.on_play(guild_id, source);
                    }
                    Some(Command::Reconnect) => {
                        if let Some(rx) = self.reconnect().await {
                            receiver = rx;
                        }
                    }
                    Some(Command::ConnectionDead) => {
                        self.on_connection_dead().await;
                    }
                    Some(Command::Quit) | None => break,
                },
            }
        }

        self.shut_down().await;
    }

    async fn shut_down(&mut self) {
        self.teardown_voice().await;
        self.stop_heartbeat().await;
        let _ = self.ws.close().await;

        self.state.lock().clear();
        self.guilds.clear();
        self.users.clear();
        self.queued_sources.clear();
        for (_, pending) in self.pending_joins.drain() {
            reject(pending.result, "engine shut down");
        }

        self.bus.post(EventKind::GatewayDisconnected, Payload::None);
        info!("gateway engine shut down");
    }

    async fn handle_frame(&mut self, text: &str) -> Result<()> {
        let frame = GatewayFrame::parse(text)?;
        match frame.opcode()? {
            GatewayOpcode::Dispatch => {
                self.state.lock().observe_seq(frame.s);
                let name = frame.t.as_deref().unwrap_or("");
                let event = GatewayEvent::decode(name, frame.d)?;
                self.handle_event(&event).await;
                self.bus
                    .post(EventKind::GatewayDispatch, Payload::any(event));
            }
            GatewayOpcode::Hello => {
                let hello: Hello = serde_json::from_value(frame.d)
                    .map_err(accord_core::Error::from)?;
                self.send_handshake().await?;
                self.start_heartbeat(Duration::from_millis(hello.heartbeat_interval));
            }
            GatewayOpcode::Heartbeat => {
                // The server may ask for an immediate beat
                let beat = GatewayFrame::heartbeat(self.state.lock().last_seq());
                self.send_frame(&beat).await?;
            }
            GatewayOpcode::HeartbeatAck => {
                self.liveness.lock().on_ack();
            }
            GatewayOpcode::Reconnect => {
                info!("server requested reconnect");
                self.on_connection_dead().await;
            }
            GatewayOpcode::InvalidSession => {
                // Same recovery as a Reconnect: restart the socket and let
                // the delayed retry decide Identify vs Resume from the
                // (possibly cleared) stored session
                let resumable = frame.d.as_bool().unwrap_or(false);
                warn!("invalid session (resumable: {})", resumable);
                self.state.lock().on_invalid_session(resumable);
                self.on_connection_dead().await;
            }
            other => {
                debug!("ignoring gateway opcode {:?}", other);
            }
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: &GatewayEvent) {
        match event {
            GatewayEvent::Ready(ready) => self.on_ready(ready),
            GatewayEvent::Resumed => {
                info!("gateway session resumed");
            }
            GatewayEvent::GuildCreate(guild) => {
                if let Some(id) = guild.get("id").and_then(Value::as_str) {
                    self.guilds.insert(id.to_string(), guild.clone());
                }
            }
            GatewayEvent::MessageCreate(message) => {
                if let Some(author) = message.get("author") {
                    if let Some(id) = author.get("id").and_then(Value::as_str) {
                        self.users.insert(id.to_string(), author.clone());
                    }
                }
            }
            GatewayEvent::VoiceStateUpdate(update) => {
                self.on_voice_state(update).await;
            }
            GatewayEvent::VoiceServerUpdate(update) => {
                self.on_voice_server(update).await;
            }
            GatewayEvent::Unknown { name, .. } => {
                debug!("republishing unhandled dispatch {}", name);
            }
        }
    }

    fn on_ready(&mut self, ready: &ReadyEvent) {
        self.state.lock().on_ready(ready.session_id.clone());
        if let Some(id) = ready.user.get("id").and_then(Value::as_str) {
            self.own_user_id = Some(id.to_string());
            self.users.insert(id.to_string(), ready.user.clone());
        }
        for guild in &ready.guilds {
            if let Some(id) = guild.get("id").and_then(Value::as_str) {
                self.guilds.insert(id.to_string(), guild.clone());
            }
        }
        info!(
            "gateway ready, session {}, {} guild(s)",
            ready.session_id,
            ready.guilds.len()
        );
    }

    /// Our own voice state carries the session id half of a pending join
    async fn on_voice_state(&mut self, update: &VoiceStateEvent) {
        if self.own_user_id.as_deref() != Some(update.user_id.as_str()) {
            return;
        }
        let Some(guild_id) = update.guild_id.clone() else {
            return;
        };
        if update.channel_id.is_none() {
            debug!("own voice state cleared for guild {}", guild_id);
            return;
        }

        self.pending_joins
            .entry(guild_id.clone())
            .or_default()
            .session_id = Some(update.session_id.clone());
        self.try_spawn_voice(&guild_id).await;
    }

    /// The server assignment half of a pending join
    async fn on_voice_server(&mut self, update: &VoiceServerUpdate) {
        if update.endpoint.is_none() {
            // No endpoint yet; the server re-sends once one is allocated
            debug!("voice server update without endpoint for {}", update.guild_id);
            return;
        }
        let guild_id = update.guild_id.clone();
        self.pending_joins
            .entry(guild_id.clone())
            .or_default()
            .server = Some(update.clone());
        self.try_spawn_voice(&guild_id).await;
    }

    /// Spawn the voice engine once session id and server assignment are
    /// both in hand
    async fn try_spawn_voice(&mut self, guild_id: &str) {
        let Some(own_user_id) = self.own_user_id.clone() else {
            return;
        };
        let ready = {
            let Some(pending) = self.pending_joins.get(guild_id) else {
                return;
            };
            pending.session_id.is_some() && pending.server.is_some()
        };
        if !ready {
            return;
        }

        let pending = match self.pending_joins.remove(guild_id) {
            Some(pending) => pending,
            None => return,
        };
        let session_id = match pending.session_id {
            Some(session_id) => session_id,
            None => return,
        };
        let server = match pending.server {
            Some(server) => server,
            None => return,
        };
        let endpoint = match server.endpoint {
            Some(endpoint) => endpoint,
            None => return,
        };

        // A move between channels replaces the old session
        if let Some((_, old)) = self.voice.remove(guild_id) {
            old.leave().await;
        }

        let config = VoiceConfig {
            guild_id: guild_id.to_string(),
            user_id: own_user_id,
            session_id,
            token: server.token,
            endpoint,
        };

        match VoiceHandle::connect(config, self.bus.clone()).await {
            Ok(handle) => {
                let handle = Arc::new(handle);
                if let Some(source) = self.queued_sources.remove(guild_id) {
                    handle.play(source);
                }
                self.voice.insert(guild_id.to_string(), handle);
                info!("voice session up for guild {}", guild_id);
                resolve(pending.result);
            }
            Err(e) => {
                error!("voice connect failed for guild {}: {}", guild_id, e);
                reject(pending.result, &e.to_string());
            }
        }
    }

    async fn on_join_voice(
        &mut self,
        guild_id: String,
        channel_id: String,
        result: Option<PendingHandle>,
    ) {
        let intent = VoiceStateIntent {
            guild_id: guild_id.clone(),
            channel_id: Some(channel_id),
            self_mute: false,
            self_deaf: false,
        };
        let frame = match GatewayFrame::voice_state_update(&intent) {
            Ok(frame) => frame,
            Err(e) => {
                reject(result, &e.to_string());
                return;
            }
        };

        if let Err(e) = self.send_frame(&frame).await {
            reject(result, &e.to_string());
            return;
        }

        // The join completes when both voice dispatches have arrived
        let pending = self.pending_joins.entry(guild_id).or_default();
        if let Some(result) = result {
            if let Some(stale) = pending.result.replace(result) {
                stale.reject("superseded by a newer join");
            }
        }
    }

    async fn on_leave_voice(&mut self, guild_id: String, result: Option<PendingHandle>) {
        let intent = VoiceStateIntent {
            guild_id: guild_id.clone(),
            channel_id: None,
            self_mute: false,
            self_deaf: false,
        };
        match GatewayFrame::voice_state_update(&intent) {
            Ok(frame) => {
                if let Err(e) = self.send_frame(&frame).await {
                    warn!("failed to send leave intent: {}", e);
                }
            }
            Err(e) => warn!("failed to encode leave intent: {}", e),
        }

        self.queued_sources.remove(&guild_id);
        if let Some(pending) = self.pending_joins.remove(&guild_id) {
            reject(pending.result, "left before the join completed");
        }

        match self.voice.remove(&guild_id) {
            Some((_, handle)) => {
                handle.leave().await;
                resolve(result);
            }
            None => reject(result, "no voice session for that guild"),
        }
    }

    async fn on_update_presence(&mut self, presence: Value, result: Option<PendingHandle>) {
        let frame = GatewayFrame::presence_update(&presence);
        match self.send_frame(&frame).await {
            Ok(()) => resolve(result),
            Err(e) => reject(result, &e.to_string()),
        }
    }

    fn on_play(&mut self, guild_id: String, source: Box<dyn AudioSource>) {
        match self.voice.get(&guild_id) {
            Some(handle) => handle.play(source),
            None => {
                debug!("no voice session for {}, queueing source", guild_id);
                self.queued_sources.insert(guild_id, source);
            }
        }
    }

    async fn send_frame(&self, frame: &GatewayFrame) -> Result<()> {
        self.ws.send(frame.encode()?).await?;
        Ok(())
    }

    /// Identify on a fresh session, Resume when one is stored
    async fn send_handshake(&mut self) -> Result<()> {
        let frame = match self.state.lock().plan() {
            HandshakePlan::Identify => GatewayFrame::identify(&Identify {
                token: self.config.token.clone(),
                intents: self.config.intents,
                properties: IdentifyProperties::default(),
                version: GATEWAY_VERSION,
                compress: None,
            })?,
            HandshakePlan::Resume { session_id, seq } => GatewayFrame::resume(&Resume {
                token: self.config.token.clone(),
                session_id,
                seq,
            })?,
        };
        self.send_frame(&frame).await
    }

    fn start_heartbeat(&mut self, interval: Duration) {
        self.liveness.lock().on_ack();
        self.heartbeat = Some(spawn_heartbeat(
            self.ws.clone(),
            interval,
            self.liveness.clone(),
            self.state.clone(),
            self.commands.clone(),
        ));
    }

    async fn stop_heartbeat(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.shut_down().await;
        }
    }

    /// Dead connection: stop everything session-scoped that depends on the
    /// socket, then schedule the reconnect through the bus so recovery is
    /// observable and delayed like any other event
    async fn on_connection_dead(&mut self) {
        if self.dead {
            return;
        }
        self.dead = true;
        self.stop_heartbeat().await;
        let _ = self.ws.close().await;
        self.teardown_voice().await;

        self.bus.post_delayed(
            EventKind::GatewayReconnect,
            Payload::None,
            self.config.reconnect_delay,
        );
    }

    async fn teardown_voice(&mut self) {
        let guilds: Vec<String> = self.voice.iter().map(|e| e.key().clone()).collect();
        for guild_id in guilds {
            if let Some((_, handle)) = self.voice.remove(&guild_id) {
                handle.leave().await;
            }
        }
        for (_, pending) in self.pending_joins.drain() {
            reject(pending.result, "connection lost");
        }
    }

    /// The delayed-reconnect tail: open a new socket; the stored session
    /// id makes the next Hello handshake a Resume
    async fn reconnect(&mut self) -> Option<WebSocketReceiver> {
        info!("reconnecting to {}", self.config.url);
        match WebSocketTransport::connect(&self.config.url).await {
            Ok((ws, receiver)) => {
                self.ws = Arc::new(ws);
                self.liveness.lock().on_ack();
                self.dead = false;
                Some(receiver)
            }
            Err(e) => {
                warn!("reconnect failed, rescheduling: {}", e);
                self.bus.post_delayed(
                    EventKind::GatewayReconnect,
                    Payload::None,
                    self.config.reconnect_delay,
                );
                None
            }
        }
    }
}
