//! JSON payload types for the gateway and voice control planes
//!
//! Both planes speak JSON text frames of the shape
//! `{"op": <int>, "d": <payload>, ...}`; the gateway additionally carries a
//! sequence number `s` and an event name `t` on dispatch frames.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::opcode::{GatewayOpcode, VoiceOpcode};

/// One gateway control frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayFrame {
    /// Parse a frame from WebSocket text
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Encode this frame to WebSocket text
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// The frame's opcode, if assigned on this plane
    pub fn opcode(&self) -> Result<GatewayOpcode> {
        GatewayOpcode::from_u8(self.op).ok_or(Error::UnknownGatewayOpcode(self.op))
    }

    fn new(op: GatewayOpcode, d: Value) -> Self {
        Self {
            op: op as u8,
            d,
            s: None,
            t: None,
        }
    }

    /// Heartbeat carrying the last seen sequence number (`null` if unset)
    pub fn heartbeat(last_seq: Option<u64>) -> Self {
        Self::new(GatewayOpcode::Heartbeat, json!(last_seq))
    }

    pub fn identify(identify: &Identify) -> Result<Self> {
        Ok(Self::new(
            GatewayOpcode::Identify,
            serde_json::to_value(identify)?,
        ))
    }

    pub fn resume(resume: &Resume) -> Result<Self> {
        Ok(Self::new(
            GatewayOpcode::Resume,
            serde_json::to_value(resume)?,
        ))
    }

    pub fn presence_update(presence: &Value) -> Self {
        Self::new(GatewayOpcode::PresenceUpdate, presence.clone())
    }

    /// Voice-channel join/leave intent (`channel_id: None` leaves)
    pub fn voice_state_update(update: &VoiceStateIntent) -> Result<Self> {
        Ok(Self::new(
            GatewayOpcode::VoiceStateUpdate,
            serde_json::to_value(update)?,
        ))
    }
}

/// One voice control frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceFrame {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
}

impl VoiceFrame {
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn opcode(&self) -> Result<VoiceOpcode> {
        VoiceOpcode::from_u8(self.op).ok_or(Error::UnknownVoiceOpcode(self.op))
    }

    pub fn new(op: VoiceOpcode, d: Value) -> Self {
        Self { op: op as u8, d }
    }

    pub fn heartbeat(nonce: u64) -> Self {
        Self::new(VoiceOpcode::Heartbeat, json!(nonce))
    }

    pub fn speaking(speaking: bool, ssrc: u32) -> Self {
        Self::new(
            VoiceOpcode::Speaking,
            json!({ "speaking": speaking, "delay": 0, "ssrc": ssrc }),
        )
    }
}

/// Gateway identify payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identify {
    pub token: String,
    pub intents: u64,
    pub properties: IdentifyProperties,
    /// Requested protocol version ([`crate::GATEWAY_VERSION`])
    #[serde(rename = "v")]
    pub version: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compress: Option<bool>,
}

/// Connection properties reported at identify
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "accord".to_string(),
            device: "accord".to_string(),
        }
    }
}

/// Gateway resume payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resume {
    pub token: String,
    pub session_id: String,
    pub seq: Option<u64>,
}

/// Gateway hello payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

/// `READY` dispatch payload (fields we consume)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyEvent {
    pub session_id: String,
    #[serde(default)]
    pub user: Value,
    #[serde(default)]
    pub guilds: Vec<Value>,
}

/// Outbound voice-channel join/leave intent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceStateIntent {
    pub guild_id: String,
    pub channel_id: Option<String>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

/// `VOICE_STATE_UPDATE` dispatch payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceStateEvent {
    #[serde(default)]
    pub guild_id: Option<String>,
    pub user_id: String,
    pub session_id: String,
    #[serde(default)]
    pub channel_id: Option<String>,
}

/// `VOICE_SERVER_UPDATE` dispatch payload: the per-call server assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceServerUpdate {
    pub token: String,
    pub guild_id: String,
    pub endpoint: Option<String>,
}

/// Voice identify payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceIdentify {
    pub server_id: String,
    pub user_id: String,
    pub session_id: String,
    pub token: String,
}

/// Voice resume payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceResume {
    pub server_id: String,
    pub session_id: String,
    pub token: String,
}

/// Voice hello payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceHello {
    pub heartbeat_interval: u64,
}

/// Voice ready payload: UDP endpoint and stream assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceReady {
    pub ssrc: u32,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub modes: Vec<String>,
}

/// Select Protocol payload sent after IP discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectProtocol {
    pub protocol: String,
    pub data: SelectProtocolData,
}

/// Discovered external address plus chosen encryption mode
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectProtocolData {
    pub address: String,
    pub port: u16,
    pub mode: String,
}

/// Session Description payload carrying the shared secret key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDescription {
    pub mode: String,
    pub secret_key: Vec<u8>,
}

impl SessionDescription {
    /// The secret key as a fixed-width array
    pub fn key(&self) -> Result<[u8; 32]> {
        self.secret_key
            .as_slice()
            .try_into()
            .map_err(|_| Error::InvalidKeyLength(self.secret_key.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_frame_parses_seq_and_name() {
        let text = r#"{"op":0,"d":{"session_id":"abc"},"s":42,"t":"READY"}"#;
        let frame = GatewayFrame::parse(text).unwrap();
        assert_eq!(frame.opcode().unwrap(), GatewayOpcode::Dispatch);
        assert_eq!(frame.s, Some(42));
        assert_eq!(frame.t.as_deref(), Some("READY"));

        let ready: ReadyEvent = serde_json::from_value(frame.d).unwrap();
        assert_eq!(ready.session_id, "abc");
    }

    #[test]
    fn heartbeat_carries_null_when_unset() {
        let frame = GatewayFrame::heartbeat(None);
        assert_eq!(frame.encode().unwrap(), r#"{"op":1,"d":null}"#);

        let frame = GatewayFrame::heartbeat(Some(0));
        assert_eq!(frame.encode().unwrap(), r#"{"op":1,"d":0}"#);
    }

    #[test]
    fn identify_announces_the_protocol_version() {
        let frame = GatewayFrame::identify(&Identify {
            token: "t".into(),
            intents: 0,
            properties: IdentifyProperties::default(),
            version: crate::GATEWAY_VERSION,
            compress: None,
        })
        .unwrap();
        assert_eq!(frame.d["v"], u64::from(crate::GATEWAY_VERSION));
        assert_eq!(frame.d["token"], "t");
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        let frame = GatewayFrame::parse(r#"{"op":42,"d":null}"#).unwrap();
        assert!(matches!(
            frame.opcode(),
            Err(Error::UnknownGatewayOpcode(42))
        ));
    }

    #[test]
    fn session_description_rejects_short_key() {
        let desc = SessionDescription {
            mode: "xchacha20_poly1305".into(),
            secret_key: vec![0u8; 16],
        };
        assert!(matches!(desc.key(), Err(Error::InvalidKeyLength(16))));
    }

    #[test]
    fn voice_speaking_frame_shape() {
        let frame = VoiceFrame::speaking(true, 7);
        let text = frame.encode().unwrap();
        let back = VoiceFrame::parse(&text).unwrap();
        assert_eq!(back.opcode().unwrap(), VoiceOpcode::Speaking);
        assert_eq!(back.d["ssrc"], 7);
        assert_eq!(back.d["speaking"], true);
    }
}
