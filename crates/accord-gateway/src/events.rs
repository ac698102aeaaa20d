//! Typed dispatch events
//!
//! Dispatch frames arrive as `(event name, JSON payload)`. The names the
//! engine itself consumes get typed payloads; everything else is
//! republished raw so host applications still see it.

use serde_json::Value;

use accord_core::payload::{ReadyEvent, VoiceServerUpdate, VoiceStateEvent};
use accord_core::Result;

/// One decoded gateway dispatch
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    Ready(ReadyEvent),
    Resumed,
    MessageCreate(Value),
    GuildCreate(Value),
    VoiceStateUpdate(VoiceStateEvent),
    VoiceServerUpdate(VoiceServerUpdate),
    /// Any dispatch the engine has no typed decoding for
    Unknown { name: String, data: Value },
}

impl GatewayEvent {
    /// Decode a dispatch by event name
    pub fn decode(name: &str, data: Value) -> Result<Self> {
        Ok(match name {
            "READY" => GatewayEvent::Ready(serde_json::from_value(data)?),
            "RESUMED" => GatewayEvent::Resumed,
            "MESSAGE_CREATE" => GatewayEvent::MessageCreate(data),
            "GUILD_CREATE" => GatewayEvent::GuildCreate(data),
            "VOICE_STATE_UPDATE" => {
                GatewayEvent::VoiceStateUpdate(serde_json::from_value(data)?)
            }
            "VOICE_SERVER_UPDATE" => {
                GatewayEvent::VoiceServerUpdate(serde_json::from_value(data)?)
            }
            _ => GatewayEvent::Unknown {
                name: name.to_string(),
                data,
            },
        })
    }

    /// The wire name of this event
    pub fn name(&self) -> &str {
        match self {
            GatewayEvent::Ready(_) => "READY",
            GatewayEvent::Resumed => "RESUMED",
            GatewayEvent::MessageCreate(_) => "MESSAGE_CREATE",
            GatewayEvent::GuildCreate(_) => "GUILD_CREATE",
            GatewayEvent::VoiceStateUpdate(_) => "VOICE_STATE_UPDATE",
            GatewayEvent::VoiceServerUpdate(_) => "VOICE_SERVER_UPDATE",
            GatewayEvent::Unknown { name, .. } => name,
        }
    }
}
