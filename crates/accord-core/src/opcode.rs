//! Control-frame opcodes for both wire protocols

/// Gateway control-frame opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GatewayOpcode {
    Dispatch = 0,
    Heartbeat = 1,
    Identify = 2,
    PresenceUpdate = 3,
    VoiceStateUpdate = 4,
    Resume = 6,
    Reconnect = 7,
    InvalidSession = 9,
    Hello = 10,
    HeartbeatAck = 11,
}

impl GatewayOpcode {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(GatewayOpcode::Dispatch),
            1 => Some(GatewayOpcode::Heartbeat),
            2 => Some(GatewayOpcode::Identify),
            3 => Some(GatewayOpcode::PresenceUpdate),
            4 => Some(GatewayOpcode::VoiceStateUpdate),
            6 => Some(GatewayOpcode::Resume),
            7 => Some(GatewayOpcode::Reconnect),
            9 => Some(GatewayOpcode::InvalidSession),
            10 => Some(GatewayOpcode::Hello),
            11 => Some(GatewayOpcode::HeartbeatAck),
            _ => None,
        }
    }
}

/// Voice control-frame opcodes (over the per-call WebSocket)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VoiceOpcode {
    Identify = 0,
    SelectProtocol = 1,
    Ready = 2,
    Heartbeat = 3,
    SessionDescription = 4,
    Speaking = 5,
    HeartbeatAck = 6,
    Resume = 7,
    Hello = 8,
    Resumed = 9,
}

impl VoiceOpcode {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(VoiceOpcode::Identify),
            1 => Some(VoiceOpcode::SelectProtocol),
            2 => Some(VoiceOpcode::Ready),
            3 => Some(VoiceOpcode::Heartbeat),
            4 => Some(VoiceOpcode::SessionDescription),
            5 => Some(VoiceOpcode::Speaking),
            6 => Some(VoiceOpcode::HeartbeatAck),
            7 => Some(VoiceOpcode::Resume),
            8 => Some(VoiceOpcode::Hello),
            9 => Some(VoiceOpcode::Resumed),
            _ => None,
        }
    }
}
