//! External address discovery over the voice UDP socket
//!
//! Discovery datagram (74 bytes, both directions):
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ Byte 0-1:   Type (uint16 big-endian, 0x1 = request,        │
//! │             0x2 = response)                                │
//! │ Byte 2-3:   Length (uint16 big-endian, 70)                 │
//! │ Byte 4-7:   SSRC (uint32 big-endian)                       │
//! │ Byte 8-71:  Address (NUL-terminated ASCII, response only)  │
//! │ Byte 72-73: Port (uint16 big-endian, response only)        │
//! └────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;
use tracing::debug;

use accord_core::error::Error as CoreError;
use accord_transport::UdpTransport;

use crate::error::{Result, VoiceError};

/// Total discovery datagram length
pub const DISCOVERY_LEN: usize = 74;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the discovery request for a stream
pub fn discovery_request(ssrc: u32) -> [u8; DISCOVERY_LEN] {
    let mut buf = [0u8; DISCOVERY_LEN];
    buf[0..2].copy_from_slice(&0x1u16.to_be_bytes());
    buf[2..4].copy_from_slice(&70u16.to_be_bytes());
    buf[4..8].copy_from_slice(&ssrc.to_be_bytes());
    buf
}

/// Parse the echoed external address out of a discovery response
pub fn parse_discovery_response(data: &[u8], ssrc: u32) -> Result<(String, u16)> {
    if data.len() != DISCOVERY_LEN {
        return Err(
            CoreError::MalformedDiscovery(format!("bad length {}", data.len())).into(),
        );
    }

    let echoed = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if echoed != ssrc {
        return Err(CoreError::MalformedDiscovery(format!(
            "ssrc mismatch: sent {ssrc}, got {echoed}"
        ))
        .into());
    }

    let addr_field = &data[8..72];
    let end = addr_field.iter().position(|&b| b == 0).unwrap_or(addr_field.len());
    let address = std::str::from_utf8(&addr_field[..end])
        .map_err(|_| CoreError::MalformedDiscovery("address not ascii".into()))?
        .to_string();
    if address.is_empty() {
        return Err(CoreError::MalformedDiscovery("empty address".into()).into());
    }

    let port = u16::from_be_bytes([data[72], data[73]]);
    Ok((address, port))
}

/// Run the discovery exchange on an open voice socket
pub async fn discover(udp: &UdpTransport, ssrc: u32) -> Result<(String, u16)> {
    let reply = udp
        .exchange(&discovery_request(ssrc), DISCOVERY_TIMEOUT)
        .await
        .map_err(VoiceError::Transport)?;

    let (address, port) = parse_discovery_response(&reply, ssrc)?;
    debug!("discovered external address {}:{}", address, port);
    Ok((address, port))
}
