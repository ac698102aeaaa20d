//! Accord Transport
//!
//! Client-side transports for the two wire protocols: WebSocket for the
//! control planes (gateway and voice signalling, JSON text frames) and UDP
//! for the voice data plane (raw datagrams).
//!
//! Both transports decouple socket I/O from their consumers: a writer task
//! drains an mpsc channel onto the socket, a reader task publishes
//! [`TransportEvent`]s. Inbound frames are therefore processed strictly in
//! arrival order by whoever owns the receiver.

pub mod error;
pub mod traits;
pub mod udp;
pub mod websocket;

pub use error::{Result, TransportError};
pub use traits::{TransportEvent, TransportReceiver, TransportSender};
pub use udp::UdpTransport;
pub use websocket::{WebSocketHandle, WebSocketReceiver, WebSocketTransport};
