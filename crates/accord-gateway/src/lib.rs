//! Accord Gateway
//!
//! The gateway session engine: one persistent WebSocket per account over
//! which the platform pushes state and the client declares intent.
//!
//! Lifecycle:
//!
//! ```text
//! Disconnected ──connect──► Connecting ──Hello──► Identifying/Resuming
//!                                                       │ READY/RESUMED
//!       ▲                                               ▼
//!       └────────quit()────────  Reconnecting  ◄──loss── Live
//!                                      └──delayed retry──►
//! ```
//!
//! Identify vs Resume is decided solely by whether a session id survives
//! from a previous connection ([`session`]). Inbound dispatches update the
//! replay cursor, are decoded into [`GatewayEvent`]s, and are republished
//! on the bus; voice server assignments spawn `accord-voice` engines.
//! Outbound intent (presence, voice join/leave) arrives as bus requests
//! for which the engine is the sole responder.

pub mod client;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod session;

pub use client::{Gateway, GatewayBuilder};
pub use error::{GatewayError, Result};
pub use events::GatewayEvent;
pub use session::{HandshakePlan, SessionState};
