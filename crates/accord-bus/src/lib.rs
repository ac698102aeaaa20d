//! Accord Bus
//!
//! The single point of asynchronous coordination between the gateway
//! engine, voice engines, and the host application. Transport tasks post
//! events here; subscribers react to them; callers turn fire-and-forget
//! transport traffic into blocking request/response calls via
//! [`PendingResult`].
//!
//! This crate provides:
//! - Fire-and-forget posting with optional delivery delay ([`MessageBus::post`],
//!   [`MessageBus::post_delayed`])
//! - Synchronous fan-out on the calling task ([`MessageBus::send`])
//! - Request/response handles ([`MessageBus::request`])
//! - Subscriber registration ([`MessageBus::subscribe`],
//!   [`MessageBus::subscribe_all`])

pub mod bus;
pub mod event;
pub mod pending;

pub use bus::{MessageBus, WORKER_NAP};
pub use event::{BusEvent, EventKind, Payload};
pub use pending::{PendingHandle, PendingResult, RequestError};
