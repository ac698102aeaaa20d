//! Bus event types

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::pending::PendingHandle;

/// Event kind tag
///
/// Poster and subscriber agree on the payload shape carried under each kind
/// out of band; the bus never inspects payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A decoded gateway dispatch, republished for the host application
    GatewayDispatch,
    /// The gateway connection died; a reconnect should be attempted
    GatewayReconnect,
    /// The gateway session was terminated
    GatewayDisconnected,
    /// Request: join (or move to) a voice channel
    JoinVoice,
    /// Request: leave a voice channel
    LeaveVoice,
    /// Request: update presence on the gateway
    UpdatePresence,
    /// A voice session finished (or was stopped) playing a source
    PlaybackFinished,
    /// Host-application defined kind
    User(u32),
}

/// Event payload: a tagged union keyed by [`EventKind`]
#[derive(Clone)]
pub enum Payload {
    None,
    Text(String),
    Json(serde_json::Value),
    /// Typed payload; accessor agreed out of band per event kind
    Any(Arc<dyn Any + Send + Sync>),
}

impl Payload {
    /// Wrap a typed payload
    pub fn any<T: Any + Send + Sync>(value: T) -> Self {
        Payload::Any(Arc::new(value))
    }

    /// Typed accessor for [`Payload::Any`]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Payload::Any(inner) => inner.clone().downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Accessor for [`Payload::Json`]
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Accessor for [`Payload::Text`]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::None => write!(f, "None"),
            Payload::Text(t) => f.debug_tuple("Text").field(t).finish(),
            Payload::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Payload::Any(_) => write!(f, "Any(..)"),
        }
    }
}

/// One bus event
///
/// Created by a producer, consumed exactly once by the delivery loop (or by
/// [`MessageBus::send`](crate::MessageBus::send) on the calling task), then
/// discarded.
#[derive(Debug)]
pub struct BusEvent {
    pub kind: EventKind,
    pub payload: Payload,
    /// Once set, no further callbacks run for this event
    handled: bool,
    /// Creation time; dispatch is not eligible before `created + delay`
    created: Instant,
    delay: Duration,
    /// Attached request handle, if this event is a request
    pub result: Option<PendingHandle>,
}

impl BusEvent {
    /// Create an immediately-deliverable event
    pub fn new(kind: EventKind, payload: Payload) -> Self {
        Self {
            kind,
            payload,
            handled: false,
            created: Instant::now(),
            delay: Duration::ZERO,
            result: None,
        }
    }

    /// Create an event not eligible for dispatch before `delay` elapses
    pub fn delayed(kind: EventKind, payload: Payload, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(kind, payload)
        }
    }

    /// Mark the event handled, short-circuiting further dispatch
    pub fn mark_handled(&mut self) {
        self.handled = true;
    }

    pub fn is_handled(&self) -> bool {
        self.handled
    }

    /// Time left until the event becomes eligible, `None` if due
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let due = self.created + self.delay;
        if now >= due {
            None
        } else {
            Some(due - now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::PendingResult;

    #[test]
    fn events_format_without_exposing_internals() {
        let mut event = BusEvent::new(EventKind::JoinVoice, Payload::Text("c1".into()));
        event.result = Some(PendingResult::new());

        let text = format!("{:?}", event);
        assert!(text.contains("JoinVoice"));
        assert!(text.contains("PendingResult"));
    }
}
