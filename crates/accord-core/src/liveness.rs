//! Heartbeat liveness tracking
//!
//! Both control planes share the same contract: each heartbeat must be
//! acknowledged before the next one is due, else the connection is dead.
//! This is kept as pure state so the engines' heartbeat tasks stay trivially
//! testable.

/// What the heartbeat task should do on its next tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a heartbeat frame
    Beat,
    /// The previous heartbeat was never acknowledged: the connection is
    /// dead and a reconnect must be triggered
    Reconnect,
}

/// Liveness flag for one heartbeat loop
#[derive(Debug, Default)]
pub struct Liveness {
    awaiting_ack: bool,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an inbound heartbeat-ack frame
    pub fn on_ack(&mut self) {
        self.awaiting_ack = false;
    }

    /// Decide the action for this interval tick
    ///
    /// Returns [`HeartbeatAction::Reconnect`] at most once per missed ack:
    /// the miss is consumed, so a second trigger requires a new unanswered
    /// beat.
    pub fn tick(&mut self) -> HeartbeatAction {
        if self.awaiting_ack {
            self.awaiting_ack = false;
            HeartbeatAction::Reconnect
        } else {
            self.awaiting_ack = true;
            HeartbeatAction::Beat
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acked_beats_never_reconnect() {
        let mut liveness = Liveness::new();
        for _ in 0..10 {
            assert_eq!(liveness.tick(), HeartbeatAction::Beat);
            liveness.on_ack();
        }
    }

    #[test]
    fn missed_ack_reconnects_exactly_once() {
        let mut liveness = Liveness::new();
        assert_eq!(liveness.tick(), HeartbeatAction::Beat);
        // No ack arrives
        assert_eq!(liveness.tick(), HeartbeatAction::Reconnect);
        // The miss was consumed; the next tick is a fresh beat
        assert_eq!(liveness.tick(), HeartbeatAction::Beat);
    }
}
