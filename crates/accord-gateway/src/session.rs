//! Pure gateway session state
//!
//! Everything the engine must remember across a socket loss to resume
//! instead of re-identifying. Deliberately free of I/O so the resume
//! decision and sequence tracking are testable in isolation.

/// What to send when the server says Hello
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakePlan {
    /// No stored session: authenticate from scratch
    Identify,
    /// A prior session exists: ask for event replay after `seq`
    Resume {
        session_id: String,
        seq: Option<u64>,
    },
}

/// Session identity and replay cursor
///
/// `last_seq` is `None` until the first sequenced dispatch arrives; zero is
/// a valid sequence number, so absence is tracked out of band rather than
/// with a sentinel value.
#[derive(Debug, Default)]
pub struct SessionState {
    session_id: Option<String>,
    last_seq: Option<u64>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the sequence number of a dispatch frame, if it carries one
    pub fn observe_seq(&mut self, seq: Option<u64>) {
        if let Some(seq) = seq {
            self.last_seq = Some(seq);
        }
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    /// Store the session id handed out in `READY`
    pub fn on_ready(&mut self, session_id: String) {
        self.session_id = Some(session_id);
    }

    /// Identify vs Resume, decided solely by the presence of a stored
    /// session id at Hello time
    pub fn plan(&self) -> HandshakePlan {
        match &self.session_id {
            Some(session_id) => HandshakePlan::Resume {
                session_id: session_id.clone(),
                seq: self.last_seq,
            },
            None => HandshakePlan::Identify,
        }
    }

    /// A non-resumable Invalid Session invalidates the stored id; a
    /// resumable one leaves it untouched
    pub fn on_invalid_session(&mut self, resumable: bool) {
        if !resumable {
            self.session_id = None;
            self.last_seq = None;
        }
    }

    /// Forget everything; the next handshake identifies from scratch
    pub fn clear(&mut self) {
        self.session_id = None;
        self.last_seq = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_identifies() {
        let state = SessionState::new();
        assert_eq!(state.plan(), HandshakePlan::Identify);
    }

    #[test]
    fn state_with_session_resumes_at_last_seq() {
        let mut state = SessionState::new();
        state.on_ready("sess-1".into());
        state.observe_seq(Some(9));

        assert_eq!(
            state.plan(),
            HandshakePlan::Resume {
                session_id: "sess-1".into(),
                seq: Some(9),
            }
        );
    }

    #[test]
    fn sequence_zero_is_a_valid_cursor() {
        let mut state = SessionState::new();
        state.on_ready("sess-1".into());
        state.observe_seq(Some(0));

        assert_eq!(
            state.plan(),
            HandshakePlan::Resume {
                session_id: "sess-1".into(),
                seq: Some(0),
            }
        );
    }

    #[test]
    fn unsequenced_frames_leave_the_cursor_alone() {
        let mut state = SessionState::new();
        state.observe_seq(Some(5));
        state.observe_seq(None);
        assert_eq!(state.last_seq(), Some(5));
    }

    #[test]
    fn resumable_invalid_session_keeps_the_id() {
        let mut state = SessionState::new();
        state.on_ready("sess-1".into());
        state.on_invalid_session(true);
        assert!(matches!(state.plan(), HandshakePlan::Resume { .. }));
    }

    #[test]
    fn non_resumable_invalid_session_forces_identify() {
        let mut state = SessionState::new();
        state.on_ready("sess-1".into());
        state.observe_seq(Some(3));
        state.on_invalid_session(false);
        assert_eq!(state.plan(), HandshakePlan::Identify);
        assert_eq!(state.last_seq(), None);
    }
}
