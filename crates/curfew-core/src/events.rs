//! Core events emitted by the engine

use curfew_util::SessionId;

/// A session cleared because its end time passed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndedSession {
    pub session_id: Option<SessionId>,
}

/// Events emitted by the recompute actor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// Focus session ran out
    FocusEnded { session_id: Option<SessionId> },

    /// Emergency bypass ran out
    EmergencyEnded { session_id: Option<SessionId> },

    /// Whether any time-windowed policy is active flipped
    PolicyActivityChanged { active: bool },
}
