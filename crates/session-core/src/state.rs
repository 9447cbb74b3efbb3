use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one streaming session.
///
/// `Idle -> Connected -> Recording -> Finalizing -> Completed`, with `Failed`
/// reachable from every non-terminal state. Only a reset leaves a terminal
/// state, and a reset may happen at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connected,
    Recording,
    Finalizing,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (_, Idle) => true,
            (Idle, Connected) | (Connected, Recording) | (Recording, Finalizing) | (Finalizing, Completed) => {
                true
            }
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connected => "connected",
            SessionState::Recording => "recording",
            SessionState::Finalizing => "finalizing",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
