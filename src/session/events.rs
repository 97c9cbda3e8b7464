use std::fmt;

use serde::Serialize;

use super::SessionSnapshot;

/// Why a session left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// Removed by an administrator, or because its user no longer exists.
    Kicked,
    /// Logged out, or the server stopped.
    Invalidated,
    /// Idle and unreferenced for longer than the session timeout.
    TimedOut,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RemovalReason::Kicked => "kicked",
            RemovalReason::Invalidated => "invalidated",
            RemovalReason::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

/// Broadcast to every subscriber of
/// [`SessionManager::subscribe`](super::SessionManager::subscribe).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Added {
        session: SessionSnapshot,
    },
    Removed {
        session: SessionSnapshot,
        reason: RemovalReason,
    },
}

impl SessionEvent {
    pub fn session(&self) -> &SessionSnapshot {
        match self {
            SessionEvent::Added { session } | SessionEvent::Removed { session, .. } => session,
        }
    }
}
