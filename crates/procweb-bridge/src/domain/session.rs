//! Session identity and lifecycle state.
//!
//! One session exists per accepted connection.  It moves through four states:
//!
//! ```text
//! Created ──▶ Running ──▶ Draining ──▶ Done
//!    │                       ▲
//!    └───────────────────────┘   (process failed to launch / cancelled early)
//! ```
//!
//! - **Created**: channels allocated, nothing launched yet.
//! - **Running**: reader, writers, router and process runner are all live.
//! - **Draining**: the process has exited or the session was cancelled; the
//!   bridge is waiting for every task to observe termination.
//! - **Done**: all tasks have finished and the connection is closed.

use std::fmt;

use uuid::Uuid;

/// Identifier attached to every log line of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generates a fresh random session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    /// Shows the first 8 hex digits, which is plenty to tell concurrent
    /// sessions apart in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Created,
    Running,
    Draining,
    Done,
}

impl SessionState {
    /// Returns `true` if moving from `self` to `next` is a legal transition.
    ///
    /// States only move forward.  `Created → Draining` is allowed because a
    /// session whose process never starts goes straight to teardown.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Created, Running) | (Created, Draining) | (Running, Draining) | (Draining, Done)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::Running => "running",
            SessionState::Draining => "draining",
            SessionState::Done => "done",
        };
        f.write_str(name)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_forward_transitions_are_allowed() {
        assert!(Created.can_transition_to(Running));
        assert!(Running.can_transition_to(Draining));
        assert!(Draining.can_transition_to(Done));
    }

    #[test]
    fn test_created_can_skip_to_draining() {
        assert!(Created.can_transition_to(Draining));
    }

    #[test]
    fn test_backward_and_skipping_transitions_are_rejected() {
        assert!(!Running.can_transition_to(Created));
        assert!(!Done.can_transition_to(Running));
        assert!(!Created.can_transition_to(Done));
        assert!(!Running.can_transition_to(Done));
        assert!(!Draining.can_transition_to(Draining));
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_session_id_display_is_short_hex() {
        let shown = SessionId::new().to_string();
        assert_eq!(shown.len(), 8);
        assert!(shown.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
