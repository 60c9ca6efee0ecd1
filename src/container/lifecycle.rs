//! Sandbox session record and lifecycle states.

use crate::container::{MountSpec, SandboxError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// Where a session is in its create→remove sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Created,
    Started,
    Attached,
    Running,
    Stopped,
    Committed,
    Removed,
    Closed,
    Error,
}

impl SessionState {
    /// Whether the session has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Error)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// One sandbox session from creation to removal.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxSession {
    /// Engine-assigned container id, once created
    pub container_id: Option<String>,
    /// Container name and commit repository
    pub name: String,
    /// Base image reference
    pub image: String,
    /// Bind mounts
    pub mounts: Vec<MountSpec>,
    /// Current state
    pub state: SessionState,
    /// Local input was a terminal switched to raw mode
    pub holds_terminal: bool,
    /// States visited, in order
    pub history: Vec<SessionState>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SandboxSession {
    pub fn new<N: Into<String>, I: Into<String>>(name: N, image: I) -> Self {
        Self {
            container_id: None,
            name: name.into(),
            image: image.into(),
            mounts: Vec::new(),
            state: SessionState::Idle,
            holds_terminal: false,
            history: vec![SessionState::Idle],
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move to `state`, recording it in the history.
    pub fn transition(&mut self, state: SessionState) {
        debug!("Session {}: {} -> {}", self.name, self.state, state);
        self.state = state;
        self.history.push(state);
        if state.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }

    /// Whether the session passed through `state`.
    pub fn visited(&self, state: SessionState) -> bool {
        self.history.contains(&state)
    }
}

/// Final result of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    /// Reference of the committed image
    pub final_image: Option<String>,
    /// The error that ended the session early
    pub primary_error: Option<SandboxError>,
    /// Cleanup and steady-state failures, in the order they happened
    pub teardown_errors: Vec<SandboxError>,
    /// Session record at the end
    pub session: SandboxSession,
}

impl SessionOutcome {
    /// Whether everything, including teardown, succeeded.
    pub fn is_success(&self) -> bool {
        self.primary_error.is_none() && self.teardown_errors.is_empty()
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    /// All errors, primary first.
    pub fn errors(&self) -> impl Iterator<Item = &SandboxError> {
        self.primary_error.iter().chain(self.teardown_errors.iter())
    }
}
