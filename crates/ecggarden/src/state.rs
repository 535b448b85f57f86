//! Session lifecycle.
//!
//! ```text
//! idle --Started--> running --StopRequested--> stopping --Exited--> stopped
//!                      |                          |
//!                      +--Failed--> error         +--Failed--> stopping
//! ```
//!
//! `running -> error` is the only transition a worker triggers on its own.
//! Everything else follows a Stop call. Once stopping, the session always
//! resolves to `stopped`.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Running,
    Stopping,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A worker was launched for the session.
    Started,
    /// Cancellation was signalled.
    StopRequested,
    /// Acquisition failed or the worker panicked.
    Failed,
    /// The worker is gone.
    Exited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid session transition: {event:?} while {from}")]
pub struct InvalidTransition {
    pub from: SessionState,
    pub event: SessionEvent,
}

impl SessionState {
    pub fn transition(self, event: SessionEvent) -> Result<SessionState, InvalidTransition> {
        use SessionEvent::*;
        use SessionState::*;

        let next = match (self, event) {
            (Idle, Started) => Running,
            (Running, StopRequested) => Stopping,
            (Running, Failed) => Error,
            (Running, Exited) => Stopped,
            (Stopping, StopRequested) | (Stopping, Failed) => Stopping,
            (Stopping, Exited) => Stopped,
            (Error, StopRequested) | (Error, Failed) | (Error, Exited) => Error,
            (Stopped, StopRequested) | (Stopped, Exited) => Stopped,
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        Ok(next)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
