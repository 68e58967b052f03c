//! Session error taxonomy.

use std::time::Duration;

use crate::filter::FilterError;
use crate::process::{PumpError, SpawnError};

use super::{Response, SessionState};

/// Errors returned by session operations.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    /// The binary is missing or could not be launched.
    #[error("Failed to spawn assistant: {0}")]
    Spawn(#[from] SpawnError),

    #[error("Assistant did not become ready within {}s", .0.as_secs())]
    StartTimeout(Duration),

    /// No prompt arrived in time; `partial` holds what was received.
    #[error("No prompt from assistant within {}s", .timeout.as_secs())]
    CommandTimeout { timeout: Duration, partial: Response },

    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Restart suppressed by circuit breaker, retry in {}s", .retry_in.as_secs())]
    CircuitOpen { retry_in: Duration },

    #[error(transparent)]
    WriteFailed(#[from] PumpError),

    #[error("Assistant exited unexpectedly: {reason}")]
    UnexpectedExit { reason: String },

    /// The session was stopped while the operation was outstanding.
    #[error("Session terminated")]
    Terminated,

    #[error("Command '{command}' repeated too many times, try a different approach")]
    LoopDetected { command: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Filter(#[from] FilterError),
}

impl SessionError {
    /// Stable tag used on the wire.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Spawn(_) => "spawn_error",
            Self::StartTimeout(_) => "start_timeout",
            Self::CommandTimeout { .. } => "command_timeout",
            Self::InvalidState { .. } => "invalid_state",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::WriteFailed(_) => "write_failed",
            Self::UnexpectedExit { .. } => "unexpected_exit",
            Self::Terminated => "terminated",
            Self::LoopDetected { .. } => "loop_detected",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Filter(_) => "filter_error",
        }
    }

    /// Whether this error means the child process is gone.
    #[must_use]
    pub fn is_crash(&self) -> bool {
        matches!(self, Self::WriteFailed(_) | Self::UnexpectedExit { .. })
    }
}
