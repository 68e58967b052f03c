//! Session state machine.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Lifecycle state of a supervised session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Stopped,
    Starting,
    Ready,
    Busy,
    Unresponsive,
    Crashed,
    ShuttingDown,
}

impl SessionState {
    /// A child process is expected to be alive in this state.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Starting | Self::Ready | Self::Busy | Self::Unresponsive
        )
    }

    /// Whether `self -> to` is a legal transition.
    ///
    /// Any state may fall to `Stopped` (forced termination), and any state
    /// but `Stopped` may begin shutting down.
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        use SessionState::{Busy, Crashed, Ready, ShuttingDown, Starting, Stopped, Unresponsive};

        match (self, to) {
            (_, Stopped) => true,
            (Stopped, ShuttingDown) => false,
            (_, ShuttingDown) => true,
            (Stopped | Crashed, Starting) => true,
            (Starting | Busy | Unresponsive, Ready) => true,
            (Ready, Busy) => true,
            (Starting | Ready | Busy, Unresponsive) => true,
            (Starting | Ready | Busy | Unresponsive, Crashed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Busy => "busy",
            Self::Unresponsive => "unresponsive",
            Self::Crashed => "crashed",
            Self::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}

/// Rejected state transition.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub from: SessionState,
    pub to: SessionState,
}

/// State machine for tracking session lifecycle.
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: SessionState,
    entered_at: Instant,
    transitions: u64,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: SessionState::Stopped,
            entered_at: Instant::now(),
            transitions: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Time spent in the current state.
    #[must_use]
    pub fn time_in_state(&self) -> Duration {
        self.entered_at.elapsed()
    }

    #[must_use]
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Move to `new_state` if the transition is legal.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` and leaves the state unchanged otherwise.
    pub fn transition(&mut self, new_state: SessionState) -> Result<SessionState, TransitionError> {
        if !self.state.can_transition(new_state) {
            return Err(TransitionError {
                from: self.state,
                to: new_state,
            });
        }
        let previous = self.state;
        if previous != new_state {
            tracing::debug!(from = %previous, to = %new_state, "State transition");
            self.state = new_state;
            self.entered_at = Instant::now();
            self.transitions = self.transitions.saturating_add(1);
        }
        Ok(previous)
    }
}
