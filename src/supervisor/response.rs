//! Responses, the single in-flight command slot, and the repeat guard.

use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::oneshot;

use crate::filter::OutputFilter;

use super::SessionError;

/// Filtered output produced for one command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Response {
    pub lines: Vec<String>,
    /// The idle prompt was observed; `false` when cut short.
    pub ready: bool,
    /// Output exceeded the line cap and was cut.
    pub truncated: bool,
}

impl Response {
    #[must_use]
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

pub(crate) type ResponseSlot = oneshot::Sender<Result<Response, SessionError>>;
pub(crate) type ResponseReceiver = oneshot::Receiver<Result<Response, SessionError>>;

/// The one outstanding request to the child.
#[derive(Debug)]
pub(crate) struct PendingCommand {
    pub id: u64,
    pub text: String,
    pub submitted_at: Instant,
    pub deadline: Instant,
    raw: Vec<String>,
    truncated: bool,
    slot: ResponseSlot,
}

impl PendingCommand {
    pub fn new(id: u64, text: impl Into<String>, timeout: Duration) -> (Self, ResponseReceiver) {
        let (slot, rx) = oneshot::channel();
        let now = Instant::now();
        let pending = Self {
            id,
            text: text.into(),
            submitted_at: now,
            deadline: now + timeout,
            raw: Vec::new(),
            truncated: false,
            slot,
        };
        (pending, rx)
    }

    /// Append a raw line, honouring the line cap.
    pub fn push_line(&mut self, line: &str, max_lines: usize) {
        if self.truncated {
            return;
        }
        if self.raw.len() >= max_lines {
            tracing::warn!(command = self.id, max_lines, "Response exceeded line cap, truncating");
            self.truncated = true;
            return;
        }
        self.raw.push(line.to_string());
    }

    /// Build the response from what has been collected so far.
    pub fn response(&self, filter: &OutputFilter, ready: bool) -> Response {
        let filtered = filter.filter(&self.raw);
        let mut lines = filtered.lines;
        if self.truncated {
            lines.push(format!("[response truncated after {} lines]", self.raw.len()));
        }
        Response {
            lines,
            ready,
            truncated: self.truncated,
        }
    }

    /// Fulfil the slot. Consumes the command, so it resolves exactly once.
    pub fn resolve(self, result: Result<Response, SessionError>) {
        if self.slot.send(result).is_err() {
            tracing::debug!(command = self.id, "Caller stopped waiting before resolution");
        }
    }
}

/// Rejects the same command submitted over and over in a short span.
#[derive(Debug, Clone)]
pub struct LoopGuard {
    last: Option<String>,
    count: u32,
    since: Instant,
    window: Duration,
    limit: u32,
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), 3)
    }
}

impl LoopGuard {
    #[must_use]
    pub fn new(window: Duration, limit: u32) -> Self {
        Self {
            last: None,
            count: 0,
            since: Instant::now(),
            window,
            limit,
        }
    }

    /// Register `command`, failing once it repeats more than `limit` times.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::LoopDetected` when the repeat limit is exceeded.
    pub fn check(&mut self, command: &str) -> Result<(), SessionError> {
        self.check_at(command, Instant::now())
    }

    /// [`check`](Self::check) against an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::LoopDetected` when the repeat limit is exceeded.
    pub fn check_at(&mut self, command: &str, now: Instant) -> Result<(), SessionError> {
        let repeat = self.last.as_deref() == Some(command)
            && now.saturating_duration_since(self.since) < self.window;

        if repeat {
            self.count = self.count.saturating_add(1);
            if self.count > self.limit {
                tracing::warn!(%command, count = self.count, "Repeated command, possible loop");
                return Err(SessionError::LoopDetected {
                    command: command.to_string(),
                });
            }
        } else {
            self.last = Some(command.to_string());
            self.count = 1;
            self.since = now;
        }
        Ok(())
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.count = 0;
    }
}
