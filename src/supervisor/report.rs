//! Status and diagnostic snapshots.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::SessionConfig;

use super::{BreakerSnapshot, BreakerState, SessionState, Supervisor};

/// Summary of the session for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub session_id: Uuid,
    pub state: SessionState,
    pub pid: Option<u32>,
    pub spawned_at: Option<DateTime<Utc>>,
    /// Seconds since the current child was spawned, while one is live.
    pub uptime_secs: Option<u64>,
    pub breaker: BreakerState,
    pub files: Vec<String>,
}

/// The command currently awaiting a prompt.
#[derive(Debug, Clone, Serialize)]
pub struct PendingInfo {
    pub id: u64,
    pub command: String,
    pub age_ms: u64,
    pub remaining_ms: u64,
}

/// Everything useful when the session misbehaves.
#[derive(Debug, Clone, Serialize)]
pub struct DebugReport {
    pub status: StatusReport,
    pub binary: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub config: SessionConfig,
    pub generation: u64,
    pub time_in_state_ms: u64,
    pub idle_ms: u64,
    pub circuit: BreakerSnapshot,
    pub spawn_attempts: u64,
    pub protocol_anomalies: u64,
    pub pending: Option<PendingInfo>,
    pub queued_config: Vec<String>,
    pub last_error: Option<String>,
    pub last_exit: Option<String>,
    pub stdout_tail: Vec<String>,
    pub stderr_tail: Vec<String>,
}

fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Supervisor {
    pub async fn status(&self) -> StatusReport {
        let inner = self.shared.inner.lock().await;
        let state = inner.machine.state();
        StatusReport {
            session_id: inner.session.id,
            state,
            pid: inner.session.pid,
            spawned_at: inner.session.spawned_at,
            uptime_secs: inner
                .session
                .spawned_instant
                .filter(|_| state.is_active())
                .map(|t| t.elapsed().as_secs()),
            breaker: inner.breaker.state(),
            files: inner.session.files.clone(),
        }
    }

    pub async fn debug_info(&self) -> DebugReport {
        let status = self.status().await;
        let inner = self.shared.inner.lock().await;
        let assistant = &self.shared.config.assistant;
        let builder = crate::process::AssistantProcessBuilder::new(assistant)
            .session(&inner.session.config)
            .files(&inner.session.files);

        DebugReport {
            status,
            binary: assistant.binary.clone(),
            args: builder.build_args(),
            working_dir: builder
                .get_working_dir()
                .cloned()
                .or_else(|| std::env::current_dir().ok()),
            config: inner.session.config.clone(),
            generation: inner.generation,
            time_in_state_ms: millis(inner.machine.time_in_state()),
            idle_ms: millis(inner.session.last_activity.elapsed()),
            circuit: inner.breaker.snapshot(),
            spawn_attempts: inner.spawn_attempts,
            protocol_anomalies: inner.anomalies,
            pending: inner.pending.as_ref().map(|p| PendingInfo {
                id: p.id,
                command: p.text.clone(),
                age_ms: millis(p.submitted_at.elapsed()),
                remaining_ms: millis(p.deadline.saturating_duration_since(std::time::Instant::now())),
            }),
            queued_config: inner.queued_config.iter().cloned().collect(),
            last_error: inner.last_error.clone(),
            last_exit: inner.last_exit.clone(),
            stdout_tail: inner.stdout_tail.snapshot(),
            stderr_tail: inner.stderr_tail.snapshot(),
        }
    }
}
