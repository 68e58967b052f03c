//! Periodic liveness and responsiveness checks.

use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::runner::PROBE_COMMAND;
use super::{SessionError, SessionState, Supervisor};

/// Outcome of one health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unresponsive,
    Dead,
}

impl Supervisor {
    /// Check the child once.
    ///
    /// An exited child is handed to the crash path. A Ready session idle
    /// past the threshold is probed; a session still Unresponsive after the
    /// threshold is treated as crashed.
    pub async fn health_check(&self) -> HealthStatus {
        let (generation, state, idle) = {
            let inner = self.shared.inner.lock().await;
            (
                inner.generation,
                inner.machine.state(),
                inner.session.last_activity.elapsed(),
            )
        };
        if !state.is_active() {
            return HealthStatus::Dead;
        }
        if state == SessionState::Starting {
            return HealthStatus::Healthy;
        }

        if let Some(exit) = self.child_exit(generation).await {
            self.handle_crash(generation, format!("process exited: {exit}"))
                .await;
            return HealthStatus::Dead;
        }

        let timeouts = &self.shared.config.timeouts;
        match state {
            SessionState::Ready if idle >= timeouts.idle_threshold() => self.probe().await,
            SessionState::Unresponsive if idle >= timeouts.idle_threshold() => {
                tracing::warn!(idle_secs = idle.as_secs(), "Assistant still unresponsive, escalating");
                self.handle_crash(generation, "unresponsive".to_string())
                    .await;
                HealthStatus::Dead
            }
            SessionState::Unresponsive => HealthStatus::Unresponsive,
            _ => HealthStatus::Healthy,
        }
    }

    async fn probe(&self) -> HealthStatus {
        let grace = self.shared.config.timeouts.probe_grace();
        match self.dispatch(PROBE_COMMAND, grace, false).await {
            Ok(_) => HealthStatus::Healthy,
            Err(SessionError::CommandTimeout { .. }) => HealthStatus::Unresponsive,
            // A caller got there first; their command doubles as the probe.
            Err(SessionError::InvalidState { .. }) => HealthStatus::Healthy,
            Err(e) => {
                tracing::debug!(error = %e, "Health probe failed");
                HealthStatus::Dead
            }
        }
    }

    /// Run health checks for one child generation until it is retired.
    pub(crate) async fn health_loop(self, generation: u64, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.shared.config.timeouts.health_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                () = self.shared.health_kick.notified() => {}
            }

            let status = self.health_check().await;
            tracing::debug!(generation, ?status, "Health check");
            if status == HealthStatus::Dead {
                break;
            }
        }
    }
}
