//! Operation surface over a single supervised session.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing_subscriber::{reload, EnvFilter, Registry};

use crate::config::{ConfigPatch, ServiceConfig};
use crate::supervisor::{
    ConfigureOutcome, ConnectionReport, DebugReport, FilesUpdate, Response, SessionError,
    StartOutcome, StartRequest, StatusReport, Supervisor, TerminateReport,
};

use super::Workflow;

/// Reload handle for the active log filter.
pub type LogFilterHandle = reload::Handle<EnvFilter, Registry>;

/// Log verbosity accepted by `set_log_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Default level for a `-v` count.
    #[must_use]
    pub fn from_verbosity(verbosity: u8) -> Self {
        match verbosity {
            0 => Self::Warn,
            1 => Self::Info,
            2 => Self::Debug,
            _ => Self::Trace,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" | "critical" => Ok(Self::Error),
            other => Err(SessionError::InvalidArgument(format!(
                "unknown log level '{other}', expected trace, debug, info, warn or error"
            ))),
        }
    }
}

/// Result of a quick start.
#[derive(Debug, Clone, Serialize)]
pub struct QuickStartOutcome {
    pub workflow: Workflow,
    #[serde(flatten)]
    pub start: StartOutcome,
}

/// Session operations plus service-level settings.
///
/// Cloning is cheap; clones share the session and the log level.
#[derive(Clone)]
pub struct AssistantService {
    supervisor: Supervisor,
    log_level: Arc<Mutex<LogLevel>>,
    log_handle: Option<LogFilterHandle>,
}

impl std::fmt::Debug for AssistantService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantService")
            .field("supervisor", &self.supervisor)
            .field("reloadable", &self.log_handle.is_some())
            .finish_non_exhaustive()
    }
}

impl AssistantService {
    /// Build the service. `log_handle` is the reload handle installed by the
    /// binary; without one, `set_log_level` only records the value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an unknown configured log level and
    /// `Filter` for invalid output patterns.
    pub fn new(
        config: ServiceConfig,
        log_handle: Option<LogFilterHandle>,
    ) -> Result<Self, SessionError> {
        let level = config
            .log_level
            .as_deref()
            .map(LogLevel::from_str)
            .transpose()?
            .unwrap_or(LogLevel::Warn);

        Ok(Self {
            supervisor: Supervisor::new(config)?,
            log_level: Arc::new(Mutex::new(level)),
            log_handle,
        })
    }

    #[must_use]
    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// # Errors
    ///
    /// See [`Supervisor::start`].
    pub async fn start(&self, request: StartRequest) -> Result<StartOutcome, SessionError> {
        self.supervisor.start(request).await
    }

    /// Start a session shaped by a predefined workflow.
    ///
    /// The workflow's settings override the caller's patch.
    ///
    /// # Errors
    ///
    /// See [`Supervisor::start`].
    pub async fn quick_start(
        &self,
        workflow: Workflow,
        files: Vec<String>,
        config: ConfigPatch,
    ) -> Result<QuickStartOutcome, SessionError> {
        let plan = workflow.plan();
        tracing::info!(%workflow, files = files.len(), "Quick start");
        let start = self
            .supervisor
            .start(StartRequest {
                files,
                message: Some(plan.message.to_string()),
                config: config.merged(&plan.patch),
            })
            .await?;
        Ok(QuickStartOutcome { workflow, start })
    }

    /// # Errors
    ///
    /// See [`Supervisor::send`].
    pub async fn send(&self, message: &str) -> Result<Response, SessionError> {
        self.supervisor.send(message).await
    }

    /// # Errors
    ///
    /// See [`Supervisor::add_files`].
    pub async fn add_files(&self, paths: &[String]) -> Result<FilesUpdate, SessionError> {
        self.supervisor.add_files(paths).await
    }

    /// # Errors
    ///
    /// See [`Supervisor::drop_files`].
    pub async fn drop_files(&self, paths: &[String]) -> Result<FilesUpdate, SessionError> {
        self.supervisor.drop_files(paths).await
    }

    /// # Errors
    ///
    /// See [`Supervisor::run_command`].
    pub async fn run_command(&self, command: &str) -> Result<Response, SessionError> {
        self.supervisor.run_command(command).await
    }

    pub async fn list_files(&self) -> Vec<String> {
        self.supervisor.list_files().await
    }

    pub async fn configure(&self, patch: &ConfigPatch) -> ConfigureOutcome {
        self.supervisor.configure(patch).await
    }

    pub async fn status(&self) -> StatusReport {
        self.supervisor.status().await
    }

    pub async fn debug_info(&self) -> DebugReport {
        self.supervisor.debug_info().await
    }

    pub async fn test_connection(&self) -> ConnectionReport {
        self.supervisor.test_connection().await
    }

    pub async fn log_level(&self) -> LogLevel {
        *self.log_level.lock().await
    }

    /// Change verbosity at runtime.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an unknown level or a rejected filter reload.
    pub async fn set_log_level(&self, level: &str) -> Result<LogLevel, SessionError> {
        let parsed = LogLevel::from_str(level)?;
        let mut current = self.log_level.lock().await;
        if let Some(handle) = &self.log_handle {
            handle
                .reload(EnvFilter::new(parsed.as_str()))
                .map_err(|e| SessionError::InvalidArgument(format!("log filter reload failed: {e}")))?;
        }
        *current = parsed;
        tracing::info!(level = %parsed, "Log level changed");
        Ok(parsed)
    }

    pub async fn stop(&self) -> TerminateReport {
        self.supervisor.stop().await
    }

    pub async fn emergency_stop(&self) -> TerminateReport {
        self.supervisor.emergency_stop().await
    }
}
