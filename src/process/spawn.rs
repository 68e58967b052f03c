//! Assistant process spawning and control.
//!
//! This module provides a builder for the assistant's command line and a
//! handle over the running child. The handle is owned by the supervisor;
//! nothing else signals the child or reads its exit status.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};

use crate::config::{AssistantConfig, SessionConfig};

/// Error type for process spawning operations.
#[derive(thiserror::Error, Debug)]
pub enum SpawnError {
    /// The binary was not found.
    #[error("Assistant binary not found: {0}")]
    NotFound(String),
    /// Permission denied when spawning.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// A standard stream was not captured.
    #[error("Process {0} not available")]
    MissingPipe(&'static str),
    /// Other I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    /// Create a `SpawnError` from an I/O error, classifying common cases.
    fn from_io(binary: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(binary.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(binary.to_string()),
            _ => Self::Io(err),
        }
    }
}

/// Builder for the assistant command line.
#[derive(Debug, Clone)]
pub struct AssistantProcessBuilder {
    binary: String,
    static_args: Vec<String>,
    files: Vec<String>,
    session: SessionConfig,
    working_dir: Option<PathBuf>,
}

impl AssistantProcessBuilder {
    /// Create a builder from the launch configuration.
    #[must_use]
    pub fn new(assistant: &AssistantConfig) -> Self {
        Self {
            binary: assistant.binary.clone(),
            static_args: assistant.args.clone(),
            files: Vec::new(),
            session: SessionConfig::default(),
            working_dir: assistant.working_dir.clone(),
        }
    }

    /// Files loaded into the chat at startup.
    #[must_use]
    pub fn files(mut self, files: &[String]) -> Self {
        self.files = files.to_vec();
        self
    }

    #[must_use]
    pub fn session(mut self, session: &SessionConfig) -> Self {
        self.session = session.clone();
        self
    }

    /// Set the working directory for the process.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn get_working_dir(&self) -> Option<&PathBuf> {
        self.working_dir.as_ref()
    }

    #[must_use]
    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Build the command-line arguments.
    #[must_use]
    pub fn build_args(&self) -> Vec<String> {
        let mut args = self.static_args.clone();
        args.extend(self.session.launch_args());
        args.extend(self.files.iter().cloned());
        args
    }
}

/// A running assistant process with its three pipes.
#[derive(Debug)]
pub struct AssistantProcess {
    child: Child,
}

impl AssistantProcess {
    /// Spawn the assistant with stdin, stdout and stderr piped.
    ///
    /// # Errors
    ///
    /// Returns `SpawnError` if the process fails to spawn.
    pub fn spawn(builder: &AssistantProcessBuilder) -> Result<Self, SpawnError> {
        let args = builder.build_args();

        let mut cmd = Command::new(&builder.binary);
        cmd.args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(ref dir) = builder.working_dir {
            cmd.current_dir(dir);
        }

        tracing::info!(binary = %builder.binary, ?args, "Spawning assistant");
        let child = cmd.spawn().map_err(|e| SpawnError::from_io(&builder.binary, e))?;

        Ok(Self { child })
    }

    /// Take ownership of the stdin handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take ownership of the stdout handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Take ownership of the stderr handle.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Get the process ID, if still running.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Check if the process has exited without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error if the process state cannot be queried.
    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting fails.
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Forcefully kill the process and reap it.
    ///
    /// # Errors
    ///
    /// Returns an error if the kill signal cannot be sent.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }

    /// Attempt graceful termination with a timeout.
    ///
    /// On Unix, sends SIGINT first, then SIGKILL after the timeout.
    /// On other platforms, falls back to immediate kill.
    ///
    /// # Errors
    ///
    /// Returns an error if termination fails.
    pub async fn graceful_terminate(&mut self, timeout: Duration) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            self.graceful_terminate_unix(timeout).await
        }

        #[cfg(not(unix))]
        {
            let _ = timeout;
            self.kill().await
        }
    }

    #[cfg(unix)]
    async fn graceful_terminate_unix(&mut self, timeout: Duration) -> std::io::Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = self.id() {
            let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
            if let Err(e) = kill(nix_pid, Signal::SIGINT) {
                tracing::debug!(pid, error = %e, "SIGINT delivery failed");
            }

            match tokio::time::timeout(timeout, self.child.wait()).await {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(e)) => Err(e),
                Err(_) => {
                    tracing::warn!(pid, "Assistant ignored SIGINT, killing");
                    self.child.kill().await
                }
            }
        } else {
            // Already reaped
            Ok(())
        }
    }
}
