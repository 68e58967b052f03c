//! Supervisor runner for orchestrating the assistant session.
//!
//! This module connects the process spawner, stream pump and output filter
//! to the session state machine and circuit breaker. All session state lives
//! behind one lock; the child handle and stdin writer have their own slots so
//! a stuck write can never block a kill.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Receiver;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ConfigPatch, ServiceConfig, SessionConfig};
use crate::filter::OutputFilter;
use crate::process::{
    AssistantProcess, AssistantProcessBuilder, CommandWriter, OutputTail, PumpEvent, StreamKind,
    StreamPump, DEFAULT_CHANNEL_BUFFER,
};
use crate::supervisor::{
    CircuitBreaker, LoopGuard, PendingCommand, Response, ResponseReceiver, SessionError,
    SessionState, SessionStateMachine,
};

/// Label of the implicit command that waits for the first prompt.
pub const STARTUP_COMMAND: &str = "<startup>";

/// Lightweight command used by health probes and connection tests.
pub const PROBE_COMMAND: &str = "";

const EXIT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// One supervised lifecycle of the assistant plus its conversational state.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub spawned_at: Option<DateTime<Utc>>,
    pub(crate) spawned_instant: Option<Instant>,
    pub(crate) last_activity: Instant,
    /// Files in the chat, in insertion order.
    pub files: Vec<String>,
    pub config: SessionConfig,
    pub pid: Option<u32>,
}

impl Session {
    fn new(files: Vec<String>, config: SessionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            spawned_at: None,
            spawned_instant: None,
            last_activity: Instant::now(),
            files,
            config,
            pid: None,
        }
    }
}

/// Arguments for [`Supervisor::start`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StartRequest {
    pub files: Vec<String>,
    /// Sent through the normal command path once the assistant is ready.
    pub message: Option<String>,
    pub config: ConfigPatch,
}

/// Result of a successful start.
#[derive(Debug, Clone, Serialize)]
pub struct StartOutcome {
    pub session_id: Uuid,
    /// Filtered startup output.
    pub startup: Response,
    /// Reply to the initial message, when one was given.
    pub initial: Option<Response>,
}

/// File-context change and the assistant's acknowledgement.
#[derive(Debug, Clone, Serialize)]
pub struct FilesUpdate {
    pub files: Vec<String>,
    pub response: Response,
}

/// Result of [`Supervisor::configure`].
#[derive(Debug, Clone, Serialize)]
pub struct ConfigureOutcome {
    pub config: SessionConfig,
    /// In-chat commands queued for the running assistant.
    pub queued: Vec<String>,
}

/// Result of [`Supervisor::terminate`].
#[derive(Debug, Clone, Serialize)]
pub struct TerminateReport {
    pub previous_state: SessionState,
    pub exit_status: Option<String>,
    pub forced: bool,
}

/// Result of [`Supervisor::test_connection`].
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub alive: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Termination {
    Graceful,
    Forced,
}

pub(crate) struct Inner {
    pub(crate) machine: SessionStateMachine,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) session: Session,
    pub(crate) pending: Option<PendingCommand>,
    pub(crate) queued_config: VecDeque<String>,
    loop_guard: LoopGuard,
    pub(crate) generation: u64,
    next_command_id: u64,
    restart_scheduled: bool,
    cancel: CancellationToken,
    pub(crate) stdout_tail: OutputTail,
    pub(crate) stderr_tail: OutputTail,
    pub(crate) last_error: Option<String>,
    pub(crate) last_exit: Option<String>,
    pub(crate) spawn_attempts: u64,
    pub(crate) anomalies: u64,
}

impl Inner {
    fn enter(&mut self, to: SessionState, operation: &'static str) -> Result<(), SessionError> {
        self.machine
            .transition(to)
            .map(|_| ())
            .map_err(|e| SessionError::InvalidState {
                operation,
                state: e.from,
            })
    }

    fn next_id(&mut self) -> u64 {
        self.next_command_id = self.next_command_id.wrapping_add(1);
        self.next_command_id
    }

    fn take_pending(&mut self, generation: u64, id: u64) -> Option<PendingCommand> {
        if self.generation == generation && self.pending.as_ref().is_some_and(|p| p.id == id) {
            self.pending.take()
        } else {
            None
        }
    }

    /// Invalidate every task bound to the current child.
    fn retire_generation(&mut self) -> u64 {
        let retired = self.generation;
        self.cancel.cancel();
        self.generation = self.generation.wrapping_add(1);
        self.session.pid = None;
        retired
    }
}

struct ChildSlot {
    generation: u64,
    process: AssistantProcess,
    readers: Vec<JoinHandle<()>>,
}

struct WriterSlot {
    generation: u64,
    writer: CommandWriter,
}

pub(crate) struct Shared {
    pub(crate) config: ServiceConfig,
    pub(crate) filter: OutputFilter,
    pub(crate) inner: Mutex<Inner>,
    child: Mutex<Option<ChildSlot>>,
    writer: Mutex<Option<WriterSlot>>,
    pub(crate) health_kick: Notify,
}

/// Supervisor owning the assistant process and its session.
///
/// Cloning is cheap; all clones drive the same session.
#[derive(Clone)]
pub struct Supervisor {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("binary", &self.shared.config.assistant.binary)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Create a supervisor in the `Stopped` state.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Filter` if a configured pattern is invalid.
    pub fn new(config: ServiceConfig) -> Result<Self, SessionError> {
        let filter = OutputFilter::new(&config.filter)?;
        let inner = Inner {
            machine: SessionStateMachine::new(),
            breaker: CircuitBreaker::new(config.breaker.clone()),
            session: Session::new(Vec::new(), config.session.clone()),
            pending: None,
            queued_config: VecDeque::new(),
            loop_guard: LoopGuard::default(),
            generation: 0,
            next_command_id: 0,
            restart_scheduled: false,
            cancel: CancellationToken::new(),
            stdout_tail: OutputTail::new(config.filter.tail_lines),
            stderr_tail: OutputTail::new(config.filter.tail_lines),
            last_error: None,
            last_exit: None,
            spawn_attempts: 0,
            anomalies: 0,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                filter,
                inner: Mutex::new(inner),
                child: Mutex::new(None),
                writer: Mutex::new(None),
                health_kick: Notify::new(),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.shared.config
    }

    pub async fn state(&self) -> SessionState {
        self.shared.inner.lock().await.machine.state()
    }

    /// Spawn the assistant and wait for its first prompt.
    ///
    /// # Errors
    ///
    /// `InvalidState` if a child is already live, `CircuitOpen` while the
    /// breaker suppresses starts, `Spawn` if the binary cannot be launched,
    /// `StartTimeout` if no prompt arrives in time.
    pub async fn start(&self, request: StartRequest) -> Result<StartOutcome, SessionError> {
        let (generation, id, rx, session_id) = {
            let mut inner = self.shared.inner.lock().await;
            let state = inner.machine.state();
            if !matches!(state, SessionState::Stopped | SessionState::Crashed) {
                return Err(SessionError::InvalidState {
                    operation: "start",
                    state,
                });
            }
            if let Err(retry_in) = inner.breaker.try_acquire() {
                tracing::warn!(retry_in_secs = retry_in.as_secs(), "Start rejected, circuit open");
                return Err(SessionError::CircuitOpen { retry_in });
            }

            let mut config = inner.session.config.clone();
            config.apply(&request.config);
            inner.session = Session::new(dedup_paths(&request.files), config);
            inner.loop_guard.reset();

            let (generation, id, rx) = self.begin_launch(&mut inner)?;
            (generation, id, rx, inner.session.id)
        };

        tracing::info!(session = %session_id, "Starting assistant session");
        self.launch(generation).await?;
        let startup = self.await_startup(generation, id, rx, false).await?;

        let initial = match request.message.as_deref().map(str::trim) {
            Some(message) if !message.is_empty() => Some(self.send(message).await?),
            _ => None,
        };

        Ok(StartOutcome {
            session_id,
            startup,
            initial,
        })
    }

    fn begin_launch(&self, inner: &mut Inner) -> Result<(u64, u64, ResponseReceiver), SessionError> {
        inner.enter(SessionState::Starting, "start")?;
        inner.cancel = CancellationToken::new();
        inner.generation = inner.generation.wrapping_add(1);
        inner.spawn_attempts = inner.spawn_attempts.saturating_add(1);
        inner.queued_config.clear();
        // Any restart still sleeping is superseded by this launch.
        inner.restart_scheduled = false;

        let id = inner.next_id();
        let (pending, rx) =
            PendingCommand::new(id, STARTUP_COMMAND, self.shared.config.timeouts.start());
        inner.pending = Some(pending);
        Ok((inner.generation, id, rx))
    }

    async fn launch(&self, generation: u64) -> Result<(), SessionError> {
        let builder = {
            let inner = self.shared.inner.lock().await;
            AssistantProcessBuilder::new(&self.shared.config.assistant)
                .session(&inner.session.config)
                .files(&inner.session.files)
        };

        let spawned = AssistantProcess::spawn(&builder).and_then(|mut process| {
            let pump = StreamPump::attach(&mut process, &self.shared.filter, DEFAULT_CHANNEL_BUFFER)?;
            Ok((process, pump))
        });
        let (mut process, pump) = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                tracing::error!(binary = %builder.binary(), error = %e, "Failed to spawn assistant");
                self.fail_launch(generation, &e.to_string()).await;
                return Err(e.into());
            }
        };

        let pid = process.id();
        let StreamPump {
            writer,
            stdout,
            stderr,
            readers,
        } = pump;

        let cancel = {
            let mut inner = self.shared.inner.lock().await;
            if inner.generation != generation || inner.machine.state() != SessionState::Starting {
                drop(inner);
                tracing::debug!(generation, "Launch superseded, discarding child");
                if let Err(e) = process.kill().await {
                    tracing::debug!(error = %e, "Kill of superseded child failed");
                }
                readers.iter().for_each(JoinHandle::abort);
                return Err(SessionError::Terminated);
            }
            inner.session.pid = pid;
            inner.session.spawned_at = Some(Utc::now());
            inner.session.spawned_instant = Some(Instant::now());
            inner.session.last_activity = Instant::now();

            // Child lock is never held while waiting on the session lock.
            *self.shared.child.lock().await = Some(ChildSlot {
                generation,
                process,
                readers,
            });
            inner.cancel.clone()
        };
        *self.shared.writer.lock().await = Some(WriterSlot { generation, writer });

        tokio::spawn(self.clone().route_output(generation, stdout, stderr, cancel.clone()));
        tokio::spawn(self.clone().health_loop(generation, cancel));

        tracing::info!(pid, generation, "Assistant spawned");
        Ok(())
    }

    async fn fail_launch(&self, generation: u64, reason: &str) {
        let mut inner = self.shared.inner.lock().await;
        if inner.generation != generation {
            return;
        }
        inner.breaker.record_failure();
        inner.last_error = Some(format!("spawn failed: {reason}"));
        if let Some(pending) = inner.pending.take() {
            pending.resolve(Err(SessionError::UnexpectedExit {
                reason: reason.to_string(),
            }));
        }
        inner.retire_generation();
        let _ = inner.machine.transition(SessionState::Stopped);
    }

    async fn await_startup(
        &self,
        generation: u64,
        id: u64,
        mut rx: ResponseReceiver,
        automatic: bool,
    ) -> Result<Response, SessionError> {
        let timeout = self.shared.config.timeouts.start();
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::Terminated),
            Err(_) => {
                let (retired, restart) = {
                    let mut inner = self.shared.inner.lock().await;
                    let Some(pending) = inner.take_pending(generation, id) else {
                        drop(inner);
                        return rx.try_recv().unwrap_or(Err(SessionError::Terminated));
                    };
                    pending.resolve(Err(SessionError::StartTimeout(timeout)));

                    inner.breaker.record_failure();
                    inner.last_error = Some(format!("no prompt within {}s of spawn", timeout.as_secs()));
                    let retired = inner.retire_generation();
                    let restart = automatic && inner.breaker.state() == super::BreakerState::Closed;
                    let next = if automatic {
                        SessionState::Crashed
                    } else {
                        SessionState::Stopped
                    };
                    let _ = inner.machine.transition(next);
                    if restart {
                        inner.restart_scheduled = true;
                    }
                    tracing::error!(timeout_secs = timeout.as_secs(), "Assistant start timed out");
                    (retired, restart.then_some(inner.generation))
                };

                self.discard_writer(retired);
                let exit = self.reap(retired, Termination::Forced).await;
                self.note_exit(exit).await;
                if let Some(generation) = restart {
                    self.schedule_restart(generation);
                }
                Err(SessionError::StartTimeout(timeout))
            }
        }
    }

    /// Send a message with the configured command timeout.
    ///
    /// # Errors
    ///
    /// See [`send_with_timeout`](Self::send_with_timeout).
    pub async fn send(&self, message: &str) -> Result<Response, SessionError> {
        self.send_with_timeout(message, self.shared.config.timeouts.command())
            .await
    }

    /// Send one command and wait for the assistant to return to its prompt.
    ///
    /// Queued configuration commands are flushed first, in order.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless the session is Ready, `CommandTimeout` if no
    /// prompt arrives in time, `WriteFailed`/`UnexpectedExit` on a crash,
    /// `LoopDetected` for runaway repeats.
    pub async fn send_with_timeout(
        &self,
        message: &str,
        timeout: Duration,
    ) -> Result<Response, SessionError> {
        self.flush_config(timeout).await?;
        self.dispatch(message, timeout, true).await
    }

    async fn flush_config(&self, timeout: Duration) -> Result<(), SessionError> {
        loop {
            let next = {
                let mut inner = self.shared.inner.lock().await;
                if inner.machine.state() != SessionState::Ready {
                    return Ok(());
                }
                inner.queued_config.pop_front()
            };
            let Some(command) = next else {
                return Ok(());
            };
            tracing::info!(%command, "Applying queued configuration");
            let response = self.dispatch(&command, timeout, false).await?;
            tracing::debug!(%command, reply = %response.text(), "Configuration applied");
        }
    }

    pub(crate) async fn dispatch(
        &self,
        text: &str,
        timeout: Duration,
        guarded: bool,
    ) -> Result<Response, SessionError> {
        let (generation, id, rx) = {
            let mut inner = self.shared.inner.lock().await;
            let state = inner.machine.state();
            if state != SessionState::Ready {
                return Err(SessionError::InvalidState {
                    operation: "send",
                    state,
                });
            }
            if guarded {
                inner.loop_guard.check(text)?;
            }
            inner.enter(SessionState::Busy, "send")?;

            let id = inner.next_id();
            let (pending, rx) = PendingCommand::new(id, text, timeout);
            inner.pending = Some(pending);
            inner.session.last_activity = Instant::now();
            (inner.generation, id, rx)
        };

        if let Err(e) = self.write(generation, &encode_command(text)).await {
            if e.is_crash() {
                self.handle_crash(generation, e.to_string()).await;
            }
            return Err(e);
        }
        tracing::debug!(command = id, %text, "Command sent");

        self.await_response(generation, id, rx, timeout).await
    }

    async fn write(&self, generation: u64, text: &str) -> Result<(), SessionError> {
        let mut slot = self.shared.writer.lock().await;
        match slot.as_mut() {
            Some(slot) if slot.generation == generation => {
                slot.writer.write_line(text).await.map_err(SessionError::from)
            }
            _ => Err(SessionError::Terminated),
        }
    }

    async fn await_response(
        &self,
        generation: u64,
        id: u64,
        mut rx: ResponseReceiver,
        timeout: Duration,
    ) -> Result<Response, SessionError> {
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::Terminated),
            Err(_) => {
                let partial = {
                    let mut inner = self.shared.inner.lock().await;
                    let Some(pending) = inner.take_pending(generation, id) else {
                        drop(inner);
                        return rx.try_recv().unwrap_or(Err(SessionError::Terminated));
                    };
                    let partial = pending.response(&self.shared.filter, false);
                    pending.resolve(Err(SessionError::CommandTimeout {
                        timeout,
                        partial: partial.clone(),
                    }));
                    if let Err(e) = inner.machine.transition(SessionState::Unresponsive) {
                        tracing::debug!(error = %e, "Timed-out command left no Unresponsive transition");
                    }
                    inner.last_error = Some(format!(
                        "command {id} timed out after {}s",
                        timeout.as_secs()
                    ));
                    partial
                };
                tracing::warn!(
                    command = id,
                    timeout_secs = timeout.as_secs(),
                    lines = partial.lines.len(),
                    "Command timed out, session unresponsive"
                );
                self.shared.health_kick.notify_one();
                Err(SessionError::CommandTimeout { timeout, partial })
            }
        }
    }

    /// Drain both output channels for one child generation.
    async fn route_output(
        self,
        generation: u64,
        mut stdout: Receiver<PumpEvent>,
        mut stderr: Receiver<PumpEvent>,
        cancel: CancellationToken,
    ) {
        let quiescence = self.shared.config.timeouts.quiescence();
        let mut prompt_deadline: Option<tokio::time::Instant> = None;
        let mut stderr_open = true;

        loop {
            let quiet = async move {
                match prompt_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                event = stdout.recv() => match event {
                    Some(PumpEvent::Line(line)) => {
                        let prompt = self.on_line(generation, StreamKind::Stdout, &line).await;
                        prompt_deadline = prompt.then(|| tokio::time::Instant::now() + quiescence);
                    }
                    Some(PumpEvent::ReadFailed(e)) => {
                        self.handle_crash(generation, format!("stdout read failed: {e}")).await;
                        break;
                    }
                    Some(PumpEvent::Closed) | None => {
                        self.handle_crash(generation, "stdout closed".to_string()).await;
                        break;
                    }
                },

                event = stderr.recv(), if stderr_open => match event {
                    Some(PumpEvent::Line(line)) => {
                        self.on_line(generation, StreamKind::Stderr, &line).await;
                        prompt_deadline = None;
                    }
                    _ => stderr_open = false,
                },

                () = quiet => {
                    prompt_deadline = None;
                    self.on_quiescent_prompt(generation).await;
                }
            }
        }

        tracing::debug!(generation, "Output router exited");
    }

    /// Record one output line. Returns whether it is a prompt candidate.
    async fn on_line(&self, generation: u64, stream: StreamKind, line: &str) -> bool {
        let prompt = stream == StreamKind::Stdout && self.shared.filter.is_prompt(line);
        let max_lines = self.shared.config.filter.max_response_lines;

        let mut inner = self.shared.inner.lock().await;
        if inner.generation != generation {
            return false;
        }
        inner.session.last_activity = Instant::now();
        match stream {
            StreamKind::Stdout => inner.stdout_tail.push(line),
            StreamKind::Stderr => inner.stderr_tail.push(line),
        }

        if let Some(pending) = inner.pending.as_mut() {
            pending.push_line(line, max_lines);
        } else if !prompt && !line.trim().is_empty() {
            let state = inner.machine.state();
            if state == SessionState::Unresponsive {
                tracing::debug!(%stream, %line, "Discarding late output");
            } else {
                inner.anomalies = inner.anomalies.saturating_add(1);
                tracing::warn!(%stream, %state, %line, "Protocol anomaly: output with no command outstanding");
            }
        }

        prompt
    }

    async fn on_quiescent_prompt(&self, generation: u64) {
        let mut inner = self.shared.inner.lock().await;
        if inner.generation != generation {
            return;
        }

        let state = inner.machine.state();
        if !matches!(
            state,
            SessionState::Starting | SessionState::Busy | SessionState::Unresponsive
        ) {
            tracing::trace!(%state, "Prompt with nothing outstanding");
            return;
        }

        if let Some(pending) = inner.pending.take() {
            let response = pending.response(&self.shared.filter, true);
            tracing::debug!(command = pending.id, lines = response.lines.len(), "Response complete");
            pending.resolve(Ok(response));
        }
        if inner.machine.transition(SessionState::Ready).is_ok() {
            inner.breaker.record_success();
            match state {
                SessionState::Starting => tracing::info!(pid = inner.session.pid, "Assistant ready"),
                SessionState::Unresponsive => tracing::info!("Assistant recovered"),
                _ => {}
            }
        }
    }

    /// Crash path shared by EOF, write failure, exit detection and escalation.
    pub(crate) async fn handle_crash(&self, generation: u64, reason: String) {
        let restart = {
            let mut inner = self.shared.inner.lock().await;
            let state = inner.machine.state();
            if inner.generation != generation || !state.is_active() {
                return;
            }

            inner.breaker.record_failure();
            let _ = inner.machine.transition(SessionState::Crashed);
            inner.last_error = Some(reason.clone());
            if let Some(pending) = inner.pending.take() {
                pending.resolve(Err(SessionError::UnexpectedExit {
                    reason: reason.clone(),
                }));
            }
            inner.retire_generation();

            let breaker = inner.breaker.state();
            tracing::error!(from = %state, %reason, %breaker, "Assistant crashed");
            if breaker == super::BreakerState::Closed && !inner.restart_scheduled {
                inner.restart_scheduled = true;
                Some(inner.generation)
            } else {
                None
            }
        };

        self.discard_writer(generation);
        let exit = self.reap(generation, Termination::Forced).await;
        self.note_exit(exit).await;

        if let Some(generation) = restart {
            self.schedule_restart(generation);
        }
    }

    fn schedule_restart(&self, generation: u64) {
        let this = self.clone();
        let delay = self.shared.config.timeouts.restart_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match this.restart(generation).await {
                Ok(_) => tracing::info!("Automatic restart succeeded"),
                Err(e) => tracing::warn!(error = %e, "Automatic restart failed"),
            }
        });
    }

    async fn restart(&self, generation: u64) -> Result<Response, SessionError> {
        let (generation, id, rx) = {
            let mut inner = self.shared.inner.lock().await;
            if inner.generation != generation || inner.machine.state() != SessionState::Crashed {
                tracing::debug!("Restart superseded");
                return Err(SessionError::Terminated);
            }
            inner.restart_scheduled = false;
            if let Err(retry_in) = inner.breaker.try_acquire() {
                return Err(SessionError::CircuitOpen { retry_in });
            }
            tracing::info!(session = %inner.session.id, "Restarting assistant");
            self.begin_launch(&mut inner)?
        };

        self.launch(generation).await?;
        self.await_startup(generation, id, rx, true).await
    }

    async fn note_exit(&self, exit: Option<String>) {
        if let Some(exit) = exit {
            self.shared.inner.lock().await.last_exit = Some(exit);
        }
    }

    fn discard_writer(&self, generation: u64) {
        // A writer blocked on a full pipe keeps its lock; killing the child
        // unblocks it and the stale slot is replaced on the next launch.
        if let Ok(mut slot) = self.shared.writer.try_lock() {
            if slot.as_ref().is_some_and(|s| s.generation == generation) {
                slot.take();
            }
        }
    }

    /// Terminate and reap the child of `generation`, if it is still held.
    async fn reap(&self, generation: u64, mode: Termination) -> Option<String> {
        let slot = {
            let mut child = self.shared.child.lock().await;
            if child.as_ref().is_some_and(|s| s.generation == generation) {
                child.take()
            } else {
                None
            }
        };
        let mut slot = slot?;

        let result = match mode {
            Termination::Graceful => {
                slot.process
                    .graceful_terminate(self.shared.config.timeouts.terminate_grace())
                    .await
            }
            Termination::Forced => slot.process.kill().await,
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "Termination signal failed, child likely gone");
        }
        slot.readers.iter().for_each(JoinHandle::abort);

        match slot.process.try_wait() {
            Ok(Some(status)) => Some(status.to_string()),
            Ok(None) => None,
            Err(e) => Some(format!("unknown ({e})")),
        }
    }

    /// Non-blocking liveness check of the current child.
    pub(crate) async fn child_exit(&self, generation: u64) -> Option<String> {
        let mut child = self.shared.child.lock().await;
        match child.as_mut() {
            Some(slot) if slot.generation == generation => match slot.process.try_wait() {
                Ok(Some(status)) => Some(status.to_string()),
                Ok(None) => None,
                Err(e) => Some(format!("unknown ({e})")),
            },
            _ => Some("no child process".to_string()),
        }
    }

    /// Stop the session.
    ///
    /// The graceful path asks the assistant to exit, interrupts it and
    /// escalates to a kill after the grace period; the forced path kills at
    /// once. Either way the session ends `Stopped` and any outstanding
    /// command resolves with `Terminated`. This never fails.
    pub async fn terminate(&self, graceful: bool) -> TerminateReport {
        let (retired, previous) = {
            let mut inner = self.shared.inner.lock().await;
            let previous = inner.machine.state();
            inner.restart_scheduled = false;
            inner.queued_config.clear();
            inner.breaker.abandon_trial();
            if let Some(pending) = inner.pending.take() {
                pending.resolve(Err(SessionError::Terminated));
            }
            if previous != SessionState::Stopped {
                let _ = inner.machine.transition(SessionState::ShuttingDown);
            }
            (inner.retire_generation(), previous)
        };

        if graceful && previous.is_active() {
            let writer = self.take_writer(retired);
            if let Some(mut slot) = writer {
                match tokio::time::timeout(EXIT_WRITE_TIMEOUT, slot.writer.write_line("/exit")).await {
                    Ok(Ok(())) => tracing::debug!("Sent /exit to assistant"),
                    Ok(Err(e)) => tracing::debug!(error = %e, "Could not send /exit"),
                    Err(_) => tracing::debug!("Timed out sending /exit"),
                }
            }
        } else {
            self.discard_writer(retired);
        }

        let mode = if graceful {
            Termination::Graceful
        } else {
            Termination::Forced
        };
        let exit_status = self.reap(retired, mode).await;

        {
            let mut inner = self.shared.inner.lock().await;
            // A start may have begun once ShuttingDown was left behind.
            if inner.generation == retired.wrapping_add(1) {
                let _ = inner.machine.transition(SessionState::Stopped);
            }
            if exit_status.is_some() {
                inner.last_exit.clone_from(&exit_status);
            }
        }

        tracing::info!(from = %previous, forced = !graceful, exit = ?exit_status, "Session stopped");
        TerminateReport {
            previous_state: previous,
            exit_status,
            forced: !graceful,
        }
    }

    fn take_writer(&self, generation: u64) -> Option<WriterSlot> {
        let mut slot = self.shared.writer.try_lock().ok()?;
        if slot.as_ref().is_some_and(|s| s.generation == generation) {
            slot.take()
        } else {
            None
        }
    }

    /// Graceful stop.
    pub async fn stop(&self) -> TerminateReport {
        self.terminate(true).await
    }

    /// Forced stop; always succeeds.
    pub async fn emergency_stop(&self) -> TerminateReport {
        tracing::warn!("Emergency stop requested");
        self.terminate(false).await
    }

    /// Add files to the chat context.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty path list, otherwise as [`send`](Self::send).
    pub async fn add_files(&self, paths: &[String]) -> Result<FilesUpdate, SessionError> {
        let paths = require_paths(paths)?;
        let response = self.send(&format!("/add {}", paths.join(" "))).await?;

        let mut inner = self.shared.inner.lock().await;
        for path in paths {
            if !inner.session.files.contains(&path) {
                inner.session.files.push(path);
            }
        }
        Ok(FilesUpdate {
            files: inner.session.files.clone(),
            response,
        })
    }

    /// Remove files from the chat context.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty path list, otherwise as [`send`](Self::send).
    pub async fn drop_files(&self, paths: &[String]) -> Result<FilesUpdate, SessionError> {
        let paths = require_paths(paths)?;
        let response = self.send(&format!("/drop {}", paths.join(" "))).await?;

        let mut inner = self.shared.inner.lock().await;
        inner.session.files.retain(|f| !paths.contains(f));
        Ok(FilesUpdate {
            files: inner.session.files.clone(),
            response,
        })
    }

    /// Run an assistant-native slash command; the leading slash is optional.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty command, otherwise as [`send`](Self::send).
    pub async fn run_command(&self, command: &str) -> Result<Response, SessionError> {
        let command = command.trim().trim_start_matches('/');
        if command.is_empty() {
            return Err(SessionError::InvalidArgument("command is empty".to_string()));
        }
        self.send(&format!("/{command}")).await
    }

    pub async fn list_files(&self) -> Vec<String> {
        self.shared.inner.lock().await.session.files.clone()
    }

    /// Merge a configuration patch.
    ///
    /// While a child is live, the matching in-chat commands are queued and
    /// sent ahead of the next command; otherwise the patch shapes the next
    /// launch.
    pub async fn configure(&self, patch: &ConfigPatch) -> ConfigureOutcome {
        let mut inner = self.shared.inner.lock().await;
        let commands = inner.session.config.apply(patch);
        let queued = if inner.machine.state().is_active() {
            inner.queued_config.extend(commands.iter().cloned());
            commands
        } else {
            Vec::new()
        };
        tracing::info!(?queued, "Configuration updated");
        ConfigureOutcome {
            config: inner.session.config.clone(),
            queued,
        }
    }

    /// Round-trip a probe command and measure its latency.
    pub async fn test_connection(&self) -> ConnectionReport {
        let started = Instant::now();
        let result = self
            .dispatch(PROBE_COMMAND, self.shared.config.timeouts.probe_grace(), false)
            .await;
        match result {
            Ok(_) => ConnectionReport {
                alive: true,
                latency_ms: Some(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)),
                error: None,
            },
            Err(e) => ConnectionReport {
                alive: false,
                latency_ms: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Wrap multi-line text in the assistant's multi-line block syntax.
#[must_use]
pub fn encode_command(text: &str) -> String {
    let text = text.replace('\r', "");
    if text.contains('\n') {
        format!("{{\n{text}\n}}")
    } else {
        text
    }
}

fn dedup_paths(paths: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(paths.len());
    for path in paths.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        if !out.iter().any(|p| p == path) {
            out.push(path.to_string());
        }
    }
    out
}

fn require_paths(paths: &[String]) -> Result<Vec<String>, SessionError> {
    let paths = dedup_paths(paths);
    if paths.is_empty() {
        return Err(SessionError::InvalidArgument("no paths given".to_string()));
    }
    Ok(paths)
}
