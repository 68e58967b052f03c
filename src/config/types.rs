//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Conversation mode of the assistant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    #[default]
    Normal,
    Architect,
}

/// How the assistant binary is launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Executable to spawn.
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Arguments passed on every launch, ahead of the session arguments.
    #[serde(default = "default_static_args")]
    pub args: Vec<String>,
    /// Working directory for the child. Defaults to the service's cwd.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

fn default_binary() -> String {
    "aider".to_string()
}

fn default_static_args() -> Vec<String> {
    [
        "--no-pretty",
        "--no-stream",
        "--no-show-model-warnings",
        "--no-suggest-shell-commands",
        "--yes-always",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            args: default_static_args(),
            working_dir: None,
        }
    }
}

/// Per-session settings that the assistant itself understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Model name. `None` keeps the assistant's default.
    pub model: Option<String>,
    pub mode: ChatMode,
    pub auto_commit: bool,
    pub auto_test: bool,
    pub lint: Option<bool>,
    pub test_cmd: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: None,
            mode: ChatMode::Normal,
            auto_commit: true,
            auto_test: false,
            lint: None,
            test_cmd: None,
        }
    }
}

impl SessionConfig {
    /// Command-line arguments that reproduce this configuration at launch.
    #[must_use]
    pub fn launch_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(model) = &self.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        if self.mode == ChatMode::Architect {
            args.push("--architect".to_string());
        }
        args.push(if self.auto_commit { "--auto-commits" } else { "--no-auto-commits" }.to_string());
        args.push(if self.auto_test { "--auto-test" } else { "--no-auto-test" }.to_string());
        if let Some(lint) = self.lint {
            args.push(if lint { "--auto-lint" } else { "--no-auto-lint" }.to_string());
        }
        if let Some(cmd) = &self.test_cmd {
            args.push("--test-cmd".to_string());
            args.push(cmd.clone());
        }

        args
    }

    /// Merge a patch into this configuration.
    ///
    /// Returns the in-chat commands that apply the same change to a running
    /// assistant, in the order the fields are declared on [`ConfigPatch`].
    pub fn apply(&mut self, patch: &ConfigPatch) -> Vec<String> {
        let mut commands = Vec::new();

        if let Some(model) = &patch.model {
            self.model = Some(model.clone());
            commands.push(format!("/model {model}"));
        }
        if let Some(mode) = patch.mode {
            self.mode = mode;
            commands.push(match mode {
                ChatMode::Architect => "/chat-mode architect".to_string(),
                ChatMode::Normal => "/chat-mode code".to_string(),
            });
        }
        if let Some(on) = patch.auto_commit {
            self.auto_commit = on;
            commands.push(if on { "/auto-commits" } else { "/no-auto-commits" }.to_string());
        }
        if let Some(on) = patch.auto_test {
            self.auto_test = on;
            commands.push(if on { "/auto-test" } else { "/no-auto-test" }.to_string());
        }
        if let Some(on) = patch.lint {
            self.lint = Some(on);
            commands.push(if on { "/lint" } else { "/no-lint" }.to_string());
        }
        if let Some(cmd) = &patch.test_cmd {
            self.test_cmd = Some(cmd.clone());
            commands.push(format!("/test-cmd {cmd}"));
        }

        commands
    }
}

/// Partial update for [`SessionConfig`]. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigPatch {
    pub model: Option<String>,
    pub mode: Option<ChatMode>,
    pub auto_commit: Option<bool>,
    pub auto_test: Option<bool>,
    pub lint: Option<bool>,
    pub test_cmd: Option<String>,
}

impl ConfigPatch {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Overlay `other` on top of this patch; fields set in `other` win.
    #[must_use]
    pub fn merged(mut self, other: &ConfigPatch) -> Self {
        if other.model.is_some() {
            self.model.clone_from(&other.model);
        }
        if other.mode.is_some() {
            self.mode = other.mode;
        }
        if other.auto_commit.is_some() {
            self.auto_commit = other.auto_commit;
        }
        if other.auto_test.is_some() {
            self.auto_test = other.auto_test;
        }
        if other.lint.is_some() {
            self.lint = other.lint;
        }
        if other.test_cmd.is_some() {
            self.test_cmd.clone_from(&other.test_cmd);
        }
        self
    }
}

/// Deadlines and intervals used by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Maximum wait for the first prompt after spawning.
    pub start_secs: u64,
    /// Default maximum wait for a command's prompt.
    pub command_secs: u64,
    /// Silence required after a prompt marker before it is trusted.
    pub quiescence_ms: u64,
    /// Period of the health task.
    pub health_interval_secs: u64,
    /// Inactivity after which a Ready session is probed.
    pub idle_threshold_secs: u64,
    /// How long a health probe may take before the session is Unresponsive.
    pub probe_grace_secs: u64,
    /// Grace period between the interrupt signal and a forced kill.
    pub terminate_grace_ms: u64,
    /// Delay before an automatic restart after a crash.
    pub restart_delay_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            start_secs: 60,
            command_secs: 240,
            quiescence_ms: 2000,
            health_interval_secs: 15,
            idle_threshold_secs: 120,
            probe_grace_secs: 10,
            terminate_grace_ms: 10_000,
            restart_delay_ms: 500,
        }
    }
}

impl TimeoutConfig {
    #[must_use]
    pub fn start(&self) -> Duration {
        Duration::from_secs(self.start_secs)
    }

    #[must_use]
    pub fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }

    #[must_use]
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }

    #[must_use]
    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    #[must_use]
    pub fn probe_grace(&self) -> Duration {
        Duration::from_secs(self.probe_grace_secs)
    }

    #[must_use]
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    #[must_use]
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// Circuit breaker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures within the window that trip the breaker.
    pub failure_threshold: u32,
    pub window_secs: u64,
    /// First cooldown after tripping.
    pub cooldown_secs: u64,
    /// Factor applied to the cooldown each time a half-open trial fails.
    pub backoff_multiplier: f64,
    pub max_cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            window_secs: 300,
            cooldown_secs: 30,
            backoff_multiplier: 2.0,
            max_cooldown_secs: 600,
        }
    }
}

/// Output filter tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Regex matched against a trimmed, escape-free line to detect the idle prompt.
    pub prompt_pattern: String,
    /// Additional noise regexes, appended to the built-in banner set.
    pub extra_noise: Vec<String>,
    /// Lines of each stream kept for diagnostics.
    pub tail_lines: usize,
    /// Responses longer than this are truncated.
    pub max_response_lines: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            prompt_pattern: crate::filter::DEFAULT_PROMPT_PATTERN.to_string(),
            extra_noise: Vec::new(),
            tail_lines: 50,
            max_response_lines: 1000,
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Initial log level, overridable at runtime.
    pub log_level: Option<String>,
    pub assistant: AssistantConfig,
    pub session: SessionConfig,
    pub timeouts: TimeoutConfig,
    pub breaker: BreakerConfig,
    pub filter: FilterConfig,
}
