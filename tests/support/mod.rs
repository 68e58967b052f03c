//! Scripted stand-in for the assistant, driven through `/bin/sh`.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use aider_supervisor::config::ServiceConfig;
use aider_supervisor::supervisor::{SessionState, Supervisor};
use tempfile::TempDir;

const SCRIPT: &str = r#"
prompt() { @PROMPT@; }
echo "Aider v0.86.1"
echo "Main model: fake-model with diff edit format"
echo "Git repo: none"
echo "args: $*"
prompt
while IFS= read -r line; do
  case "$line" in
    crash) echo "boom" >&2; exit 3 ;;
    slow) sleep 1; echo "late"; prompt ;;
    hang) sleep 10 ;;
    tricky) echo "code: >"; echo ">"; echo "still going"; prompt ;;
    /exit) exit 0 ;;
    *) echo "you said: $line"; prompt ;;
  esac
done
"#;

/// A fake assistant script in a scratch directory.
pub struct FakeAssistant {
    pub dir: TempDir,
    pub script: PathBuf,
}

impl FakeAssistant {
    /// Prompt printed on its own line.
    pub fn new() -> Self {
        Self::with_prompt("echo '>'")
    }

    /// Prompt printed without a trailing newline, as interactive tools do.
    pub fn partial_prompt() -> Self {
        Self::with_prompt("printf '> '")
    }

    pub fn with_prompt(prompt: &str) -> Self {
        Self::with_script(&SCRIPT.replace("@PROMPT@", prompt))
    }

    pub fn with_script(body: &str) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let script = dir.path().join("fake-aider.sh");
        std::fs::write(&script, body).expect("write script");
        Self { dir, script }
    }

    /// Config that launches the script with short, test-sized timings.
    pub fn config(&self) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.assistant.binary = "/bin/sh".to_string();
        config.assistant.args = vec![self.script.display().to_string()];
        config.assistant.working_dir = Some(self.dir.path().to_path_buf());
        config.timeouts.start_secs = 5;
        config.timeouts.command_secs = 5;
        config.timeouts.quiescence_ms = 100;
        config.timeouts.health_interval_secs = 60;
        config.timeouts.idle_threshold_secs = 60;
        config.timeouts.probe_grace_secs = 2;
        config.timeouts.terminate_grace_ms = 500;
        config.timeouts.restart_delay_ms = 200;
        config
    }

    pub fn supervisor(&self) -> Supervisor {
        Supervisor::new(self.config()).expect("valid config")
    }
}

/// Poll until the session reaches `want` or `within` elapses.
pub async fn wait_for_state(supervisor: &Supervisor, want: SessionState, within: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if supervisor.state().await == want {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
