//! Tests for assistant process spawning and control.

use std::time::Duration;

use aider_supervisor::config::{AssistantConfig, ChatMode, SessionConfig};
use aider_supervisor::process::{AssistantProcess, AssistantProcessBuilder, SpawnError};
use tokio::io::AsyncReadExt;

fn sh(script: &str) -> AssistantConfig {
    AssistantConfig {
        binary: "/bin/sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
        working_dir: None,
    }
}

#[test]
fn builder_orders_static_session_and_file_args() {
    let session = SessionConfig {
        model: Some("m1".to_string()),
        mode: ChatMode::Architect,
        ..SessionConfig::default()
    };
    let args = AssistantProcessBuilder::new(&AssistantConfig::default())
        .session(&session)
        .files(&["a.py".to_string(), "b.py".to_string()])
        .build_args();

    assert_eq!(args.first().map(String::as_str), Some("--no-pretty"));
    let model = args.iter().position(|a| a == "--model").unwrap();
    assert_eq!(args[model + 1], "m1");
    assert!(args.contains(&"--architect".to_string()));
    assert_eq!(&args[args.len() - 2..], ["a.py", "b.py"]);
}

#[test]
fn builder_working_dir_comes_from_config() {
    let mut config = AssistantConfig::default();
    config.working_dir = Some("/tmp/project".into());
    let builder = AssistantProcessBuilder::new(&config);
    assert_eq!(
        builder.get_working_dir().map(|p| p.display().to_string()),
        Some("/tmp/project".to_string())
    );
}

#[tokio::test]
async fn spawn_missing_binary_is_not_found() {
    let config = AssistantConfig {
        binary: "/nonexistent/aider-binary".to_string(),
        args: Vec::new(),
        working_dir: None,
    };
    let err = AssistantProcess::spawn(&AssistantProcessBuilder::new(&config)).unwrap_err();
    assert!(matches!(err, SpawnError::NotFound(_)));
}

#[tokio::test]
async fn spawn_pipes_all_streams() {
    let builder = AssistantProcessBuilder::new(&sh("echo out; echo err >&2"));
    let mut process = AssistantProcess::spawn(&builder).unwrap();
    assert!(process.id().is_some());

    let mut stdout = process.take_stdout().unwrap();
    let mut stderr = process.take_stderr().unwrap();
    assert!(process.take_stdin().is_some());
    assert!(process.take_stdout().is_none());

    let mut out = String::new();
    stdout.read_to_string(&mut out).await.unwrap();
    let mut err = String::new();
    stderr.read_to_string(&mut err).await.unwrap();
    assert_eq!(out.trim(), "out");
    assert_eq!(err.trim(), "err");

    let status = process.wait().await.unwrap();
    assert!(status.success());
}

#[tokio::test]
async fn graceful_terminate_escalates_to_kill() {
    // Ignores SIGINT, so only the kill ends it.
    let builder = AssistantProcessBuilder::new(&sh("trap '' INT; sleep 30"));
    let mut process = AssistantProcess::spawn(&builder).unwrap();

    let started = std::time::Instant::now();
    process
        .graceful_terminate(Duration::from_millis(200))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(process.try_wait().unwrap().is_some());
}

#[tokio::test]
async fn kill_reaps_process() {
    let builder = AssistantProcessBuilder::new(&sh("sleep 30"));
    let mut process = AssistantProcess::spawn(&builder).unwrap();
    process.kill().await.unwrap();
    assert!(process.try_wait().unwrap().is_some());
}
