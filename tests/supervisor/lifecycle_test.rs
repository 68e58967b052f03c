//! Start, send and stop against the fake assistant.

use std::time::Duration;

use aider_supervisor::config::ConfigPatch;
use aider_supervisor::supervisor::{HealthStatus, SessionError, SessionState, StartRequest};
use tokio_test::{assert_err, assert_ok};

use crate::support::{wait_for_state, FakeAssistant};

fn files(names: &[&str]) -> Vec<String> {
    names.iter().map(ToString::to_string).collect()
}

#[tokio::test]
async fn start_reaches_ready_with_filtered_banner() {
    let fake = FakeAssistant::new();
    let supervisor = fake.supervisor();

    let outcome = supervisor
        .start(StartRequest {
            files: files(&["a.py"]),
            config: ConfigPatch {
                model: Some("m1".to_string()),
                ..ConfigPatch::default()
            },
            ..StartRequest::default()
        })
        .await
        .unwrap();

    assert!(outcome.startup.ready);
    assert_eq!(outcome.startup.lines.len(), 1, "{:?}", outcome.startup.lines);
    let args = &outcome.startup.lines[0];
    assert!(args.starts_with("args: "));
    assert!(args.contains("--model m1"));
    assert!(args.ends_with("a.py"));
    assert!(outcome.initial.is_none());

    let status = supervisor.status().await;
    assert_eq!(status.state, SessionState::Ready);
    assert_eq!(status.session_id, outcome.session_id);
    assert!(status.pid.is_some());
    assert!(status.spawned_at.is_some());
    assert_eq!(supervisor.list_files().await, files(&["a.py"]));

    supervisor.stop().await;
}

#[tokio::test]
async fn send_returns_ready_response() {
    let fake = FakeAssistant::new();
    let supervisor = fake.supervisor();
    assert_ok!(supervisor.start(StartRequest::default()).await);

    let response = supervisor.send("hello").await.unwrap();
    assert!(response.ready);
    assert_eq!(response.lines, vec!["you said: hello"]);

    let response = supervisor.send("second").await.unwrap();
    assert_eq!(response.text(), "you said: second");
    assert_eq!(supervisor.state().await, SessionState::Ready);

    supervisor.stop().await;
}

#[tokio::test]
async fn initial_message_is_sent_after_startup() {
    let fake = FakeAssistant::new();
    let supervisor = fake.supervisor();

    let outcome = supervisor
        .start(StartRequest {
            message: Some("plan the work".to_string()),
            ..StartRequest::default()
        })
        .await
        .unwrap();
    let initial = outcome.initial.unwrap();
    assert_eq!(initial.lines, vec!["you said: plan the work"]);

    supervisor.stop().await;
}

#[tokio::test]
async fn prompt_inside_flowing_output_is_not_readiness() {
    let fake = FakeAssistant::new();
    let supervisor = fake.supervisor();
    assert_ok!(supervisor.start(StartRequest::default()).await);

    let response = supervisor.send("tricky").await.unwrap();
    assert!(response.ready);
    assert_eq!(response.lines, vec!["code: >", ">", "still going"]);

    supervisor.stop().await;
}

#[tokio::test]
async fn unterminated_prompt_is_detected() {
    let fake = FakeAssistant::partial_prompt();
    let supervisor = fake.supervisor();
    assert_ok!(supervisor.start(StartRequest::default()).await);

    let response = supervisor.send("hi").await.unwrap();
    assert_eq!(response.lines, vec!["you said: hi"]);

    supervisor.stop().await;
}

#[tokio::test]
async fn start_twice_is_invalid_state() {
    let fake = FakeAssistant::new();
    let supervisor = fake.supervisor();
    assert_ok!(supervisor.start(StartRequest::default()).await);

    let err = supervisor.start(StartRequest::default()).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidState {
            state: SessionState::Ready,
            ..
        }
    ));

    supervisor.stop().await;
}

#[tokio::test]
async fn send_while_busy_is_rejected_without_side_effect() {
    let fake = FakeAssistant::new();
    let supervisor = fake.supervisor();
    assert_ok!(supervisor.start(StartRequest::default()).await);

    let busy = supervisor.clone();
    let slow = tokio::spawn(async move { busy.send("slow").await });
    assert!(wait_for_state(&supervisor, SessionState::Busy, Duration::from_secs(2)).await);

    let err = supervisor.send("hello").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidState {
            state: SessionState::Busy,
            ..
        }
    ));

    // The slow reply is not polluted by the rejected command.
    let response = slow.await.unwrap().unwrap();
    assert_eq!(response.lines, vec!["late"]);
    assert_eq!(supervisor.debug_info().await.protocol_anomalies, 0);

    supervisor.stop().await;
}

#[tokio::test]
async fn command_timeout_marks_unresponsive_then_recovers() {
    let fake = FakeAssistant::new();
    let supervisor = fake.supervisor();
    assert_ok!(supervisor.start(StartRequest::default()).await);

    let err = supervisor
        .send_with_timeout("slow", Duration::from_millis(300))
        .await
        .unwrap_err();
    let SessionError::CommandTimeout { partial, .. } = err else {
        panic!("expected timeout, got {err:?}");
    };
    assert!(!partial.ready);
    assert_eq!(supervisor.state().await, SessionState::Unresponsive);
    assert_eq!(supervisor.health_check().await, HealthStatus::Unresponsive);

    // The late prompt returns the session to Ready.
    assert!(wait_for_state(&supervisor, SessionState::Ready, Duration::from_secs(3)).await);
    let response = supervisor.send("after").await.unwrap();
    assert_eq!(response.lines, vec!["you said: after"]);

    supervisor.stop().await;
}

#[tokio::test]
async fn file_context_is_tracked() {
    let fake = FakeAssistant::new();
    let supervisor = fake.supervisor();
    assert_ok!(
        supervisor
            .start(StartRequest {
                files: files(&["a.py"]),
                ..StartRequest::default()
            })
            .await
    );

    let update = supervisor.add_files(&files(&["b.py", "a.py", "c.py"])).await.unwrap();
    assert_eq!(update.response.lines, vec!["you said: /add b.py a.py c.py"]);
    assert_eq!(update.files, files(&["a.py", "b.py", "c.py"]));

    let update = supervisor.drop_files(&files(&["a.py"])).await.unwrap();
    assert_eq!(update.response.lines, vec!["you said: /drop a.py"]);
    assert_eq!(supervisor.list_files().await, files(&["b.py", "c.py"]));

    assert_err!(supervisor.add_files(&[]).await);

    supervisor.stop().await;
}

#[tokio::test]
async fn run_command_adds_slash() {
    let fake = FakeAssistant::new();
    let supervisor = fake.supervisor();
    assert_ok!(supervisor.start(StartRequest::default()).await);

    let response = supervisor.run_command("diff").await.unwrap();
    assert_eq!(response.lines, vec!["you said: /diff"]);
    let response = supervisor.run_command("/tokens").await.unwrap();
    assert_eq!(response.lines, vec!["you said: /tokens"]);

    let err = supervisor.run_command("  / ").await.unwrap_err();
    assert_eq!(err.kind(), "invalid_argument");

    supervisor.stop().await;
}

#[tokio::test]
async fn configure_is_applied_before_next_command() {
    let fake = FakeAssistant::new();
    let supervisor = fake.supervisor();
    assert_ok!(supervisor.start(StartRequest::default()).await);

    let outcome = supervisor
        .configure(&ConfigPatch {
            model: Some("m2".to_string()),
            auto_test: Some(true),
            ..ConfigPatch::default()
        })
        .await;
    assert_eq!(outcome.queued, vec!["/model m2", "/auto-test"]);
    assert_eq!(supervisor.debug_info().await.queued_config.len(), 2);

    let response = supervisor.send("hello").await.unwrap();
    assert_eq!(response.lines, vec!["you said: hello"]);

    let debug = supervisor.debug_info().await;
    assert!(debug.queued_config.is_empty());
    assert_eq!(debug.config.model.as_deref(), Some("m2"));
    assert!(debug.stdout_tail.iter().any(|l| l == "you said: /model m2"));
    assert!(debug.stdout_tail.iter().any(|l| l == "you said: /auto-test"));

    supervisor.stop().await;
}

#[tokio::test]
async fn repeated_command_trips_loop_guard() {
    let fake = FakeAssistant::new();
    let supervisor = fake.supervisor();
    assert_ok!(supervisor.start(StartRequest::default()).await);

    for _ in 0..3 {
        assert_ok!(supervisor.send("/test").await);
    }
    let err = supervisor.send("/test").await.unwrap_err();
    assert_eq!(err.kind(), "loop_detected");
    assert_eq!(supervisor.state().await, SessionState::Ready);

    supervisor.stop().await;
}

#[tokio::test]
async fn test_connection_reports_latency() {
    let fake = FakeAssistant::new();
    let supervisor = fake.supervisor();

    let report = supervisor.test_connection().await;
    assert!(!report.alive);
    assert!(report.error.is_some());

    assert_ok!(supervisor.start(StartRequest::default()).await);
    let report = supervisor.test_connection().await;
    assert!(report.alive, "{:?}", report.error);
    assert!(report.latency_ms.is_some());
    assert_eq!(supervisor.health_check().await, HealthStatus::Healthy);

    supervisor.stop().await;
}

#[tokio::test]
async fn graceful_stop_ends_stopped() {
    let fake = FakeAssistant::new();
    let supervisor = fake.supervisor();
    assert_ok!(supervisor.start(StartRequest::default()).await);

    let report = supervisor.stop().await;
    assert_eq!(report.previous_state, SessionState::Ready);
    assert!(!report.forced);
    assert!(report.exit_status.is_some());
    assert_eq!(supervisor.state().await, SessionState::Stopped);
    assert!(supervisor.status().await.pid.is_none());
    assert_eq!(supervisor.health_check().await, HealthStatus::Dead);

    // A stopped session can be started again.
    assert_ok!(supervisor.start(StartRequest::default()).await);
    supervisor.emergency_stop().await;
}

#[tokio::test]
async fn emergency_stop_resolves_in_flight_send() {
    let fake = FakeAssistant::new();
    let supervisor = fake.supervisor();
    assert_ok!(supervisor.start(StartRequest::default()).await);

    let busy = supervisor.clone();
    let hung = tokio::spawn(async move { busy.send("hang").await });
    assert!(wait_for_state(&supervisor, SessionState::Busy, Duration::from_secs(2)).await);

    let report = supervisor.emergency_stop().await;
    assert!(report.forced);
    assert_eq!(report.previous_state, SessionState::Busy);

    let err = hung.await.unwrap().unwrap_err();
    assert!(matches!(err, SessionError::Terminated));
    assert_eq!(supervisor.state().await, SessionState::Stopped);
    assert!(supervisor.debug_info().await.pending.is_none());
}
