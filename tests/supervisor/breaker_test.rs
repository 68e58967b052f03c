//! Circuit breaker behaviour observed through the supervisor.

use std::time::Duration;

use aider_supervisor::config::ServiceConfig;
use aider_supervisor::supervisor::{BreakerState, SessionError, SessionState, StartRequest, Supervisor};
use tokio_test::{assert_err, assert_ok};

use crate::support::{wait_for_state, FakeAssistant};

fn missing_binary() -> Supervisor {
    let mut config = ServiceConfig::default();
    config.assistant.binary = "/nonexistent/aider-binary".to_string();
    config.breaker.failure_threshold = 3;
    config.breaker.cooldown_secs = 60;
    Supervisor::new(config).unwrap()
}

#[tokio::test]
async fn repeated_spawn_failures_open_circuit() {
    let supervisor = missing_binary();

    for _ in 0..3 {
        let err = supervisor.start(StartRequest::default()).await.unwrap_err();
        assert!(matches!(err, SessionError::Spawn(_)), "{err:?}");
        assert_eq!(supervisor.state().await, SessionState::Stopped);
    }

    let err = supervisor.start(StartRequest::default()).await.unwrap_err();
    let SessionError::CircuitOpen { retry_in } = err else {
        panic!("expected circuit open, got {err:?}");
    };
    assert!(retry_in.as_secs() <= 60);

    // Rejected without attempting another spawn.
    let debug = supervisor.debug_info().await;
    assert_eq!(debug.spawn_attempts, 3);
    assert_eq!(debug.circuit.state, BreakerState::Open);
    assert_eq!(debug.circuit.trips, 1);
    assert!(debug.circuit.retry_in_ms.is_some());
    assert!(debug.last_error.unwrap().contains("spawn failed"));
    assert_eq!(supervisor.status().await.breaker, BreakerState::Open);
}

#[tokio::test]
async fn emergency_stop_always_succeeds() {
    let supervisor = missing_binary();
    let report = supervisor.emergency_stop().await;
    assert_eq!(report.previous_state, SessionState::Stopped);
    assert_eq!(supervisor.state().await, SessionState::Stopped);
}

/// Fake assistant whose next launch is steered by marker files beside it:
/// `exit` makes it quit before the prompt, `stall` makes it never prompt.
const STEERED: &str = r#"
dir=$(dirname "$0")
[ -f "$dir/exit" ] && exit 4
[ -f "$dir/stall" ] && { sleep 10; exit 0; }
echo '>'
while IFS= read -r line; do
  case "$line" in
    crash) exit 3 ;;
    /exit) exit 0 ;;
    *) echo "you said: $line"; echo '>' ;;
  esac
done
"#;

/// Supervisor whose breaker trips on the first crash, with a 1s cooldown.
fn tripped_on_crash(fake: &FakeAssistant) -> Supervisor {
    let mut config = fake.config();
    config.breaker.failure_threshold = 1;
    config.breaker.cooldown_secs = 1;
    config.breaker.backoff_multiplier = 2.0;
    config.breaker.max_cooldown_secs = 60;
    Supervisor::new(config).unwrap()
}

async fn crash_and_trip(supervisor: &Supervisor) {
    assert_ok!(supervisor.start(StartRequest::default()).await);
    let err = supervisor.send("crash").await.unwrap_err();
    assert!(err.is_crash(), "{err:?}");
    assert_eq!(supervisor.state().await, SessionState::Crashed);
    assert_eq!(supervisor.status().await.breaker, BreakerState::Open);
}

async fn serve_cooldown() {
    tokio::time::sleep(Duration::from_millis(1200)).await;
}

#[tokio::test]
async fn trial_start_that_reaches_ready_closes_circuit() {
    let fake = FakeAssistant::with_script(STEERED);
    let supervisor = tripped_on_crash(&fake);
    crash_and_trip(&supervisor).await;

    let err = supervisor.start(StartRequest::default()).await.unwrap_err();
    assert!(matches!(err, SessionError::CircuitOpen { .. }), "{err:?}");

    serve_cooldown().await;
    assert_ok!(supervisor.start(StartRequest::default()).await);
    assert_eq!(supervisor.state().await, SessionState::Ready);

    let debug = supervisor.debug_info().await;
    assert_eq!(debug.circuit.state, BreakerState::Closed);
    assert_eq!(debug.circuit.trips, 1);
    assert_eq!(debug.circuit.cooldown_ms, 1000);
    assert_eq!(debug.circuit.window_failures, 0);

    supervisor.stop().await;
}

#[tokio::test]
async fn failed_trial_start_reopens_with_longer_cooldown() {
    let fake = FakeAssistant::with_script(STEERED);
    let supervisor = tripped_on_crash(&fake);
    crash_and_trip(&supervisor).await;

    std::fs::write(fake.dir.path().join("exit"), "").unwrap();
    serve_cooldown().await;
    assert_err!(supervisor.start(StartRequest::default()).await);

    let debug = supervisor.debug_info().await;
    assert_eq!(debug.circuit.state, BreakerState::Open);
    assert_eq!(debug.circuit.trips, 2);
    assert_eq!(debug.circuit.cooldown_ms, 2000);

    let err = supervisor.start(StartRequest::default()).await.unwrap_err();
    let SessionError::CircuitOpen { retry_in } = err else {
        panic!("expected circuit open, got {err:?}");
    };
    assert!(retry_in > Duration::from_secs(1), "{retry_in:?}");

    supervisor.emergency_stop().await;
}

#[tokio::test]
async fn stopping_a_trial_start_keeps_circuit_recoverable() {
    let fake = FakeAssistant::with_script(STEERED);
    let supervisor = tripped_on_crash(&fake);
    crash_and_trip(&supervisor).await;

    let stall = fake.dir.path().join("stall");
    std::fs::write(&stall, "").unwrap();
    serve_cooldown().await;

    let trial = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.start(StartRequest::default()).await })
    };
    assert!(wait_for_state(&supervisor, SessionState::Starting, Duration::from_secs(2)).await);
    assert_eq!(supervisor.status().await.breaker, BreakerState::HalfOpen);

    supervisor.emergency_stop().await;
    let err = trial.await.unwrap().unwrap_err();
    assert!(matches!(err, SessionError::Terminated), "{err:?}");
    assert_eq!(supervisor.state().await, SessionState::Stopped);
    assert_eq!(supervisor.status().await.breaker, BreakerState::Open);

    // The stopped trial neither closed nor re-tripped the circuit.
    let debug = supervisor.debug_info().await;
    assert_eq!(debug.circuit.trips, 1);
    assert_eq!(debug.circuit.retry_in_ms, Some(0));

    std::fs::remove_file(&stall).unwrap();
    assert_ok!(supervisor.start(StartRequest::default()).await);
    assert_eq!(supervisor.status().await.breaker, BreakerState::Closed);

    supervisor.stop().await;
}
