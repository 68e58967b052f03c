//! Supervisor module tests.

mod breaker_test;
mod lifecycle_test;

/// Verify the public supervisor types are exported from the library.
#[test]
fn test_all_supervisor_types_exported() {
    use aider_supervisor::config::{BreakerConfig, ServiceConfig};
    use aider_supervisor::supervisor::{
        BreakerState, CircuitBreaker, HealthStatus, LoopGuard, Response, SessionError,
        SessionState, SessionStateMachine, StartRequest, Supervisor,
    };

    let _ = CircuitBreaker::new(BreakerConfig::default());
    let _ = SessionStateMachine::new();
    let _ = LoopGuard::default();
    let _ = StartRequest::default();
    let _ = Response::default();
    assert!(Supervisor::new(ServiceConfig::default()).is_ok());

    let _: fn() -> SessionError = || SessionError::Terminated;
    let _ = BreakerState::HalfOpen;
    let _ = HealthStatus::Unresponsive;
    let _ = SessionState::ShuttingDown;
}
