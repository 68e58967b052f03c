//! Circuit breaker gating assistant (re)starts.
//!
//! Failures are counted in a rolling window. Reaching the threshold trips
//! the breaker; after the cooldown a single trial start is admitted, and
//! only that trial's outcome decides whether the breaker closes again or
//! reopens with a longer cooldown.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::BreakerConfig;

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open => f.write_str("open"),
            Self::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Point-in-time view of the breaker counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    /// Failures inside the current window.
    pub window_failures: usize,
    /// Failures since the breaker was created.
    pub total_failures: u64,
    pub trips: u64,
    /// Cooldown that applies on the next trip, in milliseconds.
    pub cooldown_ms: u64,
    /// Remaining time until a trial is admitted, when Open.
    pub retry_in_ms: Option<u64>,
}

/// Failure-counting gate for process starts.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    failures: VecDeque<Instant>,
    open_until: Option<Instant>,
    cooldown: Duration,
    total_failures: u64,
    trips: u64,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        let cooldown = Duration::from_secs(config.cooldown_secs);
        Self {
            config,
            state: BreakerState::Closed,
            failures: VecDeque::new(),
            open_until: None,
            cooldown,
            total_failures: 0,
            trips: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> BreakerState {
        self.state
    }

    /// Ask for permission to start a process now.
    ///
    /// # Errors
    ///
    /// Returns the remaining cooldown when the start must be suppressed.
    pub fn try_acquire(&mut self) -> Result<(), Duration> {
        self.try_acquire_at(Instant::now())
    }

    /// [`try_acquire`](Self::try_acquire) against an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns the remaining cooldown when the start must be suppressed.
    pub fn try_acquire_at(&mut self, now: Instant) -> Result<(), Duration> {
        match self.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let until = self.open_until.unwrap_or(now);
                if now >= until {
                    tracing::info!("Circuit half-open, admitting one trial start");
                    self.state = BreakerState::HalfOpen;
                    Ok(())
                } else {
                    Err(until - now)
                }
            }
            // The single trial is already in flight.
            BreakerState::HalfOpen => Err(Duration::ZERO),
        }
    }

    /// Record that a start reached Ready.
    pub fn record_success(&mut self) {
        if self.state == BreakerState::HalfOpen {
            tracing::info!("Circuit closed, trial start succeeded");
            self.cooldown = Duration::from_secs(self.config.cooldown_secs);
        }
        self.state = BreakerState::Closed;
        self.open_until = None;
        self.failures.clear();
    }

    /// Record a crash, failed start or failed health escalation.
    pub fn record_failure(&mut self) {
        self.record_failure_at(Instant::now());
    }

    /// [`record_failure`](Self::record_failure) against an explicit clock.
    pub fn record_failure_at(&mut self, now: Instant) {
        self.total_failures = self.total_failures.saturating_add(1);

        match self.state {
            BreakerState::Closed => {
                let window = Duration::from_secs(self.config.window_secs);
                self.failures.push_back(now);
                while self
                    .failures
                    .front()
                    .is_some_and(|t| now.saturating_duration_since(*t) >= window)
                {
                    self.failures.pop_front();
                }

                if self.failures.len() >= self.config.failure_threshold.max(1) as usize {
                    tracing::warn!(
                        failures = self.failures.len(),
                        cooldown_secs = self.cooldown.as_secs(),
                        "Circuit tripped"
                    );
                    self.trip(now);
                }
            }
            BreakerState::HalfOpen => {
                let max = Duration::from_secs(self.config.max_cooldown_secs);
                let scaled = self.cooldown.as_secs_f64() * self.config.backoff_multiplier.max(1.0);
                self.cooldown = Duration::try_from_secs_f64(scaled).unwrap_or(max).min(max);
                tracing::warn!(
                    cooldown_secs = self.cooldown.as_secs(),
                    "Trial start failed, circuit re-tripped"
                );
                self.trip(now);
            }
            BreakerState::Open => {}
        }
    }

    /// Give back an interrupted trial without judging it.
    ///
    /// A trial stopped before it could succeed or fail leaves the breaker
    /// Open with the cooldown already served, so the next start is the new
    /// trial.
    pub fn abandon_trial(&mut self) {
        self.abandon_trial_at(Instant::now());
    }

    /// [`abandon_trial`](Self::abandon_trial) against an explicit clock.
    pub fn abandon_trial_at(&mut self, now: Instant) {
        if self.state == BreakerState::HalfOpen {
            tracing::info!("Trial start abandoned, circuit open for retry");
            self.state = BreakerState::Open;
            self.open_until = Some(now);
        }
    }

    fn trip(&mut self, now: Instant) {
        self.state = BreakerState::Open;
        self.open_until = Some(now + self.cooldown);
        self.failures.clear();
        self.trips = self.trips.saturating_add(1);
    }

    #[must_use]
    pub fn snapshot(&self) -> BreakerSnapshot {
        let now = Instant::now();
        BreakerSnapshot {
            state: self.state,
            window_failures: self.failures.len(),
            total_failures: self.total_failures,
            trips: self.trips,
            cooldown_ms: u64::try_from(self.cooldown.as_millis()).unwrap_or(u64::MAX),
            retry_in_ms: match (self.state, self.open_until) {
                (BreakerState::Open, Some(until)) => Some(
                    u64::try_from(until.saturating_duration_since(now).as_millis())
                        .unwrap_or(u64::MAX),
                ),
                _ => None,
            },
        }
    }
}
