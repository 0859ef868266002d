//! Per-target circuit breaker for the intent dispatcher.
//!
//! The breaker fails dispatches fast once a target has failed repeatedly,
//! then self-tests recovery after a cool-down.
//!
//! # States
//!
//! - **Closed**: Normal operation. Failures accrue in a sliding window and
//!   `failure_threshold` failures inside `failure_window` open the circuit.
//! - **Open**: Every dispatch is rejected. After `cooldown` the dispatcher's
//!   deferred task (or the next admission check, whichever runs first) moves
//!   the breaker to half-open.
//! - **Half-Open**: Exactly one trial dispatch is admitted. Success closes the
//!   circuit and clears the failure counter; failure re-opens it.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;

/// State of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - dispatches allowed
    Closed,
    /// Blocking all dispatches - too many failures
    Open,
    /// Testing recovery - allowing one dispatch
    HalfOpen,
}

impl CircuitState {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CLOSED" => Ok(CircuitState::Closed),
            "OPEN" => Ok(CircuitState::Open),
            "HALF_OPEN" => Ok(CircuitState::HalfOpen),
            _ => Err(format!("Unknown circuit state: {}", s)),
        }
    }
}

/// Serializable view of one target's breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    /// Dispatch target the breaker guards
    pub target: String,
    /// Current state
    pub state: CircuitState,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Time of the most recent failure
    pub last_failure_timestamp: Option<DateTime<Utc>>,
}

/// Circuit breaker guarding a single dispatch target.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    target: String,
    state: CircuitState,
    consecutive_failures: u32,
    total_failures: u32,
    total_successes: u32,
    /// Failure instants inside the sliding window (closed state only)
    recent_failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    /// Incremented on every transition to open; stale cool-down tasks compare against it
    open_generation: u64,
    trial_in_flight: bool,
    last_failure: Option<DateTime<Utc>>,
    last_state_change: DateTime<Utc>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    /// Create a new closed circuit breaker for `target`.
    pub fn new(target: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            target: target.into(),
            state: CircuitState::Closed,
            consecutive_failures: 0,
            total_failures: 0,
            total_successes: 0,
            recent_failures: VecDeque::new(),
            opened_at: None,
            open_generation: 0,
            trial_in_flight: false,
            last_failure: None,
            last_state_change: Utc::now(),
            config,
        }
    }

    /// Check whether a dispatch may proceed, claiming the half-open trial
    /// slot if that is what admits it.
    pub fn try_acquire(&mut self) -> bool {
        if self.state == CircuitState::Open && self.cooldown_elapsed() {
            self.transition_to(CircuitState::HalfOpen);
        }

        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if self.trial_in_flight {
                    false
                } else {
                    self.trial_in_flight = true;
                    true
                }
            }
        }
    }

    /// Record a successful dispatch.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.total_successes += 1;

        match self.state {
            CircuitState::HalfOpen => {
                self.recent_failures.clear();
                self.trial_in_flight = false;
                self.transition_to(CircuitState::Closed);
            }
            CircuitState::Open => {
                tracing::warn!(
                    target_name = %self.target,
                    "Success recorded while circuit is open - ignoring"
                );
            }
            CircuitState::Closed => {}
        }
    }

    /// Record a failed dispatch.
    ///
    /// Returns the open generation when this failure opened the circuit, so
    /// the caller can schedule the deferred move to half-open.
    pub fn record_failure(&mut self) -> Option<u64> {
        let now = Instant::now();
        self.consecutive_failures += 1;
        self.total_failures += 1;
        self.last_failure = Some(Utc::now());

        match self.state {
            CircuitState::Closed => {
                self.recent_failures.push_back(now);
                self.prune_window(now);
                if self.recent_failures.len() as u32 >= self.config.failure_threshold {
                    self.open(now);
                    return Some(self.open_generation);
                }
                None
            }
            CircuitState::HalfOpen => {
                // Failed trial goes straight back to open
                self.trial_in_flight = false;
                self.open(now);
                Some(self.open_generation)
            }
            CircuitState::Open => None,
        }
    }

    /// Move an open circuit to half-open if `generation` is still current.
    ///
    /// Called by the deferred cool-down task. Returns whether the transition
    /// happened.
    pub fn enter_half_open(&mut self, generation: u64) -> bool {
        if self.state == CircuitState::Open && self.open_generation == generation {
            self.transition_to(CircuitState::HalfOpen);
            true
        } else {
            false
        }
    }

    /// Give back a half-open trial slot whose dispatch never recorded an
    /// outcome.
    ///
    /// No-op unless the breaker is still half-open in `generation` with the
    /// trial outstanding. Returns whether the slot was released.
    pub fn release_trial(&mut self, generation: u64) -> bool {
        if self.state == CircuitState::HalfOpen
            && self.trial_in_flight
            && self.open_generation == generation
        {
            self.trial_in_flight = false;
            tracing::debug!(target_name = %self.target, "Abandoned half-open trial released");
            true
        } else {
            false
        }
    }

    /// Whether a half-open trial dispatch is outstanding.
    pub fn trial_in_flight(&self) -> bool {
        self.trial_in_flight
    }

    fn open(&mut self, now: Instant) {
        self.recent_failures.clear();
        self.opened_at = Some(now);
        self.open_generation += 1;
        self.transition_to(CircuitState::Open);
    }

    fn prune_window(&mut self, now: Instant) {
        let window = self.config.failure_window();
        while let Some(&oldest) = self.recent_failures.front() {
            if now.duration_since(oldest) > window {
                self.recent_failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn cooldown_elapsed(&self) -> bool {
        self.opened_at
            .map(|opened| opened.elapsed() >= self.config.cooldown())
            .unwrap_or(true)
    }

    /// Transition to a new state.
    fn transition_to(&mut self, new_state: CircuitState) {
        tracing::info!(
            target_name = %self.target,
            from = %self.state,
            to = %new_state,
            consecutive_failures = self.consecutive_failures,
            "Circuit breaker state transition"
        );
        self.state = new_state;
        self.last_state_change = Utc::now();
    }

    /// Get the guarded target.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Get the current state.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Get consecutive failures count.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Get total failures count.
    pub fn total_failures(&self) -> u32 {
        self.total_failures
    }

    /// Get total successes count.
    pub fn total_successes(&self) -> u32 {
        self.total_successes
    }

    /// Get last failure time.
    pub fn last_failure(&self) -> Option<DateTime<Utc>> {
        self.last_failure
    }

    /// Get last state change time.
    pub fn last_state_change(&self) -> DateTime<Utc> {
        self.last_state_change
    }

    /// Current open generation.
    pub fn open_generation(&self) -> u64 {
        self.open_generation
    }

    /// Check if the circuit is open (blocking dispatches).
    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    /// Check if the circuit is closed (allowing dispatches).
    pub fn is_closed(&self) -> bool {
        self.state == CircuitState::Closed
    }

    /// Get time until the half-open trial (if open).
    pub fn time_until_half_open(&self) -> Option<std::time::Duration> {
        if self.state != CircuitState::Open {
            return None;
        }
        self.opened_at
            .map(|opened| self.config.cooldown().saturating_sub(opened.elapsed()))
    }

    /// Manually reset the circuit breaker to closed state.
    pub fn reset(&mut self) {
        tracing::info!(
            target_name = %self.target,
            from = %self.state,
            "Circuit breaker manually reset to closed"
        );
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
        self.recent_failures.clear();
        self.opened_at = None;
        self.trial_in_flight = false;
        self.open_generation += 1;
        self.last_state_change = Utc::now();
    }

    /// Serializable snapshot of the breaker.
    pub fn snapshot(&self) -> CircuitBreakerState {
        CircuitBreakerState {
            target: self.target.clone(),
            state: self.state,
            consecutive_failures: self.consecutive_failures,
            last_failure_timestamp: self.last_failure,
        }
    }
}
