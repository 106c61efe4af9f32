//! Circuit breaker around the broker connection.
//!
//! After `threshold` consecutive failures the breaker opens and callers
//! skip the broker. Once `cooldown` has passed a single trial call is let
//! through (half-open) and later callers keep skipping the broker until
//! its outcome closes or re-opens the circuit.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::Clock;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls flow to the broker.
    Closed,
    /// Calls bypass the broker.
    Open,
    /// Cooldown elapsed; one trial call is allowed through.
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
enum Inner {
    Closed { failures: u32 },
    Open { since: DateTime<Utc> },
    HalfOpen,
    /// Half-open with the trial call in flight.
    Trial,
}

/// Consecutive-failure circuit breaker driven by the injected clock.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker. A zero `threshold` behaves like one.
    #[must_use]
    pub fn new(threshold: u32, cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            clock,
            inner: Mutex::new(Inner::Closed { failures: 0 }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cool_down(&self, inner: &mut Inner) {
        if let Inner::Open { since } = *inner {
            let cooldown = chrono::Duration::from_std(self.cooldown).unwrap_or(chrono::Duration::MAX);
            let ready_at = since.checked_add_signed(cooldown);
            if ready_at.is_some_and(|at| self.clock.now() >= at) {
                *inner = Inner::HalfOpen;
            }
        }
    }

    /// Current state, moving `Open` to `HalfOpen` once the cooldown passed.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        let mut inner = self.lock();
        self.cool_down(&mut inner);
        match *inner {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { .. } => BreakerState::Open,
            Inner::HalfOpen | Inner::Trial => BreakerState::HalfOpen,
        }
    }

    /// Returns `true` when the protected call should be attempted. While
    /// half-open only the first caller gets `true`; it must report back
    /// through [`Self::record_success`] or [`Self::record_failure`].
    #[must_use]
    pub fn allows(&self) -> bool {
        let mut inner = self.lock();
        self.cool_down(&mut inner);
        match *inner {
            Inner::Closed { .. } => true,
            Inner::HalfOpen => {
                *inner = Inner::Trial;
                true
            }
            Inner::Open { .. } | Inner::Trial => false,
        }
    }

    /// Records a successful call.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if !matches!(*inner, Inner::Closed { .. }) {
            tracing::info!("broker circuit closed");
        }
        *inner = Inner::Closed { failures: 0 };
    }

    /// Records a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        let next = match *inner {
            Inner::Closed { failures } => {
                let failures = failures.saturating_add(1);
                if failures >= self.threshold {
                    tracing::warn!(failures, "broker circuit opened");
                    Inner::Open {
                        since: self.clock.now(),
                    }
                } else {
                    Inner::Closed { failures }
                }
            }
            Inner::HalfOpen | Inner::Trial => {
                tracing::warn!("broker trial call failed, circuit re-opened");
                Inner::Open {
                    since: self.clock.now(),
                }
            }
            open @ Inner::Open { .. } => open,
        };
        *inner = next;
    }
}
