//! Global spacing between analysis jobs.
//!
//! The gate is a leaky bucket of depth one: a job may start only when at
//! least `interval` has passed since the previous job started. It is owned
//! by the consumer and reads time through the injected clock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Minimum-interval throttle shared by every job.
#[derive(Debug)]
pub struct RateGate {
    interval: Duration,
    /// Start of the last admitted job, epoch millis. `i64::MIN` when none.
    last_start_ms: AtomicI64,
}

impl RateGate {
    /// Creates an open gate.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_start_ms: AtomicI64::new(i64::MIN),
        }
    }

    /// Configured spacing.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Time left before the next job may start; `None` when it may start
    /// now.
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_start_ms.load(Ordering::SeqCst);
        if last == i64::MIN {
            return None;
        }
        let elapsed = u64::try_from(now.timestamp_millis().saturating_sub(last)).unwrap_or(0);
        let interval = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX);
        (elapsed < interval).then(|| Duration::from_millis(interval - elapsed))
    }

    /// Records that a job started at `now`.
    pub fn mark(&self, now: DateTime<Utc>) {
        self.last_start_ms
            .store(now.timestamp_millis(), Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_job_passes_immediately() {
        let gate = RateGate::new(Duration::from_secs(30));
        assert!(gate.remaining(Utc::now()).is_none());
    }

    #[test]
    fn second_job_waits_out_the_interval() {
        let gate = RateGate::new(Duration::from_secs(30));
        let start = Utc::now();
        gate.mark(start);

        let later = start + chrono::Duration::seconds(12);
        assert_eq!(gate.remaining(later), Some(Duration::from_secs(18)));

        let after = start + chrono::Duration::seconds(30);
        assert!(gate.remaining(after).is_none());
    }

    #[test]
    fn clock_moving_backwards_keeps_the_gate_closed() {
        let gate = RateGate::new(Duration::from_secs(30));
        let start = Utc::now();
        gate.mark(start);
        let earlier = start - chrono::Duration::seconds(5);
        assert_eq!(gate.remaining(earlier), Some(Duration::from_secs(30)));
    }
}
