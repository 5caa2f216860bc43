use crate::error::AppError;
use crate::models::{Snapshot, UsageSection};
use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub interval: Duration,
    pub retry_base: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            retry_base: Duration::from_secs(10),
        }
    }
}

impl RefreshPolicy {
    /// Delay before the next attempt given the current failure streak.
    ///
    /// `retry_base * 2^(n-1)` capped at `interval`; a clean streak waits the full
    /// interval.
    pub fn delay_after(&self, consecutive_errors: u32) -> Duration {
        if consecutive_errors == 0 {
            return self.interval;
        }
        let exponent = (consecutive_errors - 1).min(31);
        self.retry_base
            .checked_mul(1u32 << exponent)
            .map_or(self.interval, |delay| delay.min(self.interval))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RetryState {
    consecutive_errors: u32,
}

/// The refresh state machine. Owns the observable snapshot and the failure
/// streak; whoever drives it is responsible for timers and I/O.
#[derive(Debug)]
pub struct RefreshScheduler {
    policy: RefreshPolicy,
    snapshot: Snapshot,
    retry: RetryState,
    started: bool,
}

impl RefreshScheduler {
    pub fn new(policy: RefreshPolicy) -> Self {
        Self {
            policy,
            snapshot: Snapshot::default(),
            retry: RetryState::default(),
            started: false,
        }
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Returns `true` the first time only; the caller should then fetch.
    pub fn start_monitoring(&mut self) -> bool {
        if self.started {
            return false;
        }
        self.started = true;
        true
    }

    /// Enters the fetching state. Returns `false` if an attempt is already in
    /// flight, in which case nothing changes.
    pub fn begin_fetch(&mut self) -> bool {
        if self.snapshot.is_loading {
            return false;
        }
        self.snapshot.is_loading = true;
        self.snapshot.error = None;
        true
    }

    /// Applies the result of an attempt and returns how long to wait before the
    /// next automatic one.
    pub fn complete(
        &mut self,
        outcome: Result<Vec<UsageSection>, AppError>,
        now: DateTime<Utc>,
    ) -> Duration {
        match outcome {
            Ok(sections) => {
                self.snapshot.sections = sections;
                self.snapshot.last_updated = Some(now);
                self.retry.consecutive_errors = 0;
            }
            Err(err) => {
                self.snapshot.error = Some(err.to_string());
                self.retry.consecutive_errors = self.retry.consecutive_errors.saturating_add(1);
            }
        }
        self.snapshot.is_loading = false;
        self.next_delay()
    }

    pub fn next_delay(&self) -> Duration {
        self.policy.delay_after(self.retry.consecutive_errors)
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.retry.consecutive_errors
    }
}
